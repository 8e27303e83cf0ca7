//! Tandem core library: agent registry, trajectory learning, and snapshot
//! persistence around the coordination DAG.
//!
//! The main entry point is [`coordinator::CoordinationStore`], one owned
//! handle per process that every caller shares by reference or `Arc`.

pub mod agents;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod learn;
pub mod proof;
pub mod store;

pub use coordinator::{CoordinationStats, CoordinationStore, OperationReceipt};
pub use error::{Result, TandemError};
