use super::CoordinationSnapshot;

/// Persistence collaborator for coordination snapshots.
///
/// Records are opaque to the implementation; the in-memory stores own all
/// invariants and rebuild derived state (tips, confidences) on restore.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Replace the stored snapshot with `snapshot`.
    async fn save_snapshot(&self, snapshot: &CoordinationSnapshot) -> crate::error::Result<()>;

    /// Load the last saved snapshot, or `None` if nothing was saved yet.
    async fn load_snapshot(&self) -> crate::error::Result<Option<CoordinationSnapshot>>;

    /// Remove every stored record.
    async fn clear(&self) -> crate::error::Result<()>;
}
