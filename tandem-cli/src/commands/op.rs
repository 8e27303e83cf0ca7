use anyhow::Context;
use clap::Args;

use tandem_dag::{ConflictCandidate, Operation, OperationKind, VertexId};

use super::{Workspace, WorkspaceArgs, print_json};

#[derive(Args, Debug)]
pub struct OpArgs {
    /// Operation type (commit, edit, merge, rebase, ...; anything else is recorded as unknown)
    pub kind: String,

    /// Agent performing the operation
    #[arg(long, short = 'a')]
    pub agent: String,

    /// Affected file (repeatable; omit for metadata-only operations)
    #[arg(long = "file", short = 'f')]
    pub files: Vec<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct ConflictsArgs {
    /// Check an already registered vertex
    #[arg(long, conflicts_with_all = ["kind", "agent", "files"])]
    pub vertex: Option<i64>,

    /// Operation type of a proposed operation
    #[arg(long, requires = "agent")]
    pub kind: Option<String>,

    /// Agent of a proposed operation
    #[arg(long, short = 'a')]
    pub agent: Option<String>,

    /// Affected file of a proposed operation (repeatable)
    #[arg(long = "file", short = 'f')]
    pub files: Vec<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

pub async fn run_op(args: OpArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args.workspace).await?;
    let operation = Operation::new(OperationKind::parse(&args.kind), args.agent, args.files);
    let receipt = ws
        .store
        .register_operation(operation)
        .context("Cannot register operation")?;
    ws.save().await?;
    print_json(&receipt)
}

pub async fn run_conflicts(args: ConflictsArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args.workspace).await?;
    let candidate = match (args.vertex, args.agent) {
        (Some(id), _) => ConflictCandidate::Registered(VertexId(id)),
        (None, Some(agent)) => {
            let kind = args
                .kind
                .as_deref()
                .map_or(OperationKind::Unknown, OperationKind::parse);
            let operation = Operation::new(kind, agent, args.files);
            operation
                .validate()
                .context("Cannot check proposed operation")?;
            ConflictCandidate::Proposed(operation)
        }
        (None, None) => anyhow::bail!("Pass --vertex <ID> or --agent <ID> with --file"),
    };
    print_json(&ws.store.check_conflicts(&candidate))
}
