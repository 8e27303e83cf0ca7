use clap::Args;

use super::{Workspace, WorkspaceArgs, print_json};

#[derive(Args, Debug)]
pub struct SuggestArgs {
    /// Task description
    pub task: String,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct PatternsArgs {
    /// Maximum patterns to show
    #[arg(long)]
    pub limit: Option<usize>,

    /// Only show patterns with at least this confidence
    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f64,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct TrajectoriesArgs {
    /// Task description to compare against
    pub task: String,

    /// Maximum trajectories to show
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

pub async fn run_suggest(args: SuggestArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args.workspace).await?;
    print_json(&ws.store.get_suggestion(&args.task))
}

pub async fn run_stats(args: WorkspaceArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args).await?;
    print_json(&ws.store.get_learning_stats())
}

pub async fn run_patterns(args: PatternsArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args.workspace).await?;
    let patterns: Vec<_> = ws
        .store
        .get_patterns()
        .into_iter()
        .filter(|p| p.confidence >= args.min_confidence)
        .take(args.limit.unwrap_or(usize::MAX))
        .collect();
    print_json(&patterns)
}

pub async fn run_trajectories(args: TrajectoriesArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args.workspace).await?;
    print_json(&ws.store.query_trajectories(&args.task, args.limit))
}

pub async fn run_reset(args: WorkspaceArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args).await?;
    ws.store.reset_learning();
    ws.save().await?;
    print_json(&ws.store.get_learning_stats())
}
