use super::{Workspace, WorkspaceArgs, print_json};

pub async fn run(args: WorkspaceArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args).await?;
    let swept = ws.store.sweep_stale();
    if swept.is_some() {
        ws.save().await?;
    }
    let stats = ws.store.get_stats();
    print_json(&serde_json::json!({
        "workspace": ws.root.display().to_string(),
        "stats": stats,
    }))
}

pub async fn run_tips(args: WorkspaceArgs) -> anyhow::Result<()> {
    let ws = Workspace::open(&args).await?;
    print_json(&serde_json::json!({ "tips": ws.store.get_tips() }))
}
