use anyhow::Context;
use clap::Args;

use super::WorkspaceArgs;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Transport type: stdio
    #[arg(long, default_value = "stdio")]
    pub transport: String,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.workspace.path).with_context(|| {
        format!("Cannot resolve path: {}", args.workspace.path.display())
    })?;

    let db_path = tandem_mcp::resolve_db_path(&root).with_context(|| {
        format!(
            "Tandem is not initialized in {}. Run `tandem init` first.",
            root.display()
        )
    })?;
    let config = super::load_config(&root)?;

    match args.transport.as_str() {
        "stdio" => {
            tandem_mcp::serve_stdio(config, &db_path)
                .await
                .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
        }
        other => {
            anyhow::bail!("Unsupported transport: {other}. Supported: stdio");
        }
    }

    Ok(())
}
