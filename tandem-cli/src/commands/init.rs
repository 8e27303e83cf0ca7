use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use tandem_core::config::TandemConfig;
use tandem_core::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing config.toml with defaults
    #[arg(long)]
    pub force: bool,

    /// Require agents to register before their operations are accepted
    #[arg(long)]
    pub require_registration: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let dir = root.join(tandem_mcp::TANDEM_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Cannot create {}", dir.display()))?;

    let config_path = super::config_path(&root);
    if args.force || !config_path.exists() {
        let mut config = TandemConfig::default();
        config.agents.require_registration = args.require_registration;
        let text = config.to_toml().context("Cannot render default config")?;
        std::fs::write(&config_path, text)
            .with_context(|| format!("Cannot write config: {}", config_path.display()))?;
    } else {
        // Fail early on a broken existing config.
        super::load_config(&root)?;
    }

    let db_path = super::db_path(&root);
    SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;

    println!("Initialized Tandem workspace in {}", dir.display());
    Ok(())
}
