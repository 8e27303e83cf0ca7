use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Coordinate concurrent agents and learn from their task trajectories"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
/// Exit codes:
///   0  : success
///   1  : general/unknown error
///   2  : configuration error
///   3  : workspace not initialized / path not found
///   4  : database error
///   5  : coordination rejection (invalid operation, duplicate agent,
///        trajectory state)
///   8  : MCP server error
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("invalid operation")
        || lower.contains("duplicate agent")
        || lower.contains("trajectory already open")
        || lower.contains("no trajectory is open")
    {
        5
    } else if lower.contains("config") {
        2
    } else if lower.contains("database")
        || lower.contains("sqlite")
        || lower.contains("persistence timed out")
    {
        4
    } else if lower.contains("mcp") {
        8
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    // stdout carries JSON (and the MCP protocol for `serve`), so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("Tandem is not initialized in /foo. Run `tandem init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_cannot_resolve() {
        let err = anyhow::anyhow!("Cannot resolve path: /nonexistent");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Configuration error: Invalid config: bad window");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_database() {
        let err = anyhow::anyhow!("Cannot open database: /foo/.tandem/tandem.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_rejections() {
        for msg in [
            "Graph error: Invalid operation: agentId must not be empty",
            "Agent error: Duplicate agent: alpha is already registered with different capabilities",
            "Learning error: Trajectory already open: 1234",
            "Learning error: No trajectory is open",
        ] {
            assert_eq!(classify_exit_code(&anyhow::anyhow!(msg)), 5, "{msg}");
        }
    }

    #[test]
    fn exit_code_mcp() {
        let err = anyhow::anyhow!("MCP transport error: broken pipe");
        assert_eq!(classify_exit_code(&err), 8);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
