use anyhow::Context;
use clap::{Args, Subcommand};

use super::{Workspace, WorkspaceArgs, print_json};

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Register an agent with its capabilities
    Register(RegisterArgs),
    /// List registered agents
    List(WorkspaceArgs),
    /// Remove an agent (its operations stay in the graph)
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Agent id
    pub agent_id: String,

    /// Capability (repeatable)
    #[arg(long = "capability", short = 'c')]
    pub capabilities: Vec<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Agent id
    pub agent_id: String,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

pub async fn run(cmd: AgentCommand) -> anyhow::Result<()> {
    match cmd {
        AgentCommand::Register(args) => {
            let ws = Workspace::open(&args.workspace).await?;
            let record = ws
                .store
                .register_agent(&args.agent_id, &args.capabilities)
                .context("Cannot register agent")?;
            ws.save().await?;
            print_json(&record)
        }
        AgentCommand::List(args) => {
            let ws = Workspace::open(&args).await?;
            print_json(&ws.store.list_agents())
        }
        AgentCommand::Remove(args) => {
            let ws = Workspace::open(&args.workspace).await?;
            let removed = ws.store.deregister_agent(&args.agent_id);
            if removed {
                ws.save().await?;
            }
            print_json(&serde_json::json!({ "agentId": args.agent_id, "removed": removed }))
        }
    }
}
