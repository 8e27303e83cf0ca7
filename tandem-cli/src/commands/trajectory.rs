use anyhow::Context;
use clap::{Args, Subcommand};

use super::{Workspace, WorkspaceArgs, print_json};

#[derive(Subcommand, Debug)]
pub enum TrajectoryCommand {
    /// Open a trajectory for a task
    Start(StartArgs),
    /// Append operations registered since the last step
    Add(WorkspaceArgs),
    /// Close the open trajectory with a score in [0, 1]
    Finalize(FinalizeArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Task description
    pub task: String,

    /// Only capture this agent's operations
    #[arg(long, short = 'a')]
    pub agent: Option<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct FinalizeArgs {
    /// Success score in [0, 1]
    pub score: f64,

    /// Free-text critique
    #[arg(long)]
    pub critique: Option<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

pub async fn run(cmd: TrajectoryCommand) -> anyhow::Result<()> {
    match cmd {
        TrajectoryCommand::Start(args) => {
            let ws = Workspace::open(&args.workspace).await?;
            let id = match args.agent.as_deref() {
                Some(agent) => ws.store.start_agent_trajectory(&args.task, agent),
                None => ws.store.start_trajectory(&args.task),
            }
            .context("Cannot start trajectory")?;
            ws.save().await?;
            print_json(&serde_json::json!({ "trajectoryId": id, "task": args.task.trim() }))
        }
        TrajectoryCommand::Add(args) => {
            let ws = Workspace::open(&args).await?;
            let step = ws
                .store
                .add_to_trajectory()
                .context("Cannot add to trajectory")?;
            ws.save().await?;
            print_json(&step)
        }
        TrajectoryCommand::Finalize(args) => {
            let ws = Workspace::open(&args.workspace).await?;
            let trajectory = ws
                .store
                .finalize_trajectory(args.score, args.critique)
                .context("Cannot finalize trajectory")?;
            ws.save().await?;
            print_json(&trajectory)
        }
    }
}
