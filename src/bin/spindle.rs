use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::info;

use spindle::config::global::GlobalConfig;
use spindle::config::loader;
use spindle::runtime::command::Command;
use spindle::runtime::engine::{GraphEvent, Scheduler};
use spindle::runtime::job::LocalJobRunner;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow with the in-process job runner
    Run {
        /// Path to the workflow YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Site-level global configuration file
        #[arg(long)]
        site_config: Option<PathBuf>,

        /// User-level global configuration file, layered over the site one
        #[arg(long)]
        user_config: Option<PathBuf>,
    },

    /// Load and validate a workflow definition, then exit
    Validate {
        /// Path to the workflow YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let def = loader::load_workflow(&file)
                .with_context(|| format!("invalid workflow definition: {}", file.display()))?;
            info!(workflow = %def.name, tasks = def.task_names().len(), "definition is valid");
        }

        Commands::Run {
            file,
            site_config,
            user_config,
        } => {
            let def = loader::load_workflow(&file)
                .with_context(|| format!("cannot load workflow: {}", file.display()))?;
            let global = GlobalConfig::load(site_config.as_deref(), user_config.as_deref())
                .context("cannot load global configuration")?;

            let mut scheduler =
                Scheduler::new(file, def, global, Box::new(LocalJobRunner::new()));

            // Stand in for the graph layer: the initial tasks have no
            // upstream dependencies, so they are ready at once.
            let point = scheduler.def().initial_point;
            let graph = scheduler.graph_events();
            for name in scheduler.def().task_names() {
                let _ = graph.send(GraphEvent::Ready { point, name });
            }

            let stop = scheduler.commands();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping");
                    let (reply, _ack) = oneshot::channel();
                    let _ = stop.send(Command::Stop { reply }).await;
                }
            });

            scheduler.run().await;
        }
    }
    Ok(())
}
