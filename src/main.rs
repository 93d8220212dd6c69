//! exectree - hierarchical lifecycle controller
//!
//! Loads a tree document, starts one worker per node and drives the tree from
//! the command line or an interactive shell.

mod demo;
mod render;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use exectree_core::TreeDecl;
use exectree_runtime::{Settings, Tree, TreeBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exectree")]
#[command(about = "Drive a tree of lifecycle state machines")]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, env = "EXECTREE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a tree document and print every node's FSM
    Check {
        /// Tree document (JSON)
        tree: PathBuf,
    },

    /// Send commands to the root one after another
    Run {
        /// Tree document (JSON)
        tree: PathBuf,

        /// Commands, in order
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Start an interactive shell
    Shell {
        /// Tree document (JSON)
        tree: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { tree } => {
            let planned = TreeBuilder::new(read_tree(&tree)?).plan()?;
            for node in &planned {
                println!("{}", render::fsm_table(&node.config, node.depth));
            }
            println!(
                "{} {} node(s)",
                "OK".green(),
                planned.len()
            );
        }
        Commands::Run { tree, commands } => {
            let tree = Arc::new(start(&tree, &settings)?);
            let ok = run(Arc::clone(&tree), commands, report_timeout(&settings)).await?;
            tokio::task::spawn_blocking(move || tree.shutdown()).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Shell { tree } => {
            let tree = start(&tree, &settings)?;
            let timeout = report_timeout(&settings);
            tokio::task::spawn_blocking(move || repl::run(&tree, timeout)).await??;
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    let settings = match path {
        Some(path) => {
            let mut settings = Settings::from_file(path)?;
            settings.apply_env_overrides();
            settings.validate()?;
            tracing::info!("Loaded config from {}", path.display());
            settings
        }
        None => Settings::load()?,
    };
    tracing::debug!("Settings: {:?}", settings);
    Ok(settings)
}

fn read_tree(path: &Path) -> Result<TreeDecl, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    Ok(TreeDecl::parse(&content)?)
}

fn start(path: &Path, settings: &Settings) -> Result<Tree, Box<dyn std::error::Error>> {
    let builder = TreeBuilder::new(read_tree(path)?);
    let hooks = demo::hooks(&builder.plan()?, &settings.demo);
    let tree = builder
        .hooks(hooks)
        .settings(settings.dispatch.clone())
        .build()?;
    Ok(tree)
}

/// How long the binary waits for a root report: every level times out on
/// its own, so the root answers within one dispatch timeout plus the work of
/// its slowest leaf.
fn report_timeout(settings: &Settings) -> Duration {
    settings.dispatch.timeout() + settings.demo.work() * 2
}

async fn run(
    tree: Arc<Tree>,
    commands: Vec<String>,
    timeout: Duration,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut ok = true;

    for command in commands {
        tree.send(&command)?;
        eprintln!("{} {}", "Sent".green(), command.cyan());

        let waiter = Arc::clone(&tree);
        let wait = tokio::task::spawn_blocking(move || waiter.next_report(timeout));

        tokio::select! {
            report = wait => {
                match report? {
                    Some(report) => {
                        println!("{}", render::report_line(&report));
                        println!("{}", render::status_table(&tree.status()));
                        if !report.is_success() {
                            ok = false;
                            break;
                        }
                    }
                    None => {
                        eprintln!(
                            "{}: no report for '{}' within {}ms",
                            "Error".red(),
                            command,
                            timeout.as_millis()
                        );
                        ok = false;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Interrupted, stopping tree...".dimmed());
                ok = false;
                break;
            }
        }
    }

    Ok(ok)
}
