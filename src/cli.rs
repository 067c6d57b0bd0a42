use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::Application;
use crate::compiler;
use crate::composer::{Combinator, Node};
use crate::config::Config;
use crate::lowering;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor - compile compositions and manage conductor sessions", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a composition (JSON) into a conductor program
    Compile {
        /// Composition file
        file: PathBuf,

        /// Write the compiled wrapper here instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Print only the program, without ast/version/actions
        #[arg(long)]
        program_only: bool,
    },

    /// Lower derived combinators and print the resulting composition
    Lower {
        /// Composition file
        file: PathBuf,

        /// Lower only these combinators (comma-separated); all by default
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// List sessions, most recently updated first
    Sessions {
        /// Number of results (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: usize,
    },

    /// Print the result of a session
    Result {
        /// Session ID
        session_id: String,

        /// Seconds to wait for a running session
        #[arg(long, default_value = "0")]
        wait: u64,
    },

    /// Print the activation trace of a session
    Trace {
        /// Session ID
        session_id: String,
    },

    /// Stop a running session
    Kill {
        /// Session ID
        session_id: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Delete every record of a session
    Purge {
        /// Session ID
        session_id: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Print the effective configuration
    Config,

    /// Run database migrations
    Migrate,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

fn read_composition(file: &Path) -> Result<Node> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let json: JsonValue = serde_json::from_str(&source)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    Ok(Node::from_json(json)?)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(yes: bool, what: &str) {
    if !yes {
        eprintln!("Error: Confirmation required. Use --yes flag to confirm {}.", what);
        std::process::exit(1);
    }
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Config errors surface before any command output
    let config = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config)
        .build()?;

    match cli.command {
        Commands::Compile {
            file,
            output,
            program_only,
        } => {
            let node = read_composition(&file)?;
            let compiled = compiler::compile(&node)?;
            let rendered = if program_only {
                serde_json::to_string_pretty(&compiled.composition)?
            } else {
                serde_json::to_string_pretty(&compiled)?
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "✓ Compiled {} states into {}",
                        compiled.composition.len(),
                        path.display()
                    );
                }
                None => println!("{}", rendered),
            }
        }

        Commands::Lower { file, only } => {
            let kinds = only
                .iter()
                .map(|name| name.trim().parse::<Combinator>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let node = read_composition(&file)?;
            print_json(&lowering::lower_only(node.labelled(), &kinds))?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Migrate => {
            let app = Application::new(config).await?;
            println!("Running migrations...");
            app.migrate().await?;
            println!("Migrations complete!");
        }

        Commands::Sessions { limit } => {
            let app = Application::new(config).await?;
            let sessions = app.sessions().list(limit).await?;

            if sessions.is_empty() {
                println!("No sessions found");
                return Ok(());
            }

            println!("Found {} session(s):\n", sessions.len());
            for session in sessions {
                println!(
                    "  {} | {:?} | {}",
                    session.id, session.status, session.updated_at
                );
            }
        }

        Commands::Result { session_id, wait } => {
            let app = Application::new(config).await?;
            let result = if wait > 0 {
                app.sessions()
                    .result(&session_id, Duration::from_secs(wait))
                    .await?
            } else {
                app.sessions().poll_result(&session_id).await?
            };

            match result {
                Some(result) => print_json(&result)?,
                None => {
                    eprintln!("Session {} is still running", session_id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Trace { session_id } => {
            let app = Application::new(config).await?;
            let trace = app.sessions().trace(&session_id).await?;

            if trace.is_empty() {
                println!("No activations recorded for session {}", session_id);
                return Ok(());
            }
            for activation_id in trace {
                println!("{}", activation_id);
            }
        }

        Commands::Kill { session_id, yes } => {
            confirm(yes, "killing the session");
            let app = Application::new(config).await?;

            if app.sessions().kill(&session_id).await? {
                println!("✓ Session {} killed", session_id);
            } else {
                println!("Session {} was not running", session_id);
            }
        }

        Commands::Purge { session_id, yes } => {
            confirm(yes, "purging the session");
            let app = Application::new(config).await?;

            let removed = app.sessions().purge(&session_id).await?;
            println!("✓ Session {} purged ({} record(s) removed)", session_id, removed);
        }
    }

    Ok(())
}
