mod critical;
mod guard;
mod layout;
mod ledger;
mod lifecycle;
mod preferences;
mod project;
mod snapshot;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use project::Project;
use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use types::{Invocation, Response};

/// Log filter, e.g. `PROJECT_PILOT_LOG=debug`. Logging is off by default
/// because stderr is the advisory channel.
const LOG_ENV: &str = "PROJECT_PILOT_LOG";

/// Lifecycle hooks for the Project Pilot intelligence layer.
///
/// Without a subcommand, reads one hook event as JSON on stdin.
#[derive(Parser)]
#[command(name = "project-pilot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold .pilot/ and start onboarding
    Init {
        /// Project root
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Record generated files, stamp the watermark and end onboarding
    Finalize {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Let the next shell command delete protected files
    AllowDelete {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading hook input")?;
    Ok(buffer)
}

fn run_hook() -> Result<Response> {
    let raw = read_stdin()?;
    let invocation = Invocation::decode(&raw);
    tracing::debug!(event = ?invocation.event, cwd = ?invocation.cwd, "hook invoked");

    let root = match invocation.cwd {
        Some(cwd) => PathBuf::from(cwd),
        None => env::current_dir().context("resolving working directory")?,
    };
    Project::open(root).handle(&invocation.event)
}

fn run_command(command: Command) -> Result<()> {
    match command {
        Command::Init { dir } => {
            let project = Project::open(dir);
            project.init()?;
            println!(
                "Setup complete. Onboarding in progress for {}.",
                project.layout().root().display()
            );
        }
        Command::Finalize { dir } => {
            let created = Project::open(dir).finalize()?;
            for path in &created {
                println!("CREATED {path}");
            }
            println!("Project Pilot initialized.");
        }
        Command::AllowDelete { dir } => {
            let flag = Project::open(dir).allow_delete()?;
            println!(
                "The next shell command may delete Project Pilot files ({}).",
                flag.display()
            );
        }
    }
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        if let Err(err) = run_command(command) {
            eprintln!("project-pilot: {err:#}");
            process::exit(1);
        }
        return;
    }

    // A failing hook must never block the host; errors are logged only.
    match run_hook() {
        Ok(Response::Silent) => {}
        Ok(Response::Inform(output)) => match serde_json::to_string(&output) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!("serializing hook output: {err}"),
        },
        Ok(Response::Advise(text)) => {
            eprint!("{text}");
            process::exit(2);
        }
        Err(err) => tracing::error!("{err:#}"),
    }
}
