//! Thin CLI over the orchestration framework.

use std::path::PathBuf;

use anyhow::Result;
use caviar::context::PHASE_DEFAULT;
use caviar::{Caviar, CaviarOptions, Sandbox, SandboxOptions};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caviar", version, about = "Plugin-based process orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one lifecycle phase in this process.
    Run {
        /// Working directory of the run.
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
        /// Enable dev mode.
        #[arg(long)]
        dev: bool,
        /// Lifecycle phase to run.
        #[arg(long, default_value = PHASE_DEFAULT)]
        phase: String,
    },
    /// Run the phase inside a sandboxed child process.
    Sandbox {
        /// Working directory of the run.
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
        /// Source root handed to the server.
        #[arg(long, default_value = "src")]
        src: PathBuf,
        /// Server implementation the child resolves and starts.
        #[arg(long, default_value = "caviar")]
        server: String,
        #[arg(long)]
        dev: bool,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = PHASE_DEFAULT)]
        phase: String,
    },
}

fn main() {
    caviar::logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { cwd, dev, phase } => {
            let mut options = CaviarOptions::new(canonical(cwd)?);
            options.dev = dev;
            Caviar::new(options)?.run(&phase).await
        }
        Command::Sandbox {
            cwd,
            src,
            server,
            dev,
            port,
            phase,
        } => {
            let mut options = SandboxOptions::new(server, canonical(cwd)?, src);
            options.dev = dev;
            options.port = port;
            Sandbox::new(options)?.run(&phase).await
        }
    }
}

fn canonical(path: PathBuf) -> Result<PathBuf> {
    std::fs::canonicalize(&path).map_err(|err| anyhow::anyhow!("resolve {}: {err}", path.display()))
}
