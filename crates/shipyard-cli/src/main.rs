//! shipyard CLI
//!
//! Runs shell commands locally or on inventory nodes and moves files over SFTP

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use shipyard_exec::{
    Command, CommandExecutor, FileTransferAgent, LocalExecutor, OutputSink, SftpAgent,
    SshExecutor, Verbosity,
};
use shipyard_inventory::{Inventory, RolesFormat, render_roles};
use tracing_subscriber::EnvFilter;

mod config;
mod console;

use config::Config;
use console::ConsoleSink;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Run deployment commands locally or over SSH", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $SHIPYARD_CONFIG or shipyard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress command output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command; each argument is a step chained with &&
    Run(RunArgs),

    /// Download a file from a node
    Get {
        /// Node to download from
        #[arg(long)]
        node: String,
        /// Remote path
        remote: String,
        /// Local destination; prints the contents when omitted
        local: Option<PathBuf>,
    },

    /// Upload a file to a node
    Put {
        /// Node to upload to
        #[arg(long)]
        node: String,
        /// Local file
        local: PathBuf,
        /// Remote destination
        remote: String,
    },

    /// Display roles
    Roles {
        /// Output format (txt|txt-no-header|json)
        #[arg(long, default_value = "txt")]
        format: RolesFormat,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run on this node
    #[arg(long, conflicts_with = "role")]
    node: Option<String>,

    /// Run on every node of this role, one after another
    #[arg(long)]
    role: Option<String>,

    /// Working directory
    #[arg(long)]
    cwd: Option<String>,

    /// Run as this user via sudo
    #[arg(long)]
    user: Option<String>,

    /// Abort after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Command steps
    #[arg(last = true, required = true)]
    steps: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Logs go to stderr so they never mix with streamed output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let inventory = Inventory::from_config(&config.inventory)?;
    let sink: Arc<dyn OutputSink> =
        Arc::new(ConsoleSink::new(Verbosity::from_flags(cli.quiet, cli.verbose)));
    let connect_timeout = config.settings.connect_timeout();

    match cli.command {
        Commands::Run(args) => run(args, &inventory, sink, connect_timeout).await,
        Commands::Get {
            node,
            remote,
            local,
        } => {
            let agent = SftpAgent::new(Some(inventory.node(&node)?), sink)
                .with_connect_timeout(connect_timeout);
            match local {
                Some(local) => agent.download(&remote, &local).await?,
                None => print!("{}", agent.download_to_string(&remote).await?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Put {
            node,
            local,
            remote,
        } => {
            let agent = SftpAgent::new(Some(inventory.node(&node)?), sink)
                .with_connect_timeout(connect_timeout);
            agent.upload(&local, &remote).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Roles { format } => {
            print!("{}", render_roles(&inventory, format)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    args: RunArgs,
    inventory: &Inventory,
    sink: Arc<dyn OutputSink>,
    connect_timeout: Duration,
) -> Result<ExitCode> {
    let mut command = Command::new(args.steps);
    if let Some(cwd) = args.cwd {
        command = command.cwd(cwd);
    }
    if let Some(user) = args.user {
        command = command.user(user);
    }
    if let Some(secs) = args.timeout {
        command = command.timeout(Duration::from_secs(secs));
    }

    let targets = match (&args.node, &args.role) {
        (Some(node), _) => vec![inventory.node(node)?],
        (None, Some(role)) => inventory.role(role)?.nodes.values().cloned().collect(),
        (None, None) => {
            let result = LocalExecutor::new(sink).run(&command).await?;
            return Ok(exit_code(result.exit_code));
        }
    };

    let executor = SshExecutor::new(sink).with_connect_timeout(connect_timeout);
    let mut last_failure = 0;
    for node in targets {
        let result = executor.run(&command.clone().on(node)).await?;
        if !result.success() {
            tracing::warn!(status = result.exit_code, "command exited with nonzero status");
            last_failure = result.exit_code;
        }
    }
    Ok(exit_code(last_failure))
}

fn exit_code(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::FAILURE, ExitCode::from)
}
