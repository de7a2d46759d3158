use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use insight_sync::{Result, cmd};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the insight application
#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Keep a remote code index in sync with a local directory")]
#[command(version)]
struct Cli {
   #[arg(short, long, action = ArgAction::Count, global = true, help = "Increase log verbosity")]
   verbose: u8,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for insight
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Create a remote index and upload the directory")]
   Init {
      #[arg(help = "Directory to initialize (default: cwd)")]
      path: Option<PathBuf>,

      #[arg(short, long, help = "Hide the progress bar")]
      quiet: bool,
   },

   #[command(about = "Upload what changed since the last sync")]
   Sync {
      #[arg(help = "Directory to sync (default: cwd)")]
      path: Option<PathBuf>,

      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Sync, then search the index")]
   Query {
      #[arg(help = "Natural language query")]
      query: String,

      #[arg(
         short = 'l',
         long,
         default_value = "10",
         value_parser = clap::value_parser!(u32).range(1..),
         help = "Maximum number of matches"
      )]
      limit: u32,

      #[arg(short = 'p', long, help = "Directory to query (default: cwd)")]
      path: Option<PathBuf>,

      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Show manifest state and pending changes")]
   Status {
      #[arg(help = "Directory to inspect (default: cwd)")]
      path: Option<PathBuf>,

      #[arg(long, help = "Also check that the remote index is still valid")]
      remote: bool,

      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Delete the remote index and local metadata")]
   Uninit {
      #[arg(help = "Directory to uninitialize (default: cwd)")]
      path: Option<PathBuf>,
   },
}

#[tokio::main]
async fn main() {
   let cli = Cli::parse();

   let level = match cli.verbose {
      0 => Level::WARN,
      1 => Level::INFO,
      _ => Level::DEBUG,
   };
   tracing_subscriber::fmt()
      .with_writer(std::io::stderr)
      .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
      .init();

   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      if err.is_retryable() {
         eprintln!("nothing was committed locally; rerun to retry");
      }
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   match cli.command {
      Cmd::Init { path, quiet } => cmd::init::execute(path, quiet).await,
      Cmd::Sync { path, json } => cmd::sync::execute(path, json).await,
      Cmd::Query { query, limit, path, json } => {
         cmd::query::execute(query, limit as usize, path, json).await
      },
      Cmd::Status { path, remote, json } => cmd::status::execute(path, remote, json).await,
      Cmd::Uninit { path } => cmd::uninit::execute(path).await,
   }
}
