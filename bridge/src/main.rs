use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use mailgram_lib::config::load_config;

#[derive(Parser)]
#[command(name = "mailgram")]
#[command(about = "Forward new Gmail messages to Telegram")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, env = "MAILGRAM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted (default)
    Run,
    /// Validate the configuration and storage, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    mailgram_lib::init_tracing();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => mailgram_lib::run(config).await,
        Commands::CheckConfig => mailgram_lib::check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
