use clap::{Parser, Subcommand};
use colored::Colorize;
use config_store::ConfigReloadTask;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config_store_cli::commands::{
    history_cmd::{self, HistoryCommands},
    open_store,
    store_cmd::{self, StoreCommands},
};
use config_store_cli::config::{load_settings, watch_interval};
use config_store_cli::errors::Error;

/// Pipeline configuration store CLI
#[derive(Parser)]
#[command(name = "go-config")]
#[command(about = "Inspect and change the versioned pipeline configuration", long_about = None)]
struct Cli {
    /// Path to the store settings file
    #[arg(short, long, global = true)]
    settings: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommands),

    #[command(flatten)]
    History(HistoryCommands),

    /// Reload the configuration whenever the file changes, until interrupted
    Watch {
        /// Seconds between checks; defaults to the configured interval
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show the CLI version
    Version,
}

async fn watch(settings_path: Option<&str>, interval: Option<u64>) -> Result<(), Error> {
    let settings = load_settings(settings_path)?;
    let interval = watch_interval(&settings, interval)?;

    let source = std::sync::Arc::new(open_store(&settings, None)?);
    let handle = ConfigReloadTask::new(source, interval).spawn();

    info!("Watching configuration file, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    handle.shutdown().await;
    Ok(())
}

fn print_output(output: String) {
    println!("{output}");
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().pretty())
        .with(EnvFilter::from_env("GO_CONFIG_LOG"))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Version => {
            println!("go-config version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Watch { interval } => watch(cli.settings.as_deref(), *interval).await,
        Commands::Store(cmd) => load_settings(cli.settings.as_deref())
            .and_then(|settings| store_cmd::execute(cmd, &settings))
            .map(print_output),
        Commands::History(cmd) => load_settings(cli.settings.as_deref())
            .and_then(|settings| history_cmd::execute(cmd, &settings))
            .map(print_output),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
