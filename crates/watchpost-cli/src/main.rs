mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, cron::CronSubcommand, notify::NotifySubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "watchpost",
    about = "Scheduled scans, automation rules, workflows and notifications for security scanning",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (missing file means built-in defaults for serve)
    #[arg(
        long,
        global = true,
        env = "WATCHPOST_CONFIG",
        default_value = watchpost_core::config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the config, seed the engine, start job timers and serve the HTTP API
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// Inspect and validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Work with cron expressions
    Cron {
        #[command(subcommand)]
        subcommand: CronSubcommand,
    },

    /// Render templates and test notification channels
    Notify {
        #[command(subcommand)]
        subcommand: NotifySubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&cli.config, port),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
        Commands::Cron { subcommand } => cmd::cron::run(subcommand, cli.json),
        Commands::Notify { subcommand } => cmd::notify::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
