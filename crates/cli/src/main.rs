mod config_commands;
mod db_commands;
mod run;

use std::path::PathBuf;

use {
    anyhow::Context as _,
    clap::{ArgAction, Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    disable_version_flag = true,
    about = "Parley: chat platform bridge for bot automation"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./parley.toml, then the user config dir).
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to `info`, or
    /// `debug` when `app.debug` is set.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Print version.
    #[allow(dead_code)]
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default when no subcommand is provided).
    Run,
    /// Validate the configuration file and report errors and warnings.
    Check,
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = parley_config::discover_and_load(cli.config.as_deref())
        .context("failed to load configuration")?;

    let default_level = if config.app.debug { "debug" } else { "info" };
    init_telemetry(
        cli.log_level.as_deref().unwrap_or(default_level),
        cli.json_logs,
    );

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "parley starting");
            run::run(config).await
        },
        Some(Commands::Check) => config_commands::check(&config),
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config).await,
    }
}
