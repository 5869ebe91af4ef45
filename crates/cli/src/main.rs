mod session_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use osm_sessions::SessionLayout;

#[derive(Parser)]
#[command(name = "osm", about = "osm: one-shot-man session tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sessions directory (overrides $OSM_SESSIONS_DIR and the config file).
    #[arg(long, global = true)]
    sessions_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage persisted sessions.
    Session {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Stdout carries command output, so logs go to stderr.
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "osm starting");

    let config = osm_config::load_or_discover(cli.config.as_deref())?;
    let layout = SessionLayout::resolve(cli.sessions_dir.as_deref(), config.sessions.dir.as_deref())?;
    debug!(dir = %layout.dir().display(), "sessions directory");

    match cli.command {
        Commands::Session { action } => {
            let ctx = session_commands::SessionContext {
                layout,
                config: config.sessions,
            };
            session_commands::handle_session(action, &ctx).await
        },
    }
}
