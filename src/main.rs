// ABOUTME: Entry point: panic hook, .env loading, logging, config, then the chosen subcommand
// ABOUTME: `run` starts the reply loop; `snapshot` and `check-config` are one-shot helpers

use anyhow::Result;
use clap::Parser;
use streamtalk::app;
use streamtalk::cli::{Cli, Commands};
use streamtalk::logging;
use streamtalk_core::{paths, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nstreamtalk panicked: {}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    if let Some(path) = &cli.config {
        std::env::set_var("STREAMTALK_CONFIG_PATH", path);
    }

    let _log_guard = logging::init(&paths::log_dir(), cli.json_logs)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting streamtalk");

    let config = Config::load()?;
    tracing::info!(
        backend = %config.model.backend_type(),
        persona = %config.persona.name,
        history_dir = %config.memory.history_dir,
        speech = %config.speech.backend,
        reading_enabled = config.reading.enabled,
        overlay_port = config.overlay.port,
        "Configuration loaded"
    );

    match cli.command() {
        Commands::Run => app::run(config).await,
        Commands::Snapshot => {
            let sentinel = app::request_snapshot(&config)?;
            println!("Backup requested: {}", sentinel.display());
            Ok(())
        }
        Commands::CheckConfig => {
            println!("{:#?}", config);
            println!("Configuration OK");
            Ok(())
        }
    }
}
