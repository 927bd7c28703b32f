mod app;
mod cli;
mod commands;
mod output;
mod scheduler;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use tb_domain::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match cli::load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error de configuración: {e:#}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config, cli.verbose);
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    match commands::dispatch(cli.command, &config, &config_path).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
fn init_tracing(config: &Config, verbose: bool) {
    let default = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
