//! `xds-agent` -- local gateway between the XDS web UI and remote build
//! servers.
//!
//! Loads the agent config, sets up tracing, connects every configured
//! server and keeps running until Ctrl-C.

mod agent;
mod cli;
mod error;

use std::path::Path;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use xds_agent_config::AgentFileConfig;

use crate::agent::Agent;
use crate::cli::Cli;
use crate::error::AgentError;

const LOG_FILE_NAME: &str = "xds-agent.log";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(xds_agent_config::config_path);
    let config_error = |source| AgentError::Config {
        path: config_path.display().to_string(),
        source,
    };

    let cfg = xds_agent_config::load_config(Some(&config_path)).map_err(config_error)?;
    let servers = cfg.to_connection_configs().map_err(config_error)?;

    if cli.print_config {
        print!("{}", cfg.to_toml().map_err(config_error)?);
        return Ok(());
    }

    let _guard = init_tracing(&cli, &cfg)?;
    info!(config = %config_path.display(), servers = servers.len(), "starting xds-agent");

    let agent = Agent::new(&cfg, servers)?;
    let connected = agent.start().await;
    info!(connected, "agent ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    agent.shutdown();
    Ok(())
}

/// Log to `--log-file`, else to `logs_dir`, else to stderr. The returned
/// guard flushes file output when dropped.
fn init_tracing(cli: &Cli, cfg: &AgentFileConfig) -> Result<Option<WorkerGuard>, AgentError> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "xds_agent={level},xds_agent_core={level},xds_agent_api={level}"
        ))
    });

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| cfg.logs_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME)));

    let Some(log_file) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
        return Ok(None);
    };

    let log_dir = log_file.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(log_dir).map_err(|source| AgentError::Logging {
        path: log_dir.display().to_string(),
        source,
    })?;
    let file_name = log_file
        .file_name()
        .unwrap_or(std::ffi::OsStr::new(LOG_FILE_NAME));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    Ok(Some(guard))
}
