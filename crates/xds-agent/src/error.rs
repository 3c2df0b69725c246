//! Agent error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use xds_agent_config::ConfigError;
use xds_agent_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("Invalid configuration")]
    #[diagnostic(
        code(xds_agent::config),
        help(
            "Check the config file or XDS_AGENT_* environment variables.\n\
             Expected at: {path}"
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    #[diagnostic(code(xds_agent::core))]
    Core(#[from] CoreError),

    #[error("Cannot set up logging in {path}")]
    #[diagnostic(code(xds_agent::logging))]
    Logging {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::USAGE,
            Self::Core(e) if e.is_connection_error() => exit_code::CONNECTION,
            Self::Core(_) | Self::Logging { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
