//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` into user-facing errors with
//! actionable help text and a stable exit code.

use miette::Diagnostic;
use thiserror::Error;

use bifrost_config::ConfigError;
use bifrost_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    /// Returned by clap itself for argument errors.
    #[allow(dead_code)]
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(bifrost::no_config),
        help(
            "Pass --config <path> or set BIFROST_CONFIG.\n\
             Default location: config/bifrost.toml"
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(bifrost::validation), help("Fix the value in {path} and try again."))]
    Validation {
        field: String,
        reason: String,
        path: String,
    },

    #[error(transparent)]
    #[diagnostic(code(bifrost::config))]
    Config(ConfigError),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Bridge stopped unexpectedly: {0}")]
    #[diagnostic(code(bifrost::runtime))]
    Runtime(#[from] CoreError),
}

impl CliError {
    /// Wrap a configuration failure, keeping the file path for messages.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let display = path.display().to_string();
        match err {
            ConfigError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                Self::NoConfig { path: display }
            }
            ConfigError::Validation { field, reason } => Self::Validation {
                field,
                reason,
                path: display,
            },
            other => Self::Config(other),
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Validation { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Runtime(_) => exit_code::GENERAL,
        }
    }
}
