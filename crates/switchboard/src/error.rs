//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and distinct exit codes.

use miette::Diagnostic;
use thiserror::Error;

use switchboard_config::ConfigError;
use switchboard_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const UNKNOWN_OUTCOME: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("{source}")]
    #[diagnostic(
        code(switchboard::config),
        help(
            "Check the configuration file.\n\
             Default location: {default_path}\n\
             Override with --config or SWITCHBOARD_CONFIG."
        )
    )]
    Config {
        #[source]
        source: ConfigError,
        default_path: String,
    },

    #[error("No credentials for switch '{switch}'")]
    #[diagnostic(
        code(switchboard::no_credentials),
        help("Set `password`/`password_env` (or `token`/`token_env`) in [switches.{switch}].")
    )]
    NoCredentials { switch: String },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(switchboard::validation))]
    Validation { field: String, reason: String },

    #[error("{what} not found")]
    #[diagnostic(
        code(switchboard::not_found),
        help("Run: switchboard switches list")
    )]
    NotFound { what: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Could not reach a switch: {message}")]
    #[diagnostic(
        code(switchboard::connection_failed),
        help("Check the management address, port and network path to the switch.")
    )]
    Connection { message: String },

    #[error("Switch rejected the credentials: {message}")]
    #[diagnostic(code(switchboard::auth_failed))]
    Auth { message: String },

    #[error("Switch is busy: {message}")]
    #[diagnostic(
        code(switchboard::contention),
        help("Another operation holds the switch. Retry later.")
    )]
    Contention { message: String },

    #[error("Outcome unknown: {message}")]
    #[diagnostic(
        code(switchboard::unknown_outcome),
        help(
            "The change may or may not have been applied.\n\
             Inspect the switch (switchboard port show) before retrying."
        )
    )]
    UnknownOutcome { message: String },

    #[error("{message}")]
    #[diagnostic(code(switchboard::device))]
    Device { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(switchboard::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Validation { .. } => exit_code::USAGE,
            Self::NoCredentials { .. } | Self::Auth { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Contention { .. } => exit_code::CONFLICT,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::UnknownOutcome { .. } => exit_code::UNKNOWN_OUTCOME,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { switch } => CliError::NoCredentials { switch },
            other => CliError::Config {
                source: other,
                default_path: switchboard_config::config_path().display().to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

/// The driver error under any supervisor context.
fn root(err: &CoreError) -> &CoreError {
    match err {
        CoreError::OperationFailed { source, .. } => root(source),
        other => other,
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        if err.is_unknown_outcome() {
            return CliError::UnknownOutcome { message };
        }
        if err.is_contention() {
            return CliError::Contention { message };
        }
        match root(&err) {
            CoreError::DeviceUnreachable { .. } => CliError::Connection { message },
            CoreError::Authentication { .. } => CliError::Auth { message },
            CoreError::NotFound { what } => CliError::NotFound { what: what.clone() },
            CoreError::Validation { .. } | CoreError::TemplateParameter { .. } => {
                CliError::Validation {
                    field: "input".into(),
                    reason: message,
                }
            }
            CoreError::Config { .. } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },
            _ => CliError::Device { message },
        }
    }
}
