// ── Core error types ──
//
// The orchestration taxonomy. Drivers raise these without switch context;
// the supervisor wraps every failure leaving a driver in `OperationFailed`
// so callers always see which switch, operation and target were involved.
// The `From<switchboard_api::Error>` impl translates transport failures.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::model::Operation;

/// How a CLI device's error output was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceErrorClass {
    /// Configuration database held by another session. Retryable.
    LockedConfigDb,
    /// The port or VLAN is not in the state the command assumed.
    InvalidVlanState,
    /// Anything else the device reported that may clear on its own.
    Transient,
}

impl DeviceErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::LockedConfigDb | Self::Transient)
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    #[error("Template '{template}' cannot be rendered: parameter '{parameter}' is missing or empty (supplied: {params:?})")]
    TemplateParameter {
        template: String,
        parameter: String,
        params: BTreeMap<String, String>,
    },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Resource contention ──────────────────────────────────────────
    #[error("No session available for {switch} within {timeout_secs}s ({max_sessions} in use)")]
    SessionPoolExhausted {
        switch: String,
        max_sessions: usize,
        timeout_secs: u64,
    },

    #[error("Could not acquire one of {pool_size} lock slots for '{namespace}' within {timeout_secs}s")]
    LockAcquisitionTimeout {
        namespace: String,
        pool_size: usize,
        timeout_secs: u64,
    },

    #[error("Lease on lock slot '{key}' was lost mid-operation; final state unknown")]
    LockLeaseLost { key: String },

    #[error("Coordination backend error: {message}")]
    Coordination { message: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Transient device error: {message}")]
    TransientDevice { message: String },

    #[error("Device rejected commands ({class}): {output}")]
    CommandRejected {
        class: DeviceErrorClass,
        output: String,
    },

    #[error("Conflicting device state: {message}")]
    ConflictingState { message: String },

    #[error("Revision {revision} not applied after {attempts} polls; final state unknown")]
    RevisionApplyTimeout { revision: String, attempts: u32 },

    #[error("Lost track of revision {revision} after apply; final state unknown: {message}")]
    RevisionStateUnknown { revision: String, message: String },

    #[error("Device unreachable: {message}")]
    DeviceUnreachable { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("No free bridge among {capacity} identifiers")]
    BridgePoolExhausted { capacity: u32 },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Device error: {message}")]
    Device {
        message: String,
        status: Option<u16>,
    },

    // ── Context wrappers ─────────────────────────────────────────────
    #[error("{operation} on {switch} for {target} failed: {source}")]
    OperationFailed {
        switch: String,
        operation: Operation,
        target: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("{operation} failed on {} switch(es): {}", .failures.len(), SwitchList(.failures))]
    Aggregate {
        operation: Operation,
        failures: Vec<CoreError>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Worth retrying internally after a short delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientDevice { .. } => true,
            Self::CommandRejected { class, .. } => class.is_retryable(),
            Self::OperationFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Resource contention the caller may retry with backoff.
    pub fn is_contention(&self) -> bool {
        match self {
            Self::SessionPoolExhausted { .. } | Self::LockAcquisitionTimeout { .. } => true,
            Self::OperationFailed { source, .. } => source.is_contention(),
            _ => false,
        }
    }

    /// The change may or may not have taken effect on the device.
    pub fn is_unknown_outcome(&self) -> bool {
        match self {
            Self::RevisionApplyTimeout { .. }
            | Self::RevisionStateUnknown { .. }
            | Self::LockLeaseLost { .. } => true,
            Self::OperationFailed { source, .. } => source.is_unknown_outcome(),
            Self::Aggregate { failures, .. } => failures.iter().any(Self::is_unknown_outcome),
            _ => false,
        }
    }

    /// Switch name, when this error carries one.
    pub fn switch(&self) -> Option<&str> {
        match self {
            Self::OperationFailed { switch, .. } | Self::SessionPoolExhausted { switch, .. } => {
                Some(switch)
            }
            _ => None,
        }
    }
}

/// Renders the switch names of aggregated failures.
struct SwitchList<'a>(&'a [CoreError]);

impl fmt::Display for SwitchList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(err.switch().unwrap_or("<unknown>"))?;
        }
        Ok(())
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<switchboard_api::Error> for CoreError {
    fn from(err: switchboard_api::Error) -> Self {
        use switchboard_api::Error as Api;

        if err.is_forbidden() {
            return CoreError::ConflictingState {
                message: err.to_string(),
            };
        }

        match err {
            Api::Authentication { message } => CoreError::Authentication { message },
            Api::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                CoreError::DeviceUnreachable {
                    message: err.to_string(),
                }
            }
            Api::Timeout { .. } => CoreError::DeviceUnreachable {
                message: err.to_string(),
            },
            // A dropped control master is a reset connection: the pool
            // discards the session and the next attempt opens a fresh one.
            Api::Session { .. } => CoreError::TransientDevice {
                message: err.to_string(),
            },
            Api::Http { status, .. } if matches!(status, 502..=504) => {
                CoreError::TransientDevice {
                    message: err.to_string(),
                }
            }
            Api::Http { status, .. } => CoreError::Device {
                message: err.to_string(),
                status: Some(status),
            },
            Api::InvalidUrl(_) | Api::Tls(_) => CoreError::Config {
                message: err.to_string(),
            },
            other => CoreError::Device {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::Coordination {
            message: err.to_string(),
        }
    }
}
