//! # Error Handling
//!
//! Error taxonomy for the contrast pipeline. The variants map onto how an
//! error must be handled, not just where it came from:
//!
//! - `Input` / `Config`: caller errors: fail fast, never truncate or
//!   zero-fill, never trigger a backend fallback.
//! - `BackendInit`: one backend could not come up; logged, the next one in
//!   priority order is tried, and initialization as a whole still succeeds.
//! - `BackendExec`: one pipeline call failed on one backend. Transient
//!   failures fall through to the next backend for that call only; fatal
//!   (resource-exhaustion) failures permanently retire the backend.
//! - `Resource`: an allocation the pipeline cannot work without failed.
//! - `State`: an operation was attempted against a component in the wrong
//!   lifecycle state (e.g. running a pipeline before `initialize`).

use std::fmt;

use relume_field::esdt::FieldError;
use relume_field::presets::ConfigError;

/// Error severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable inside the current call (a fallback exists).
    Warning,
    /// The current call fails but the system stays healthy.
    Error,
    /// A component is permanently degraded or disabled.
    Fatal,
}

#[derive(Debug)]
pub enum RelumeError {
    /// Malformed caller input (dimension/buffer-length mismatches).
    Input { field: String, reason: String },
    /// Configuration validation failure.
    Config {
        field: String,
        value: String,
        reason: String,
    },
    /// A backend failed to initialize.
    BackendInit {
        backend: &'static str,
        reason: String,
    },
    /// A backend failed while executing a pipeline call.
    BackendExec {
        backend: &'static str,
        reason: String,
        fatal: bool,
    },
    /// Resource allocation failure.
    Resource { resource: String, reason: String },
    /// Operation attempted in the wrong lifecycle state.
    State {
        current: &'static str,
        attempted: String,
    },
    /// I/O error (only surfaces from the CLI driver).
    Io {
        operation: String,
        source: std::io::Error,
    },
}

impl RelumeError {
    pub fn input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Input {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_init(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendInit {
            backend,
            reason: reason.into(),
        }
    }

    /// A per-call backend failure; the dispatcher will fall back.
    pub fn backend_exec(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendExec {
            backend,
            reason: reason.into(),
            fatal: false,
        }
    }

    /// A resource-exhaustion backend failure; the backend gets retired.
    pub fn backend_fatal(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendExec {
            backend,
            reason: reason.into(),
            fatal: true,
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn state(current: &'static str, attempted: impl Into<String>) -> Self {
        Self::State {
            current,
            attempted: attempted.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// True for errors the caller caused; these never trigger fallback.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Input { .. } | Self::Config { .. })
    }

    /// True when the failing backend must be permanently retired.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendExec { fatal: true, .. })
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::BackendInit { .. } => Severity::Warning,
            Self::BackendExec { fatal, .. } => {
                if *fatal {
                    Severity::Fatal
                } else {
                    Severity::Warning
                }
            }
            Self::Input { .. } | Self::Config { .. } | Self::State { .. } | Self::Io { .. } => {
                Severity::Error
            }
            Self::Resource { .. } => Severity::Fatal,
        }
    }
}

impl fmt::Display for RelumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input { field, reason } => {
                write!(f, "invalid input '{}': {}", field, reason)
            }
            Self::Config {
                field,
                value,
                reason,
            } => write!(
                f,
                "configuration error in '{}': {} (value: {})",
                field, reason, value
            ),
            Self::BackendInit { backend, reason } => {
                write!(f, "failed to initialize backend {}: {}", backend, reason)
            }
            Self::BackendExec {
                backend,
                reason,
                fatal,
            } => {
                if *fatal {
                    write!(f, "backend {} failed fatally: {}", backend, reason)
                } else {
                    write!(f, "backend {} failed: {}", backend, reason)
                }
            }
            Self::Resource { resource, reason } => {
                write!(f, "resource allocation failed for {}: {}", resource, reason)
            }
            Self::State { current, attempted } => write!(
                f,
                "invalid operation '{}' in state '{}'",
                attempted, current
            ),
            Self::Io { operation, source } => {
                write!(f, "I/O error during {}: {}", operation, source)
            }
        }
    }
}

impl std::error::Error for RelumeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FieldError> for RelumeError {
    fn from(error: FieldError) -> Self {
        Self::input("coverage grid", error.to_string())
    }
}

impl From<ConfigError> for RelumeError {
    fn from(error: ConfigError) -> Self {
        Self::Config {
            field: error.field.to_string(),
            value: error.value.to_string(),
            reason: error.reason.to_string(),
        }
    }
}

/// Result type alias using the pipeline error type.
pub type RelumeResult<T> = Result<T, RelumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(RelumeError::input("image", "short buffer").is_caller_error());
        assert!(!RelumeError::backend_exec("native-rayon", "boom").is_fatal());
        assert!(RelumeError::backend_fatal("native-rayon", "oom").is_fatal());
        assert_eq!(
            RelumeError::backend_init("accelerated-wgpu", "no adapter").severity(),
            Severity::Warning
        );
        assert_eq!(
            RelumeError::backend_fatal("native-rayon", "oom").severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn config_errors_convert() {
        let config = relume_field::ContrastConfig {
            max_distance: -1.0,
            ..Default::default()
        };
        let err: RelumeError = config.validate().unwrap_err().into();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("max_distance"));
    }
}
