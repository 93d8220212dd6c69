//! Core error types.

use thiserror::Error;

/// Errors raised while resolving a node's FSM configuration.
///
/// All of these are fatal at tree construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("node '{node}' declares no FSM and has no parent to inherit from")]
    MissingConfig { node: String },

    #[error("node '{node}' resolves to an empty state set")]
    EmptyStates { node: String },

    #[error("node '{node}': transition '{trigger}' references unknown state '{state}'")]
    UnknownState {
        node: String,
        trigger: String,
        state: String,
    },

    #[error("node '{node}': initial state '{state}' not in states list")]
    UnknownInitial { node: String, state: String },

    #[error("node '{node}': duplicate transition from '{state}' on trigger '{trigger}'")]
    DuplicateTransition {
        node: String,
        state: String,
        trigger: String,
    },

    #[error(
        "node '{node}': long transitions on '{trigger}' disagree on destination ('{first}' vs '{second}')"
    )]
    AmbiguousCompletion {
        node: String,
        trigger: String,
        first: String,
        second: String,
    },
}

/// Errors from the lifecycle model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no transition: cannot fire '{trigger}' in state '{state}'")]
    NoSuchTransition { state: String, trigger: String },

    #[error("invalid tree document: {reason}")]
    InvalidTree { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether this error aborts tree construction.
    ///
    /// `NoSuchTransition` only drops the offending command.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::NoSuchTransition { .. })
    }

    /// Returns a stable error code suitable for logs and status output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::NoSuchTransition { .. } => "NO_SUCH_TRANSITION",
            CoreError::InvalidTree { .. } => "INVALID_TREE",
            CoreError::Json(_) => "BAD_DOCUMENT",
        }
    }
}
