//! Runtime error types.

use crate::settings::SettingsError;
use exectree_core::{ConfigError, CoreError};
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("unknown node: {name}")]
    UnknownNode { name: String },

    #[error("duplicate node name: {name}")]
    DuplicateNode { name: String },

    #[error("node '{node}' has no handler for command '{command}'")]
    UnknownCommand { node: String, command: String },

    #[error("node '{node}' already handles '{command}' as a transition")]
    DuplicateCommand { node: String, command: String },

    #[error("structural error: internal node '{node}' has no included children")]
    Structural { node: String },

    #[error("node '{node}' is stopped")]
    Stopped { node: String },

    #[error("failed to spawn worker for '{node}': {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns whether this error indicates a broken tree rather than a
    /// command that was simply refused.
    pub fn is_fatal(&self) -> bool {
        match self {
            RuntimeError::Core(e) => e.is_fatal(),
            RuntimeError::Stopped { .. } => false,
            _ => true,
        }
    }
}
