//! # exectree-runtime
//!
//! Runtime for exectree control trees.
//!
//! This crate provides:
//! - A node arena with published state snapshots
//! - One command executor (inbox + worker thread) per node
//! - The fan-out / wait / aggregate protocol between parents and children
//! - Consistency and status queries
//! - Two-phase tree construction from declarations
//! - Runtime settings (YAML + environment)

pub mod arena;
pub mod builder;
pub mod completion;
mod consistency;
mod dispatcher;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod settings;
pub mod tree;

pub use arena::{NodeId, NodeSnapshot};
pub use builder::{PlannedNode, TreeBuilder};
pub use completion::{CompletionChannel, PendingSet};
pub use error::RuntimeError;
pub use executor::{Command, Reply};
pub use hooks::{HookError, HookFn, HookRegistry, HookResult};
pub use settings::{DemoSettings, DispatchSettings, FailurePolicy, Settings, SettingsError};
pub use tree::{NodeStatus, Tree};
