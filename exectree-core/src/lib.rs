//! # exectree-core
//!
//! Lifecycle model for exectree.
//!
//! This crate provides:
//! - Tree and FSM declaration parsing
//! - FSM resolution with inheritance and long-transition expansion
//! - The per-node state machine
//! - Completion reports exchanged between parent and child nodes

pub mod definition;
pub mod error;
pub mod machine;
pub mod report;
pub mod resolver;

pub use definition::{ChildDecl, FsmFragment, NodeDecl, State, TransitionConf, TransitionDecl, TreeDecl};
pub use error::{ConfigError, CoreError};
pub use machine::{Event, Fired, NoHooks, StateHooks, StateMachine};
pub use report::{CompletionReport, Failure, Status};
pub use resolver::{
    completion_trigger, in_progress_state, resolve, FsmConfig, ResolvedTransition, TransitionKind,
};
