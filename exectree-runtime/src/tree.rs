//! A running control tree.

use crate::arena::{Arena, NodeSnapshot};
use crate::completion::CompletionReceiver;
use crate::consistency;
use crate::error::RuntimeError;
use crate::executor::{Command, Executor, Reply};
use exectree_core::{CompletionReport, FsmConfig, ResolvedTransition, State};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One row of [`Tree::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub depth: usize,
    pub state: State,
    pub last_command: Option<String>,
    pub active: Option<String>,
    pub consistent: bool,
    pub included: bool,
    pub leaf: bool,
}

/// Handle to a tree of running nodes.
///
/// Commands are queued without waiting. Reports for commands issued through
/// this handle are read with [`Tree::next_report`].
pub struct Tree {
    arena: Arc<Arena>,
    executors: Mutex<Vec<Executor>>,
    reports: CompletionReceiver,
}

impl Tree {
    pub(crate) fn new(
        arena: Arc<Arena>,
        executors: Vec<Executor>,
        reports: CompletionReceiver,
    ) -> Self {
        Self {
            arena,
            executors: Mutex::new(executors),
            reports,
        }
    }

    /// Name of the root node.
    pub fn root(&self) -> &str {
        &self.arena.node(self.arena.root()).name
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Queues `trigger` on the root.
    pub fn send(&self, trigger: &str) -> Result<(), RuntimeError> {
        self.arena
            .node(self.arena.root())
            .enqueue(Command::new(trigger, Reply::Controller))
    }

    /// Queues `trigger` on `node`.
    pub fn enqueue(&self, node: &str, trigger: &str) -> Result<(), RuntimeError> {
        let id = self.arena.lookup(node)?;
        self.arena
            .node(id)
            .enqueue(Command::new(trigger, Reply::Controller))
    }

    /// Waits up to `timeout` for the next report of a command issued through
    /// this handle.
    pub fn next_report(&self, timeout: Duration) -> Option<CompletionReport> {
        self.reports.recv_deadline(Instant::now() + timeout)
    }

    pub fn state(&self, node: &str) -> Result<State, RuntimeError> {
        let id = self.arena.lookup(node)?;
        Ok(self.arena.node(id).state())
    }

    pub fn last_command(&self, node: &str) -> Result<Option<String>, RuntimeError> {
        Ok(self.snapshot(node)?.last_command)
    }

    pub fn snapshot(&self, node: &str) -> Result<NodeSnapshot, RuntimeError> {
        let id = self.arena.lookup(node)?;
        Ok(self.arena.node(id).snapshot())
    }

    pub fn is_consistent(&self, node: &str) -> Result<bool, RuntimeError> {
        let id = self.arena.lookup(node)?;
        Ok(consistency::is_consistent(&self.arena, id))
    }

    pub fn config(&self, node: &str) -> Result<Arc<FsmConfig>, RuntimeError> {
        let id = self.arena.lookup(node)?;
        Ok(Arc::clone(&self.arena.node(id).config))
    }

    /// Resolved transition table of `node`.
    pub fn transitions(&self, node: &str) -> Result<&[ResolvedTransition], RuntimeError> {
        let id = self.arena.lookup(node)?;
        Ok(&self.arena.node(id).config.transitions)
    }

    /// Includes or excludes `node` from its parent's future fan-outs.
    pub fn set_included(&self, node: &str, included: bool) -> Result<(), RuntimeError> {
        let id = self.arena.lookup(node)?;
        self.arena.node(id).set_included(included);
        tracing::info!(
            "{} {}",
            node,
            if included { "included" } else { "excluded" }
        );
        Ok(())
    }

    /// Every node in preorder.
    pub fn status(&self) -> Vec<NodeStatus> {
        self.arena
            .ids()
            .map(|id| {
                let node = self.arena.node(id);
                let snapshot = node.snapshot();
                NodeStatus {
                    name: node.name.clone(),
                    depth: node.depth,
                    state: snapshot.state,
                    last_command: snapshot.last_command,
                    active: snapshot.active,
                    consistent: consistency::is_consistent(&self.arena, id),
                    included: node.is_included(),
                    leaf: node.is_leaf(),
                }
            })
            .collect()
    }

    /// Stops every worker and waits for them to exit.
    ///
    /// All nodes are told to stop top-down, then joined bottom-up. Commands
    /// already queued ahead of the stop still run. Calling this again does
    /// nothing.
    pub fn shutdown(&self) {
        let mut executors = std::mem::take(&mut *self.executors.lock());
        if executors.is_empty() {
            return;
        }

        tracing::info!("Stopping tree '{}'", self.root());
        for id in self.arena.ids() {
            self.arena.node(id).signal_stop();
        }
        for executor in executors.iter_mut().rev() {
            executor.join();
        }
        tracing::info!("Tree '{}' stopped", self.root());
    }

    /// Number of workers still running and not yet handed to [`Tree::shutdown`].
    pub fn running_workers(&self) -> usize {
        self.executors
            .lock()
            .iter()
            .filter(|e| e.is_running())
            .count()
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.shutdown();
    }
}
