//! Completion channels and pending sets.
//!
//! Every node owns one completion channel. Its children only write to it,
//! the node's own worker only reads from it.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use exectree_core::CompletionReport;
use std::collections::BTreeSet;
use std::time::Instant;

/// A node's completion inbox.
pub struct CompletionChannel {
    tx: Sender<CompletionReport>,
    rx: Receiver<CompletionReport>,
}

impl CompletionChannel {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub fn into_parts(self) -> (CompletionSender, CompletionReceiver) {
        (CompletionSender(self.tx), CompletionReceiver(self.rx))
    }
}

impl Default for CompletionChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side of a completion channel.
#[derive(Clone)]
pub struct CompletionSender(Sender<CompletionReport>);

impl CompletionSender {
    /// Posts a report. Returns false if the reader is gone.
    pub fn post(&self, report: CompletionReport) -> bool {
        self.0.send(report).is_ok()
    }
}

/// Read side of a completion channel.
pub struct CompletionReceiver(Receiver<CompletionReport>);

impl CompletionReceiver {
    /// Blocks until a report arrives or `deadline` passes.
    pub fn recv_deadline(&self, deadline: Instant) -> Option<CompletionReport> {
        match self.0.recv_deadline(deadline) {
            Ok(report) => Some(report),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discards everything currently queued, returning the dropped reports.
    pub fn drain(&self) -> Vec<CompletionReport> {
        self.0.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Children still owing a report for one fan-out.
#[derive(Debug, Default, Clone)]
pub struct PendingSet {
    waiting: BTreeSet<String>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, child: impl Into<String>) {
        self.waiting.insert(child.into());
    }

    /// Removes `child`. Returns false if it was not pending.
    pub fn resolve(&mut self, child: &str) -> bool {
        self.waiting.remove(child)
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Empties the set, returning the children that never reported.
    pub fn expire(&mut self) -> Vec<String> {
        std::mem::take(&mut self.waiting).into_iter().collect()
    }
}
