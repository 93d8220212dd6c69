//! Per-node command executor.
//!
//! Each node runs one worker thread that takes commands off its inbox and
//! executes them to completion, one at a time. A command is either a
//! transition fired on the node's machine or a custom command registered in
//! the [`HookRegistry`].

use crate::arena::{Arena, Mailbox, NodeId};
use crate::dispatcher::Dispatcher;
use crate::error::RuntimeError;
use crate::hooks::{self, HookFn, HookRegistry};
use crate::settings::{DispatchSettings, FailurePolicy};
use exectree_core::{completion_trigger, CompletionReport, StateMachine, Status, TransitionKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// A command queued on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub trigger: String,
    pub reply: Reply,
}

impl Command {
    pub fn new(trigger: impl Into<String>, reply: Reply) -> Self {
        Self {
            trigger: trigger.into(),
            reply,
        }
    }
}

/// Where the completion report of a command goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Issued by the parent's fan-out with the given correlation id.
    Parent { correlation: u64 },
    /// Issued from outside the tree.
    Controller,
}

impl Reply {
    pub fn correlation(&self) -> Option<u64> {
        match self {
            Reply::Parent { correlation } => Some(*correlation),
            Reply::Controller => None,
        }
    }
}

pub(crate) enum Message {
    Run(Command),
    Stop,
}

#[derive(Clone)]
enum Handler {
    Transition,
    Command(HookFn),
}

pub(crate) struct Worker {
    id: NodeId,
    arena: Arc<Arena>,
    hooks: Arc<HookRegistry>,
    settings: DispatchSettings,
    machine: StateMachine,
    mailbox: Mailbox,
    handlers: HashMap<String, Handler>,
    next_correlation: u64,
}

impl Worker {
    pub(crate) fn new(
        id: NodeId,
        arena: Arc<Arena>,
        hooks: Arc<HookRegistry>,
        settings: DispatchSettings,
        mailbox: Mailbox,
    ) -> Self {
        let node = arena.node(id);
        let machine = StateMachine::new(Arc::clone(&node.config));

        let mut handlers: HashMap<String, Handler> = node
            .config
            .transitions
            .iter()
            .map(|t| (t.trigger.clone(), Handler::Transition))
            .collect();
        for (name, f) in hooks.commands_for(&node.name) {
            handlers.insert(name.to_string(), Handler::Command(Arc::clone(f)));
        }

        Self {
            id,
            arena,
            hooks,
            settings,
            machine,
            mailbox,
            handlers,
            next_correlation: 0,
        }
    }

    fn name(&self) -> &str {
        &self.arena.node(self.id).name
    }

    fn run(mut self) {
        while let Ok(message) = self.mailbox.inbox.recv() {
            let command = match message {
                Message::Run(command) => command,
                Message::Stop => break,
            };

            tracing::info!("{} Ack: executing '{}'", self.name(), command.trigger);
            let started = Instant::now();
            self.arena
                .node(self.id)
                .update(|s| s.active = Some(command.trigger.clone()));

            let (status, payload) = match self.handlers.get(&command.trigger).cloned() {
                Some(Handler::Transition) => self.run_transition(&command.trigger),
                Some(Handler::Command(f)) => (self.run_command(&command.trigger, &f), None),
                None => {
                    let err = RuntimeError::UnknownCommand {
                        node: self.name().to_string(),
                        command: command.trigger.clone(),
                    };
                    tracing::error!("{}", err);
                    (Status::failed(self.name(), err.to_string()), None)
                }
            };

            self.arena.node(self.id).update(|s| s.active = None);

            let report = payload.unwrap_or_else(|| {
                CompletionReport::new(
                    self.name(),
                    command.trigger.as_str(),
                    self.machine.current().clone(),
                    status,
                )
            });
            let mut report = report.with_correlation(command.reply.correlation());
            report.elapsed_ms = started.elapsed().as_millis() as u64;

            tracing::info!("{} Finished: {}", self.name(), report);
            post_report(&self.arena, self.id, &command.reply, report);
        }

        tracing::debug!("{} worker stopped", self.name());
    }

    /// Fires `trigger`. A completed long transition also returns the report
    /// its `end_*` edge carried.
    fn run_transition(&mut self, trigger: &str) -> (Status, Option<CompletionReport>) {
        let node = self.arena.node(self.id);
        let mut dispatcher = Dispatcher::new(
            self.id,
            &self.arena,
            &self.hooks,
            &self.settings,
            &self.mailbox.completions,
            &mut self.next_correlation,
        );

        let fired = match self.machine.fire(trigger, None, &mut dispatcher) {
            Ok(fired) => fired,
            Err(e) => {
                tracing::warn!("{} ignoring '{}' [{}]: {}", node.name, trigger, e.error_code(), e);
                return (Status::failed(&node.name, e.to_string()), None);
            }
        };
        let status = dispatcher.into_outcome().unwrap_or(Status::Success);

        match fired.kind {
            TransitionKind::Begin => {
                let complete = status.is_success()
                    || self.settings.failure_policy == FailurePolicy::Complete;
                if !complete {
                    tracing::warn!(
                        "{} holding in '{}' after '{}': {}",
                        node.name,
                        self.machine.current(),
                        trigger,
                        status
                    );
                    return (status, None);
                }

                let end = completion_trigger(trigger);
                let final_state = self
                    .machine
                    .config()
                    .get_transition(self.machine.current(), &end)
                    .map_or_else(|| self.machine.current().clone(), |t| t.dest.clone());
                let report =
                    CompletionReport::new(node.name.as_str(), trigger, final_state, status.clone());
                let mut completion = Dispatcher::new(
                    self.id,
                    &self.arena,
                    &self.hooks,
                    &self.settings,
                    &self.mailbox.completions,
                    &mut self.next_correlation,
                );
                if let Err(e) = self.machine.fire(&end, Some(&report), &mut completion) {
                    tracing::error!("{} failed to complete '{}': {}", node.name, trigger, e);
                    return (Status::failed(&node.name, e.to_string()), None);
                }
                return (status, Some(report));
            }
            TransitionKind::Direct => {
                if status.is_success() {
                    node.update(|s| s.last_command = Some(fired.command.clone()));
                }
            }
            TransitionKind::End => {}
        }

        (status, None)
    }

    fn run_command(&self, name: &str, f: &HookFn) -> Status {
        match hooks::invoke(f) {
            Ok(()) => Status::Success,
            Err(reason) => {
                tracing::warn!("{} command '{}' failed: {}", self.name(), name, reason);
                Status::failed(self.name(), reason)
            }
        }
    }
}

fn post_report(arena: &Arena, id: NodeId, reply: &Reply, report: CompletionReport) {
    let sink = arena.reply_sink(id, reply);
    if !sink.post(report) {
        tracing::debug!("{} report dropped, receiver gone", arena.node(id).name);
    }
}

/// Handle to a spawned worker.
pub(crate) struct Executor {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Executor {
    pub(crate) fn spawn(worker: Worker) -> Result<Self, RuntimeError> {
        let name = worker.name().to_string();
        let handle = std::thread::Builder::new()
            .name(format!("exectree-{}", name))
            .spawn(move || worker.run())
            .map_err(|source| RuntimeError::Spawn {
                node: name.clone(),
                source,
            })?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    /// Waits for the worker to exit. The stop sentinel must already be queued.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} worker panicked", self.name);
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}
