//! Entry hooks installed on every node's machine.
//!
//! Entering a state on a leaf runs the registered domain hook. Entering a
//! state on an internal node fans the trigger out to the included children
//! and blocks on the node's completion channel until every child reported
//! or the deadline passed.

use crate::arena::{Arena, NodeId};
use crate::completion::{CompletionReceiver, PendingSet};
use crate::error::RuntimeError;
use crate::executor::{Command, Reply};
use crate::hooks::{self, HookRegistry};
use crate::settings::DispatchSettings;
use exectree_core::{completion_trigger, Event, Failure, State, StateHooks, Status, TransitionKind};
use std::time::Instant;

pub(crate) struct Dispatcher<'a> {
    id: NodeId,
    arena: &'a Arena,
    hooks: &'a HookRegistry,
    settings: &'a DispatchSettings,
    completions: &'a CompletionReceiver,
    next_correlation: &'a mut u64,
    outcome: Option<Status>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        id: NodeId,
        arena: &'a Arena,
        hooks: &'a HookRegistry,
        settings: &'a DispatchSettings,
        completions: &'a CompletionReceiver,
        next_correlation: &'a mut u64,
    ) -> Self {
        Self {
            id,
            arena,
            hooks,
            settings,
            completions,
            next_correlation,
            outcome: None,
        }
    }

    /// Aggregated status of the work done on entry, if any ran.
    pub(crate) fn into_outcome(self) -> Option<Status> {
        self.outcome
    }

    fn run_leaf(&self, state: &State, event: &Event<'_>) -> Status {
        let node = self.arena.node(self.id);

        // A long transition's in-progress state falls back to the hook of
        // the state it completes into.
        let hook = self.hooks.leaf_hook(&node.name, state).or_else(|| {
            if event.kind != TransitionKind::Begin {
                return None;
            }
            let end = completion_trigger(event.command);
            node.config
                .get_transition(state, &end)
                .and_then(|t| self.hooks.leaf_hook(&node.name, &t.dest))
        });

        let Some(hook) = hook else {
            tracing::debug!("{} has no hook for '{}'", node.name, state);
            return Status::Success;
        };

        match hooks::invoke(&hook) {
            Ok(()) => Status::Success,
            Err(reason) => {
                tracing::warn!("{} hook for '{}' failed: {}", node.name, state, reason);
                Status::failed(node.name.as_str(), reason)
            }
        }
    }

    fn fan_out(&mut self, trigger: &str) -> Status {
        let node = self.arena.node(self.id);
        let children = self.arena.included_children(self.id);
        if children.is_empty() {
            let err = RuntimeError::Structural {
                node: node.name.clone(),
            };
            tracing::error!("{}", err);
            return Status::failed(node.name.as_str(), err.to_string());
        }

        let stale = self.completions.drain();
        if !stale.is_empty() {
            tracing::debug!("{} discarded {} stale report(s)", node.name, stale.len());
        }

        *self.next_correlation += 1;
        let correlation = *self.next_correlation;

        let mut pending = PendingSet::new();
        let mut failures = Vec::new();
        let mut timed_out = Vec::new();

        for child in children {
            let cell = self.arena.node(child);
            match cell.enqueue(Command::new(trigger, Reply::Parent { correlation })) {
                Ok(()) => pending.insert(cell.name.as_str()),
                Err(e) => {
                    tracing::warn!("{} could not send '{}' to {}: {}", node.name, trigger, cell.name, e);
                    failures.push(Failure {
                        node: cell.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "{} fanned out '{}' to {} child(ren)",
            node.name,
            trigger,
            pending.len()
        );

        let deadline = Instant::now() + self.settings.timeout();
        while !pending.is_empty() {
            let Some(report) = self.completions.recv_deadline(deadline) else {
                break;
            };
            if report.correlation != Some(correlation) || !pending.resolve(&report.node) {
                tracing::debug!(
                    "{} discarded stale report from {} for '{}'",
                    node.name,
                    report.node,
                    report.trigger
                );
                continue;
            }

            tracing::debug!("{} got report: {}", node.name, report);
            match report.status {
                Status::Success => {}
                Status::Failed {
                    failures: child_failures,
                    pending: child_pending,
                } => {
                    failures.extend(child_failures);
                    timed_out.extend(child_pending);
                }
                Status::Timeout {
                    pending: child_pending,
                } => timed_out.extend(child_pending),
            }
        }

        let expired = pending.expire();
        if !expired.is_empty() {
            tracing::warn!(
                "{} timed out waiting for '{}' from: {}",
                node.name,
                trigger,
                expired.join(", ")
            );
            timed_out.extend(expired);
        }

        if !failures.is_empty() {
            Status::Failed {
                failures,
                pending: timed_out,
            }
        } else if !timed_out.is_empty() {
            Status::Timeout { pending: timed_out }
        } else {
            Status::Success
        }
    }
}

impl StateHooks for Dispatcher<'_> {
    fn on_exit(&mut self, state: &State, event: &Event<'_>) {
        tracing::debug!(
            "{} leaving '{}' on '{}'",
            self.arena.node(self.id).name,
            state,
            event.trigger
        );
    }

    fn on_enter(&mut self, state: &State, event: &Event<'_>) {
        let node = self.arena.node(self.id);
        node.update(|s| {
            s.state = state.clone();
            if event.kind == TransitionKind::End && event.payload.map_or(true, |r| r.is_success()) {
                s.last_command = Some(event.command.to_string());
            }
        });

        if event.kind == TransitionKind::End {
            return;
        }

        let status = if node.is_leaf() {
            self.run_leaf(state, event)
        } else {
            self.fan_out(event.trigger)
        };
        self.outcome = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::tests::test_arena;
    use exectree_core::{CompletionReport, StateMachine};
    use std::sync::Arc;
    use std::time::Duration;

    fn tree() -> serde_json::Value {
        serde_json::json!({
            "root": {
                "states": ["none", "booted"],
                "transitions": [{"trigger": "boot", "source": "none", "dest": "booted"}],
                "children": {"a": "leaf", "b": "leaf"}
            }
        })
    }

    fn settings() -> DispatchSettings {
        DispatchSettings::default().with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_leaf_hook_success_and_failure() {
        let (arena, mailboxes, _) = test_arena(tree());
        let mut hooks = HookRegistry::new();
        hooks.on_enter("b", "booted", || Err("boom".into()));
        let settings = settings();

        for (name, expect_ok) in [("a", true), ("b", false)] {
            let id = arena.lookup(name).unwrap();
            let mut correlation = 0;
            let mut machine = StateMachine::new(Arc::clone(&arena.node(id).config));
            let mut dispatcher = Dispatcher::new(
                id,
                &arena,
                &hooks,
                &settings,
                &mailboxes[id.index()].completions,
                &mut correlation,
            );
            machine.fire("boot", None, &mut dispatcher).unwrap();
            let status = dispatcher.into_outcome().unwrap();
            assert_eq!(status.is_success(), expect_ok);
            assert_eq!(arena.node(id).state().as_str(), "booted");
        }
    }

    #[test]
    fn test_fan_out_without_workers_times_out() {
        let (arena, mailboxes, _) = test_arena(tree());
        let hooks = HookRegistry::new();
        let settings = settings();
        let root = arena.root();

        let mut correlation = 0;
        let mut machine = StateMachine::new(Arc::clone(&arena.node(root).config));
        let mut dispatcher = Dispatcher::new(
            root,
            &arena,
            &hooks,
            &settings,
            &mailboxes[0].completions,
            &mut correlation,
        );
        machine.fire("boot", None, &mut dispatcher).unwrap();

        let status = dispatcher.into_outcome().unwrap();
        assert_eq!(status, Status::Timeout {
            pending: vec!["a".to_string(), "b".to_string()],
        });
        assert_eq!(correlation, 1);

        // Both children got the command with the fan-out's correlation.
        for name in ["a", "b"] {
            let id = arena.lookup(name).unwrap();
            assert_eq!(mailboxes[id.index()].inbox.len(), 1);
        }
    }

    #[test]
    fn test_fan_out_discards_stale_reports() {
        let (arena, mailboxes, _) = test_arena(tree());
        let hooks = HookRegistry::new();
        let settings = settings();
        let root = arena.root();
        let a = arena.lookup("a").unwrap();

        // A late report from an earlier round, already queued.
        let late = CompletionReport::new("a", "boot", "booted", Status::failed("a", "late"))
            .with_correlation(Some(99));
        arena
            .reply_sink(a, &Reply::Parent { correlation: 99 })
            .post(late);

        let mut correlation = 0;
        let mut machine = StateMachine::new(Arc::clone(&arena.node(root).config));
        let mut dispatcher = Dispatcher::new(
            root,
            &arena,
            &hooks,
            &settings,
            &mailboxes[0].completions,
            &mut correlation,
        );
        machine.fire("boot", None, &mut dispatcher).unwrap();

        let status = dispatcher.into_outcome().unwrap();
        assert!(status.is_timeout());
        assert!(status.failed_nodes().is_empty());
    }

    #[test]
    fn test_structural_error_is_reported() {
        let (arena, mailboxes, _) = test_arena(tree());
        for name in ["a", "b"] {
            arena.node(arena.lookup(name).unwrap()).set_included(false);
        }
        let hooks = HookRegistry::new();
        let settings = settings();
        let root = arena.root();

        let mut correlation = 0;
        let mut machine = StateMachine::new(Arc::clone(&arena.node(root).config));
        let mut dispatcher = Dispatcher::new(
            root,
            &arena,
            &hooks,
            &settings,
            &mailboxes[0].completions,
            &mut correlation,
        );
        machine.fire("boot", None, &mut dispatcher).unwrap();

        let status = dispatcher.into_outcome().unwrap();
        assert_eq!(status.failed_nodes(), vec!["root"]);
        assert_eq!(correlation, 0);
    }
}
