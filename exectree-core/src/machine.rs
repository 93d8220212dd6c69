//! Per-node state machine.
//!
//! The machine only mutates its current state and calls hooks around the
//! change. Propagation to children lives in the hooks.

use crate::definition::State;
use crate::error::CoreError;
use crate::report::CompletionReport;
use crate::resolver::{FsmConfig, TransitionKind};
use std::collections::HashMap;
use std::sync::Arc;

/// A transition being applied, as seen by hooks.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub trigger: &'a str,
    /// Declared trigger the edge belongs to.
    pub command: &'a str,
    pub source: &'a State,
    pub dest: &'a State,
    pub kind: TransitionKind,
    /// Report carried by `end_*` triggers.
    pub payload: Option<&'a CompletionReport>,
}

/// Entry/exit hooks invoked by [`StateMachine::fire`].
pub trait StateHooks {
    fn on_exit(&mut self, _state: &State, _event: &Event<'_>) {}

    fn on_enter(&mut self, _state: &State, _event: &Event<'_>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl StateHooks for NoHooks {}

/// Outcome of a successful `fire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub trigger: String,
    pub command: String,
    pub source: State,
    pub dest: State,
    pub kind: TransitionKind,
}

/// A node's state machine.
#[derive(Debug)]
pub struct StateMachine {
    config: Arc<FsmConfig>,
    current: State,
    /// (source, trigger) -> index into `config.transitions`.
    index: HashMap<(State, String), usize>,
}

impl StateMachine {
    /// Creates a machine in the config's initial state.
    pub fn new(config: Arc<FsmConfig>) -> Self {
        let index = config
            .transitions
            .iter()
            .enumerate()
            .map(|(i, t)| ((t.source.clone(), t.trigger.clone()), i))
            .collect();
        Self {
            current: config.initial.clone(),
            config,
            index,
        }
    }

    pub fn config(&self) -> &Arc<FsmConfig> {
        &self.config
    }

    pub fn current(&self) -> &State {
        &self.current
    }

    /// Returns true if `trigger` has an edge from the current state.
    pub fn can_fire(&self, trigger: &str) -> bool {
        self.index
            .contains_key(&(self.current.clone(), trigger.to_string()))
    }

    /// Triggers that can fire from `state`.
    pub fn triggers_from(&self, state: &State) -> Vec<&str> {
        self.config
            .transitions_from(state)
            .into_iter()
            .map(|t| t.trigger.as_str())
            .collect()
    }

    /// Applies `trigger` from the current state.
    ///
    /// Fails with [`CoreError::NoSuchTransition`] when no edge leaves the
    /// current state on `trigger`; the state is left untouched.
    pub fn fire<H>(
        &mut self,
        trigger: &str,
        payload: Option<&CompletionReport>,
        hooks: &mut H,
    ) -> Result<Fired, CoreError>
    where
        H: StateHooks + ?Sized,
    {
        let idx = *self
            .index
            .get(&(self.current.clone(), trigger.to_string()))
            .ok_or_else(|| CoreError::NoSuchTransition {
                state: self.current.0.clone(),
                trigger: trigger.to_string(),
            })?;

        let config = Arc::clone(&self.config);
        let t = &config.transitions[idx];
        let event = Event {
            trigger: &t.trigger,
            command: &t.command,
            source: &t.source,
            dest: &t.dest,
            kind: t.kind,
            payload,
        };

        hooks.on_exit(&self.current, &event);
        self.current = t.dest.clone();
        hooks.on_enter(&self.current, &event);

        Ok(Fired {
            trigger: t.trigger.clone(),
            command: t.command.clone(),
            source: t.source.clone(),
            dest: t.dest.clone(),
            kind: t.kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FsmFragment, TransitionDecl};
    use crate::report::Status;
    use crate::resolver::resolve;

    fn machine() -> StateMachine {
        let own = FsmFragment {
            states: Some(vec!["idle".into(), "booted".into(), "running".into()]),
            transitions: Some(vec![
                TransitionDecl::new("boot", "idle", "booted").long(),
                TransitionDecl::new("start", "booted", "running"),
            ]),
            ..Default::default()
        };
        StateMachine::new(Arc::new(resolve("n", &own, None).unwrap()))
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        payloads: usize,
    }

    impl StateHooks for Recorder {
        fn on_exit(&mut self, state: &State, event: &Event<'_>) {
            self.calls.push(format!("exit {} ({})", state, event.trigger));
        }

        fn on_enter(&mut self, state: &State, event: &Event<'_>) {
            if event.payload.is_some() {
                self.payloads += 1;
            }
            self.calls.push(format!("enter {} ({})", state, event.trigger));
        }
    }

    #[test]
    fn test_starts_in_initial_state() {
        let m = machine();
        assert_eq!(m.current().as_str(), "idle");
        assert!(m.can_fire("boot"));
        assert!(!m.can_fire("start"));
    }

    #[test]
    fn test_fire_runs_hooks_in_order() {
        let mut m = machine();
        let mut hooks = Recorder::default();

        let fired = m.fire("boot", None, &mut hooks).unwrap();
        assert_eq!(fired.kind, TransitionKind::Begin);
        assert_eq!(m.current().as_str(), "boot-in-progress");
        assert_eq!(
            hooks.calls,
            vec!["exit idle (boot)", "enter boot-in-progress (boot)"]
        );

        let report = CompletionReport::new("n", "boot", "boot-in-progress", Status::Success);
        let fired = m.fire("end_boot", Some(&report), &mut hooks).unwrap();
        assert_eq!(fired.kind, TransitionKind::End);
        assert_eq!(fired.command, "boot");
        assert_eq!(m.current().as_str(), "booted");
        assert_eq!(hooks.payloads, 1);
    }

    #[test]
    fn test_no_such_transition_leaves_state() {
        let mut m = machine();
        let result = m.fire("start", None, &mut NoHooks);
        assert!(matches!(result, Err(CoreError::NoSuchTransition { .. })));
        assert_eq!(m.current().as_str(), "idle");

        // The literal long edge does not exist either.
        m.fire("boot", None, &mut NoHooks).unwrap();
        let result = m.fire("boot", None, &mut NoHooks);
        assert!(matches!(result, Err(CoreError::NoSuchTransition { .. })));
    }

    #[test]
    fn test_triggers_from() {
        let m = machine();
        assert_eq!(m.triggers_from(&State::from("booted")), vec!["start"]);
        assert_eq!(
            m.triggers_from(&State::from("boot-in-progress")),
            vec!["end_boot"]
        );
    }
}
