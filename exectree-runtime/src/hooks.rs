//! Domain hooks injected into the tree.
//!
//! Leaf hooks are zero-argument callbacks run synchronously when a leaf enters
//! the state they are registered for. Returning `Ok` means the work is done;
//! returning an error or panicking is reported as a failure of that leaf.

use exectree_core::State;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Error returned by a hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a hook.
pub type HookResult = Result<(), HookError>;

/// A registered callback.
pub type HookFn = Arc<dyn Fn() -> HookResult + Send + Sync>;

/// Hooks and custom commands, keyed by node name.
#[derive(Clone, Default)]
pub struct HookRegistry {
    on_enter: HashMap<(String, State), HookFn>,
    any_leaf: HashMap<State, HookFn>,
    commands: HashMap<(String, String), HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` when leaf `node` enters `state`.
    pub fn on_enter<F>(&mut self, node: &str, state: &str, f: F) -> &mut Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.on_enter
            .insert((node.to_string(), State::from(state)), Arc::new(f));
        self
    }

    /// Runs `f` when any leaf without a specific hook enters `state`.
    pub fn on_enter_any_leaf<F>(&mut self, state: &str, f: F) -> &mut Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.any_leaf.insert(State::from(state), Arc::new(f));
        self
    }

    /// Registers a custom command `name` on `node`, executed by its worker.
    pub fn command<F>(&mut self, node: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.commands
            .insert((node.to_string(), name.to_string()), Arc::new(f));
        self
    }

    /// Hook for `node` entering `state`, falling back to the any-leaf hook.
    pub fn leaf_hook(&self, node: &str, state: &State) -> Option<HookFn> {
        self.on_enter
            .get(&(node.to_string(), state.clone()))
            .or_else(|| self.any_leaf.get(state))
            .cloned()
    }

    /// Custom commands registered on `node`.
    pub fn commands_for<'a>(&'a self, node: &'a str) -> impl Iterator<Item = (&'a str, &'a HookFn)> {
        self.commands
            .iter()
            .filter(move |((n, _), _)| n == node)
            .map(|((_, name), f)| (name.as_str(), f))
    }

    /// Names of all nodes referenced by node-specific registrations.
    pub fn referenced_nodes(&self) -> impl Iterator<Item = &str> {
        self.on_enter
            .keys()
            .map(|(n, _)| n.as_str())
            .chain(self.commands.keys().map(|(n, _)| n.as_str()))
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_enter", &self.on_enter.keys().collect::<Vec<_>>())
            .field("any_leaf", &self.any_leaf.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runs a hook, turning errors and panics into a reason string.
pub(crate) fn invoke(hook: &HookFn) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("hook panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_hook_wins_over_any_leaf() {
        let mut hooks = HookRegistry::new();
        hooks
            .on_enter("wib1", "booted", || Err("specific".into()))
            .on_enter_any_leaf("booted", || Ok(()));

        let specific = hooks.leaf_hook("wib1", &State::from("booted")).unwrap();
        assert_eq!(invoke(&specific), Err("specific".to_string()));

        let fallback = hooks.leaf_hook("wib2", &State::from("booted")).unwrap();
        assert_eq!(invoke(&fallback), Ok(()));

        assert!(hooks.leaf_hook("wib1", &State::from("none")).is_none());
    }

    #[test]
    fn test_invoke_catches_panics() {
        let hook: HookFn = Arc::new(|| -> HookResult { panic!("exploded") });
        let result = invoke(&hook);
        assert_eq!(result, Err("hook panicked: exploded".to_string()));
    }

    #[test]
    fn test_commands_for_node() {
        let mut hooks = HookRegistry::new();
        hooks
            .command("wib1", "dump", || Ok(()))
            .command("wib2", "dump", || Ok(()));

        let names: Vec<&str> = hooks.commands_for("wib1").map(|(n, _)| n).collect();
        assert_eq!(names, vec!["dump"]);

        let mut nodes: Vec<&str> = hooks.referenced_nodes().collect();
        nodes.sort();
        assert_eq!(nodes, vec!["wib1", "wib2"]);
    }
}
