//! Simulated leaf work.
//!
//! The binary does not manage real processes. Every leaf gets a hook for each
//! of its declared states that sleeps for `demo.work_ms` and fails for the
//! leaves listed in `demo.fail_nodes`.

use exectree_runtime::{DemoSettings, HookRegistry, PlannedNode};
use std::thread;

pub fn hooks(planned: &[PlannedNode], settings: &DemoSettings) -> HookRegistry {
    let mut hooks = HookRegistry::new();

    for node in planned.iter().filter(|n| n.children.is_empty()) {
        let fails = settings.fail_nodes.iter().any(|f| *f == node.name);
        for state in node.config.declared.states.iter().flatten() {
            let name = node.name.clone();
            let state_name = state.to_string();
            let work = settings.work();
            hooks.on_enter(&node.name, state.as_str(), move || {
                tracing::info!("{} working towards '{}'", name, state_name);
                thread::sleep(work);
                if fails {
                    return Err(format!("simulated failure entering '{}'", state_name).into());
                }
                Ok(())
            });
        }
    }

    hooks
}
