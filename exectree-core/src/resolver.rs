//! FSM resolution.
//!
//! Turns a node's declared fragment, plus its parent's resolved config when the
//! node declares nothing, into the transition table installed on the node's
//! machine. Long transitions are expanded here:
//!
//! ```text
//! boot: none -> booted (long)
//!
//!   boot:     none             -> boot-in-progress
//!   end_boot: boot-in-progress -> booted
//! ```

use crate::definition::{FsmFragment, State, TransitionConf, TransitionDecl};
use crate::error::ConfigError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Suffix of the state entered by a long transition.
pub const IN_PROGRESS_SUFFIX: &str = "-in-progress";

/// Prefix of the trigger completing a long transition.
pub const COMPLETION_PREFIX: &str = "end_";

/// Returns the in-progress state of a long transition.
pub fn in_progress_state(trigger: &str) -> State {
    State(format!("{}{}", trigger, IN_PROGRESS_SUFFIX))
}

/// Returns the completion trigger of a long transition.
pub fn completion_trigger(trigger: &str) -> String {
    format!("{}{}", COMPLETION_PREFIX, trigger)
}

/// Role of an edge in the resolved table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// `t: source -> dest`, completed inside the entry hook.
    Direct,
    /// `t: source -> t-in-progress`.
    Begin,
    /// `end_t: t-in-progress -> dest`.
    End,
}

/// An edge installed on a live machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResolvedTransition {
    pub trigger: String,
    pub source: State,
    pub dest: State,
    pub kind: TransitionKind,
    /// The declared trigger this edge belongs to (`boot` for `end_boot`).
    pub command: String,
}

/// Fully resolved FSM configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmConfig {
    pub node: String,

    /// States in declaration order, in-progress states appended.
    pub states: Vec<State>,

    pub initial: State,

    pub transitions: Vec<ResolvedTransition>,

    pub included: bool,

    /// Effective declaration before expansion; children without their own
    /// FSM inherit this.
    pub declared: FsmFragment,

    /// Checksum of the resolved tables.
    pub checksum: String,
}

impl FsmConfig {
    /// Returns true if the given state is valid for this node.
    pub fn has_state(&self, state: &State) -> bool {
        self.states.contains(state)
    }

    /// Looks up the edge leaving `state` on `trigger`.
    pub fn get_transition(&self, state: &State, trigger: &str) -> Option<&ResolvedTransition> {
        self.transitions
            .iter()
            .find(|t| t.source == *state && t.trigger == trigger)
    }

    /// Edges leaving `state`.
    pub fn transitions_from(&self, state: &State) -> Vec<&ResolvedTransition> {
        self.transitions
            .iter()
            .filter(|t| t.source == *state)
            .collect()
    }

    /// Returns true if some edge of the table fires on `trigger`.
    pub fn knows_trigger(&self, trigger: &str) -> bool {
        self.transitions.iter().any(|t| t.trigger == trigger)
    }

    /// Triggers that start a command (everything but `end_*` edges), deduplicated.
    pub fn commands(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.transitions
            .iter()
            .filter(|t| t.kind != TransitionKind::End)
            .map(|t| t.trigger.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }
}

/// Resolves the FSM of `node` from its own fragment and its parent's config.
///
/// The parent must already be resolved. Resolving `config.declared` again
/// yields an identical config.
pub fn resolve(
    node: &str,
    own: &FsmFragment,
    parent: Option<&FsmConfig>,
) -> Result<FsmConfig, ConfigError> {
    let inherited = parent.map(|p| &p.declared);
    if own.is_empty() && inherited.is_none() {
        return Err(ConfigError::MissingConfig {
            node: node.to_string(),
        });
    }

    let own_states = own.states.clone().filter(|s| !s.is_empty());
    let states_inherited = own_states.is_none();
    let declared_states = own_states
        .or_else(|| inherited.and_then(|p| p.states.clone()))
        .unwrap_or_default();

    let declared_transitions = own
        .transitions
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| inherited.and_then(|p| p.transitions.clone()))
        .unwrap_or_default();

    let transition_conf = own
        .transition_conf
        .or_else(|| inherited.and_then(|p| p.transition_conf));

    let explicit_initial = own.initial.clone().or_else(|| {
        if states_inherited {
            inherited.and_then(|p| p.initial.clone())
        } else {
            None
        }
    });

    let included = own.included.unwrap_or(true);

    // Deduplicate, keeping the first occurrence.
    let mut states: Vec<State> = Vec::with_capacity(declared_states.len());
    for s in &declared_states {
        if !states.contains(s) {
            states.push(s.clone());
        }
    }
    if states.is_empty() {
        return Err(ConfigError::EmptyStates {
            node: node.to_string(),
        });
    }
    let declared_set: HashSet<State> = states.iter().cloned().collect();

    let initial = match explicit_initial {
        Some(initial) => initial,
        None => states[0].clone(),
    };
    if !declared_set.contains(&initial) {
        return Err(ConfigError::UnknownInitial {
            node: node.to_string(),
            state: initial.0,
        });
    }

    let blanket_long = transition_conf == Some(TransitionConf::Long);
    let mut transitions = Vec::with_capacity(declared_transitions.len());
    let mut completions: HashMap<&str, &State> = HashMap::new();

    for t in &declared_transitions {
        check_endpoint(node, t, &t.source, &declared_set)?;
        check_endpoint(node, t, &t.dest, &declared_set)?;

        let long = match t.conf {
            Some(conf) => conf == TransitionConf::Long,
            None => blanket_long,
        };
        if !long {
            transitions.push(ResolvedTransition {
                trigger: t.trigger.clone(),
                source: t.source.clone(),
                dest: t.dest.clone(),
                kind: TransitionKind::Direct,
                command: t.trigger.clone(),
            });
            continue;
        }

        let in_progress = in_progress_state(&t.trigger);
        if !states.contains(&in_progress) {
            states.push(in_progress.clone());
        }
        transitions.push(ResolvedTransition {
            trigger: t.trigger.clone(),
            source: t.source.clone(),
            dest: in_progress.clone(),
            kind: TransitionKind::Begin,
            command: t.trigger.clone(),
        });

        match completions.get(t.trigger.as_str()) {
            Some(dest) if **dest != t.dest => {
                return Err(ConfigError::AmbiguousCompletion {
                    node: node.to_string(),
                    trigger: t.trigger.clone(),
                    first: dest.0.clone(),
                    second: t.dest.0.clone(),
                });
            }
            Some(_) => {}
            None => {
                completions.insert(t.trigger.as_str(), &t.dest);
                transitions.push(ResolvedTransition {
                    trigger: completion_trigger(&t.trigger),
                    source: in_progress,
                    dest: t.dest.clone(),
                    kind: TransitionKind::End,
                    command: t.trigger.clone(),
                });
            }
        }

        tracing::debug!(
            "{}: expanded long transition '{}' ({} -> {})",
            node,
            t.trigger,
            t.source,
            t.dest
        );
    }

    let mut seen = HashSet::new();
    for t in &transitions {
        if !seen.insert((&t.source, t.trigger.as_str())) {
            return Err(ConfigError::DuplicateTransition {
                node: node.to_string(),
                state: t.source.0.clone(),
                trigger: t.trigger.clone(),
            });
        }
    }

    let checksum = checksum(&states, &initial, &transitions);
    let declared = FsmFragment {
        states: Some(declared_states),
        transitions: Some(declared_transitions),
        initial: Some(initial.clone()),
        included: Some(included),
        transition_conf,
    };

    Ok(FsmConfig {
        node: node.to_string(),
        states,
        initial,
        transitions,
        included,
        declared,
        checksum,
    })
}

fn check_endpoint(
    node: &str,
    t: &TransitionDecl,
    state: &State,
    states: &HashSet<State>,
) -> Result<(), ConfigError> {
    if states.contains(state) {
        Ok(())
    } else {
        Err(ConfigError::UnknownState {
            node: node.to_string(),
            trigger: t.trigger.clone(),
            state: state.0.clone(),
        })
    }
}

fn checksum(states: &[State], initial: &State, transitions: &[ResolvedTransition]) -> String {
    let mut crc = 0u32;
    for s in states {
        crc = crc32c::crc32c_append(crc, s.as_str().as_bytes());
        crc = crc32c::crc32c_append(crc, b"\n");
    }
    crc = crc32c::crc32c_append(crc, initial.as_str().as_bytes());
    for t in transitions {
        for part in [t.trigger.as_str(), t.source.as_str(), t.dest.as_str()] {
            crc = crc32c::crc32c_append(crc, part.as_bytes());
            crc = crc32c::crc32c_append(crc, b"\0");
        }
        let kind: &[u8] = match t.kind {
            TransitionKind::Direct => b"d",
            TransitionKind::Begin => b"b",
            TransitionKind::End => b"e",
        };
        crc = crc32c::crc32c_append(crc, kind);
    }
    format!("{:08x}", crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lifecycle() -> FsmFragment {
        FsmFragment {
            states: Some(vec!["none".into(), "booted".into(), "configured".into()]),
            transitions: Some(vec![
                TransitionDecl::new("boot", "none", "booted").long(),
                TransitionDecl::new("conf", "booted", "configured"),
                TransitionDecl::new("scrap", "configured", "booted"),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_expands_long_transitions() {
        let cfg = resolve("top", &lifecycle(), None).unwrap();

        assert_eq!(cfg.initial.as_str(), "none");
        assert!(cfg.has_state(&State::from("boot-in-progress")));
        assert_eq!(cfg.states.len(), 4);

        let begin = cfg.get_transition(&State::from("none"), "boot").unwrap();
        assert_eq!(begin.kind, TransitionKind::Begin);
        assert_eq!(begin.dest.as_str(), "boot-in-progress");

        let end = cfg
            .get_transition(&State::from("boot-in-progress"), "end_boot")
            .unwrap();
        assert_eq!(end.kind, TransitionKind::End);
        assert_eq!(end.dest.as_str(), "booted");
        assert_eq!(end.command, "boot");

        // The literal long edge is never installed.
        assert!(!cfg
            .transitions
            .iter()
            .any(|t| t.trigger == "boot" && t.dest.as_str() == "booted"));

        let conf = cfg.get_transition(&State::from("booted"), "conf").unwrap();
        assert_eq!(conf.kind, TransitionKind::Direct);
    }

    #[test]
    fn test_child_inherits_parent_verbatim() {
        let parent = resolve("top", &lifecycle(), None).unwrap();
        let child = resolve("wib1", &FsmFragment::default(), Some(&parent)).unwrap();

        assert_eq!(child.states, parent.states);
        assert_eq!(child.transitions, parent.transitions);
        assert_eq!(child.initial, parent.initial);
        assert_eq!(child.checksum, parent.checksum);
        assert_eq!(child.node, "wib1");
    }

    #[test]
    fn test_blanket_long_is_inherited() {
        let own = FsmFragment {
            transition_conf: Some(TransitionConf::Long),
            ..lifecycle()
        };
        let parent = resolve("top", &own, None).unwrap();
        let child = resolve("leaf", &FsmFragment::default(), Some(&parent)).unwrap();

        assert!(child
            .transitions
            .iter()
            .all(|t| t.kind != TransitionKind::Direct));
        assert!(child.has_state(&State::from("conf-in-progress")));
        assert!(child.has_state(&State::from("scrap-in-progress")));
    }

    #[test]
    fn test_explicit_short_overrides_blanket() {
        let own = FsmFragment {
            states: Some(vec!["a".into(), "b".into()]),
            transitions: Some(vec![TransitionDecl {
                conf: Some(TransitionConf::Short),
                ..TransitionDecl::new("go", "a", "b")
            }]),
            transition_conf: Some(TransitionConf::Long),
            ..Default::default()
        };
        let cfg = resolve("n", &own, None).unwrap();
        assert_eq!(cfg.transitions.len(), 1);
        assert_eq!(cfg.transitions[0].kind, TransitionKind::Direct);
    }

    #[test]
    fn test_own_states_keep_parent_transitions() {
        let parent = resolve("top", &lifecycle(), None).unwrap();
        let own = FsmFragment {
            states: Some(vec![
                "configured".into(),
                "none".into(),
                "booted".into(),
            ]),
            ..Default::default()
        };
        let child = resolve("c", &own, Some(&parent)).unwrap();
        assert_eq!(child.initial.as_str(), "configured");
        assert_eq!(child.transitions, parent.transitions);
    }

    #[test]
    fn test_missing_config() {
        let result = resolve("top", &FsmFragment::default(), None);
        assert!(matches!(result, Err(ConfigError::MissingConfig { .. })));
    }

    #[test]
    fn test_unknown_state() {
        let own = FsmFragment {
            states: Some(vec!["a".into()]),
            transitions: Some(vec![TransitionDecl::new("go", "a", "b")]),
            ..Default::default()
        };
        let result = resolve("n", &own, None);
        assert!(matches!(result, Err(ConfigError::UnknownState { .. })));
    }

    #[test]
    fn test_empty_states() {
        let own = FsmFragment {
            transitions: Some(vec![TransitionDecl::new("go", "a", "b")]),
            ..Default::default()
        };
        let result = resolve("n", &own, None);
        assert!(matches!(result, Err(ConfigError::EmptyStates { .. })));
    }

    #[test]
    fn test_unknown_initial() {
        let own = FsmFragment {
            states: Some(vec!["a".into()]),
            initial: Some("z".into()),
            ..Default::default()
        };
        let result = resolve("n", &own, None);
        assert!(matches!(result, Err(ConfigError::UnknownInitial { .. })));
    }

    #[test]
    fn test_duplicate_transition() {
        let own = FsmFragment {
            states: Some(vec!["a".into(), "b".into(), "c".into()]),
            transitions: Some(vec![
                TransitionDecl::new("go", "a", "b"),
                TransitionDecl::new("go", "a", "c"),
            ]),
            ..Default::default()
        };
        let result = resolve("n", &own, None);
        assert!(matches!(result, Err(ConfigError::DuplicateTransition { .. })));
    }

    #[test]
    fn test_shared_long_trigger() {
        let own = FsmFragment {
            states: Some(vec!["started".into(), "paused".into(), "configured".into()]),
            transitions: Some(vec![
                TransitionDecl::new("stop", "started", "configured").long(),
                TransitionDecl::new("stop", "paused", "configured").long(),
            ]),
            ..Default::default()
        };
        let cfg = resolve("n", &own, None).unwrap();
        let ends: Vec<_> = cfg
            .transitions
            .iter()
            .filter(|t| t.kind == TransitionKind::End)
            .collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(cfg.states.len(), 4);

        let own = FsmFragment {
            transitions: Some(vec![
                TransitionDecl::new("stop", "started", "configured").long(),
                TransitionDecl::new("stop", "paused", "started").long(),
            ]),
            ..own
        };
        let result = resolve("n", &own, None);
        assert!(matches!(result, Err(ConfigError::AmbiguousCompletion { .. })));
    }

    #[test]
    fn test_commands_skip_completions() {
        let cfg = resolve("top", &lifecycle(), None).unwrap();
        assert_eq!(cfg.commands(), vec!["boot", "conf", "scrap"]);
        assert!(cfg.knows_trigger("end_boot"));
    }

    fn arb_fragment() -> impl Strategy<Value = FsmFragment> {
        let states = prop::collection::vec("[a-e]", 1..5);
        let transitions = prop::collection::vec(
            ("[p-t]", 0usize..5, 0usize..5, any::<bool>()),
            0..6,
        );
        (states, transitions, any::<bool>()).prop_map(|(states, transitions, blanket)| {
            let states: Vec<State> = states.into_iter().map(State::from).collect();
            let transitions = transitions
                .into_iter()
                .map(|(trigger, s, d, long)| {
                    let t = TransitionDecl::new(
                        trigger,
                        states[s % states.len()].clone(),
                        states[d % states.len()].clone(),
                    );
                    if long {
                        t.long()
                    } else {
                        t
                    }
                })
                .collect();
            FsmFragment {
                states: Some(states),
                transitions: Some(transitions),
                transition_conf: blanket.then_some(TransitionConf::Long),
                ..Default::default()
            }
        })
    }

    proptest! {
        #[test]
        fn prop_resolution_is_idempotent(fragment in arb_fragment()) {
            if let Ok(first) = resolve("n", &fragment, None) {
                let again = resolve("n", &fragment, None).unwrap();
                prop_assert_eq!(&first, &again);

                let reresolved = resolve("n", &first.declared, None).unwrap();
                prop_assert_eq!(&first.states, &reresolved.states);
                prop_assert_eq!(&first.transitions, &reresolved.transitions);
                prop_assert_eq!(&first.checksum, &reresolved.checksum);
            }
        }

        #[test]
        fn prop_long_transitions_never_direct(fragment in arb_fragment()) {
            if let Ok(cfg) = resolve("n", &fragment, None) {
                let blanket = fragment.transition_conf == Some(TransitionConf::Long);
                for t in fragment.transitions.as_ref().unwrap() {
                    let long = t.conf.map_or(blanket, |c| c == TransitionConf::Long);
                    if long {
                        let direct = cfg.transitions.iter().any(|r| {
                            r.trigger == t.trigger && r.source == t.source && r.dest == t.dest
                                && r.kind == TransitionKind::Direct
                        });
                        prop_assert!(!direct);
                        prop_assert!(cfg.has_state(&in_progress_state(&t.trigger)));
                    }
                }
                for r in &cfg.transitions {
                    prop_assert!(cfg.has_state(&r.source));
                    prop_assert!(cfg.has_state(&r.dest));
                }
            }
        }
    }
}
