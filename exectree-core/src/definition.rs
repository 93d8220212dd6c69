//! Tree and FSM declaration types.
//!
//! A control tree is declared as a JSON document with exactly one root key:
//!
//! ```json
//! {
//!   "daq": {
//!     "states": ["none", "booted", "configured"],
//!     "initial": "none",
//!     "transitions": [
//!       {"trigger": "boot", "source": "none", "dest": "booted", "conf": "long"},
//!       {"trigger": "conf", "source": "booted", "dest": "configured"}
//!     ],
//!     "children": {
//!       "wibs": {"children": {"wib1": "leaf", "wib2": "leaf"}},
//!       "trigger": "leaf"
//!     }
//!   }
//! }
//! ```
//!
//! A child declared with a bare string is a leaf without local configuration.
//! A child object without `children` is a leaf carrying its own FSM fragment.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// A state of a node's machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for State {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for State {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a transition completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionConf {
    /// Entered immediately, completed later by `end_<trigger>`.
    Long,
    /// Completed within the entry hook.
    Short,
}

/// A declared transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionDecl {
    pub trigger: String,
    pub source: State,
    pub dest: State,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<TransitionConf>,
}

impl TransitionDecl {
    pub fn new(trigger: impl Into<String>, source: impl Into<State>, dest: impl Into<State>) -> Self {
        Self {
            trigger: trigger.into(),
            source: source.into(),
            dest: dest.into(),
            conf: None,
        }
    }

    /// Marks this transition as long.
    pub fn long(mut self) -> Self {
        self.conf = Some(TransitionConf::Long);
        self
    }
}

/// The FSM part of a node declaration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<State>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<TransitionDecl>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<State>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<bool>,

    /// Blanket setting applied to every transition of the node.
    #[serde(
        default,
        rename = "transition-conf",
        alias = "transition_conf",
        skip_serializing_if = "Option::is_none"
    )]
    pub transition_conf: Option<TransitionConf>,
}

impl FsmFragment {
    /// Returns true if the fragment declares neither states nor transitions.
    pub fn is_empty(&self) -> bool {
        self.states.as_ref().map_or(true, |s| s.is_empty())
            && self.transitions.as_ref().map_or(true, |t| t.is_empty())
    }
}

/// A node of the declared tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDecl {
    #[serde(flatten)]
    pub fsm: FsmFragment,

    /// Children in declaration order.
    #[serde(default, deserialize_with = "deserialize_children")]
    pub children: Vec<(String, ChildDecl)>,
}

/// A declared child.
#[derive(Debug, Clone)]
pub enum ChildDecl {
    /// A child with its own declaration.
    Node(Box<NodeDecl>),
    /// A bare marker: a leaf inheriting everything from its parent.
    Leaf,
}

fn deserialize_children<'de, D>(deserializer: D) -> Result<Vec<(String, ChildDecl)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, MapAccess, Visitor};
    use std::fmt;

    struct ChildrenVisitor;

    impl<'de> Visitor<'de> for ChildrenVisitor {
        type Value = Vec<(String, ChildDecl)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of child name to node object or leaf marker")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut children: Vec<(String, ChildDecl)> = Vec::new();
            while let Some(name) = map.next_key::<String>()? {
                let value: serde_json::Value = map.next_value()?;
                let child = match value {
                    serde_json::Value::Object(_) => {
                        let node: NodeDecl = serde_json::from_value(value).map_err(|e| {
                            de::Error::custom(format!("child '{}': {}", name, e))
                        })?;
                        ChildDecl::Node(Box::new(node))
                    }
                    serde_json::Value::String(_) => ChildDecl::Leaf,
                    other => {
                        return Err(de::Error::custom(format!(
                            "child '{}': expected an object or a leaf marker, got {}",
                            name, other
                        )));
                    }
                };
                if children.iter().any(|(n, _)| *n == name) {
                    return Err(de::Error::custom(format!("duplicate child '{}'", name)));
                }
                children.push((name, child));
            }
            Ok(children)
        }
    }

    deserializer.deserialize_map(ChildrenVisitor)
}

/// A parsed tree document.
#[derive(Debug, Clone)]
pub struct TreeDecl {
    /// Name of the root node.
    pub name: String,
    pub root: NodeDecl,
}

impl TreeDecl {
    /// Parses a tree document. The document must have exactly one top-level key.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = json.as_object().ok_or_else(|| CoreError::InvalidTree {
            reason: "document must be a JSON object".to_string(),
        })?;
        if obj.len() != 1 {
            return Err(CoreError::InvalidTree {
                reason: format!("document must have exactly 1 root key, found {}", obj.len()),
            });
        }
        let Some((name, value)) = obj.iter().next() else {
            return Err(CoreError::InvalidTree {
                reason: "document has no root key".to_string(),
            });
        };
        if !value.is_object() {
            return Err(CoreError::InvalidTree {
                reason: format!("root '{}' must be an object", name),
            });
        }
        let root: NodeDecl = serde_json::from_value(value.clone())?;
        Ok(Self {
            name: name.clone(),
            root,
        })
    }

    /// Parses a tree document from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let json: serde_json::Value = serde_json::from_str(s)?;
        Self::from_json(&json)
    }

    /// Number of declared nodes, root included.
    pub fn node_count(&self) -> usize {
        fn count(node: &NodeDecl) -> usize {
            1 + node
                .children
                .iter()
                .map(|(_, child)| match child {
                    ChildDecl::Node(n) => count(n),
                    ChildDecl::Leaf => 1,
                })
                .sum::<usize>()
        }
        count(&self.root)
    }
}
