//! Node arena.
//!
//! Nodes are addressed by [`NodeId`]; parent and child links are indices into
//! the arena. Each node publishes a snapshot of its state that only its own
//! worker writes and anyone may read.

use crate::builder::PlannedNode;
use crate::completion::{CompletionChannel, CompletionReceiver, CompletionSender};
use crate::error::RuntimeError;
use crate::executor::{Command, Message, Reply};
use crossbeam::channel::{self, Receiver, Sender};
use exectree_core::{FsmConfig, State};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stable handle of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Published view of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub state: State,

    /// Most recently completed command.
    pub last_command: Option<String>,

    /// Command currently executing, if any.
    pub active: Option<String>,
}

pub(crate) struct NodeCell {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) depth: usize,
    pub(crate) config: Arc<FsmConfig>,
    commands: HashSet<String>,
    included: AtomicBool,
    stopped: AtomicBool,
    snapshot: RwLock<NodeSnapshot>,
    inbox: Sender<Message>,
    completions: CompletionSender,
}

impl NodeCell {
    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn is_included(&self) -> bool {
        self.included.load(Ordering::Acquire)
    }

    pub(crate) fn set_included(&self, included: bool) {
        self.included.store(included, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> NodeSnapshot {
        self.snapshot.read().clone()
    }

    pub(crate) fn state(&self) -> State {
        self.snapshot.read().state.clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut NodeSnapshot)) {
        f(&mut self.snapshot.write());
    }

    /// Returns true if `command` has a handler on this node.
    pub(crate) fn accepts(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Appends a command to the node's inbox without waiting.
    pub(crate) fn enqueue(&self, command: Command) -> Result<(), RuntimeError> {
        if !self.accepts(&command.trigger) {
            return Err(RuntimeError::UnknownCommand {
                node: self.name.clone(),
                command: command.trigger,
            });
        }
        if self.is_stopped() {
            return Err(RuntimeError::Stopped {
                node: self.name.clone(),
            });
        }
        self.inbox
            .send(Message::Run(command))
            .map_err(|_| RuntimeError::Stopped {
                node: self.name.clone(),
            })
    }

    /// Refuses further commands and queues the stop sentinel.
    pub(crate) fn signal_stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.inbox.send(Message::Stop);
        }
    }
}

/// Channels a worker reads from.
pub(crate) struct Mailbox {
    pub(crate) inbox: Receiver<Message>,
    pub(crate) completions: CompletionReceiver,
}

/// All nodes of a tree, in preorder.
pub(crate) struct Arena {
    nodes: Vec<NodeCell>,
    by_name: HashMap<String, NodeId>,
    controller: CompletionSender,
}

impl Arena {
    /// Creates cells and channels for every planned node. No worker runs yet.
    pub(crate) fn new(
        planned: &[PlannedNode],
        custom_commands: impl Fn(&str) -> Vec<String>,
        controller: CompletionSender,
    ) -> (Self, Vec<Mailbox>) {
        let mut nodes = Vec::with_capacity(planned.len());
        let mut mailboxes = Vec::with_capacity(planned.len());
        let mut by_name = HashMap::with_capacity(planned.len());

        for (idx, plan) in planned.iter().enumerate() {
            let (inbox_tx, inbox_rx) = channel::unbounded();
            let (completions_tx, completions_rx) = CompletionChannel::new().into_parts();

            let mut commands: HashSet<String> = plan
                .config
                .transitions
                .iter()
                .map(|t| t.trigger.clone())
                .collect();
            commands.extend(custom_commands(&plan.name));

            nodes.push(NodeCell {
                name: plan.name.clone(),
                parent: plan.parent.map(NodeId),
                children: plan.children.iter().copied().map(NodeId).collect(),
                depth: plan.depth,
                commands,
                included: AtomicBool::new(plan.config.included),
                stopped: AtomicBool::new(false),
                snapshot: RwLock::new(NodeSnapshot {
                    state: plan.config.initial.clone(),
                    last_command: None,
                    active: None,
                }),
                config: Arc::clone(&plan.config),
                inbox: inbox_tx,
                completions: completions_tx,
            });
            mailboxes.push(Mailbox {
                inbox: inbox_rx,
                completions: completions_rx,
            });
            by_name.insert(plan.name.clone(), NodeId(idx));
        }

        (
            Self {
                nodes,
                by_name,
                controller,
            },
            mailboxes,
        )
    }

    pub(crate) fn node(&self, id: NodeId) -> &NodeCell {
        &self.nodes[id.0]
    }

    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<NodeId, RuntimeError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownNode {
                name: name.to_string(),
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids in preorder.
    pub(crate) fn ids(&self) -> impl DoubleEndedIterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Included children of `id`.
    pub(crate) fn included_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.node(*c).is_included())
            .collect()
    }

    /// Where the report answering `reply` goes.
    pub(crate) fn reply_sink(&self, id: NodeId, reply: &Reply) -> &CompletionSender {
        match (reply, self.node(id).parent) {
            (Reply::Parent { .. }, Some(parent)) => &self.node(parent).completions,
            _ => &self.controller,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::builder::TreeBuilder;
    use crate::executor::Reply;
    use exectree_core::TreeDecl;

    pub(crate) fn test_arena(json: serde_json::Value) -> (Arena, Vec<Mailbox>, CompletionReceiver) {
        let decl = TreeDecl::from_json(&json).unwrap();
        let planned = TreeBuilder::new(decl).plan().unwrap();
        let (controller, controller_rx) = CompletionChannel::new().into_parts();
        let (arena, mailboxes) = Arena::new(&planned, |_| Vec::new(), controller);
        (arena, mailboxes, controller_rx)
    }

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "root": {
                "states": ["idle", "booted"],
                "transitions": [{"trigger": "boot", "source": "idle", "dest": "booted"}],
                "children": {
                    "a": "leaf",
                    "group": {"included": false, "children": {"c": "leaf"}}
                }
            }
        })
    }

    #[test]
    fn test_links_and_lookup() {
        let (arena, mailboxes, _) = test_arena(sample());
        assert_eq!(arena.len(), 4);
        assert_eq!(mailboxes.len(), 4);

        let root = arena.root();
        let group = arena.lookup("group").unwrap();
        let c = arena.lookup("c").unwrap();

        assert_eq!(arena.node(c).parent, Some(group));
        assert_eq!(arena.node(group).parent, Some(root));
        assert_eq!(arena.node(c).depth, 2);
        assert!(arena.node(c).is_leaf());
        assert!(matches!(
            arena.lookup("nope"),
            Err(RuntimeError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_included_children_skip_excluded() {
        let (arena, _, _) = test_arena(sample());
        let a = arena.lookup("a").unwrap();
        assert_eq!(arena.included_children(arena.root()), vec![a]);

        arena.node(arena.lookup("group").unwrap()).set_included(true);
        assert_eq!(arena.included_children(arena.root()).len(), 2);
    }

    #[test]
    fn test_enqueue_checks_handlers_and_stop() {
        let (arena, mailboxes, _) = test_arena(sample());
        let a = arena.node(arena.lookup("a").unwrap());

        a.enqueue(Command::new("boot", Reply::Controller)).unwrap();
        assert_eq!(mailboxes[1].inbox.len(), 1);

        let result = a.enqueue(Command::new("explode", Reply::Controller));
        assert!(matches!(result, Err(RuntimeError::UnknownCommand { .. })));

        a.signal_stop();
        a.signal_stop();
        assert_eq!(mailboxes[1].inbox.len(), 2);
        let result = a.enqueue(Command::new("boot", Reply::Controller));
        assert!(matches!(result, Err(RuntimeError::Stopped { .. })));
    }

    #[test]
    fn test_initial_snapshot() {
        let (arena, _, _) = test_arena(sample());
        for id in arena.ids() {
            let snapshot = arena.node(id).snapshot();
            assert_eq!(snapshot.state, arena.node(id).config.initial);
            assert!(snapshot.last_command.is_none());
        }
    }
}
