//! Tree construction.
//!
//! Building happens in two phases. Planning walks the declaration top-down,
//! resolves every node's FSM against its parent's and checks the tree's
//! shape. Nothing is spawned until the whole plan is valid; then the arena
//! is created and one worker per node is started.

use crate::arena::{Arena, NodeId};
use crate::completion::CompletionChannel;
use crate::error::RuntimeError;
use crate::executor::{Executor, Worker};
use crate::hooks::HookRegistry;
use crate::settings::DispatchSettings;
use crate::tree::Tree;
use exectree_core::{resolve, ChildDecl, FsmConfig, NodeDecl, TreeDecl};
use std::collections::HashSet;
use std::sync::Arc;

/// A node as laid out by planning. Indices refer to positions in the plan.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
    pub config: Arc<FsmConfig>,
}

/// Builds a running [`Tree`] from a declaration.
pub struct TreeBuilder {
    decl: TreeDecl,
    hooks: HookRegistry,
    settings: DispatchSettings,
}

impl TreeBuilder {
    pub fn new(decl: TreeDecl) -> Self {
        Self {
            decl,
            hooks: HookRegistry::new(),
            settings: DispatchSettings::default(),
        }
    }

    /// Parses a tree document and returns a builder for it.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, RuntimeError> {
        Ok(Self::new(TreeDecl::from_json(json)?))
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolves and validates the tree without starting anything.
    ///
    /// Nodes come back in preorder; the root is at index 0.
    pub fn plan(&self) -> Result<Vec<PlannedNode>, RuntimeError> {
        let mut planned = Vec::with_capacity(self.decl.node_count());
        let mut names = HashSet::new();
        plan_node(
            &self.decl.name,
            &self.decl.root,
            None,
            0,
            &mut planned,
            &mut names,
        )?;

        for node in &planned {
            check_children(node, &planned)?;
        }
        Ok(planned)
    }

    /// Plans the tree, then starts one worker per node.
    pub fn build(self) -> Result<Tree, RuntimeError> {
        let planned = self.plan()?;
        self.check_hooks(&planned)?;

        let hooks = Arc::new(self.hooks);
        let (controller, reports) = CompletionChannel::new().into_parts();
        let (arena, mailboxes) = Arena::new(
            &planned,
            |name| {
                hooks
                    .commands_for(name)
                    .map(|(command, _)| command.to_string())
                    .collect()
            },
            controller,
        );
        let arena = Arc::new(arena);

        let mut executors = Vec::with_capacity(planned.len());
        for (idx, mailbox) in mailboxes.into_iter().enumerate() {
            let worker = Worker::new(
                NodeId(idx),
                Arc::clone(&arena),
                Arc::clone(&hooks),
                self.settings.clone(),
                mailbox,
            );
            match Executor::spawn(worker) {
                Ok(executor) => executors.push(executor),
                Err(e) => {
                    for id in arena.ids() {
                        arena.node(id).signal_stop();
                    }
                    for executor in executors.iter_mut().rev() {
                        executor.join();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Started tree '{}' with {} node(s), timeout {}ms, failure policy {:?}",
            self.decl.name,
            planned.len(),
            self.settings.timeout_ms,
            self.settings.failure_policy
        );
        Ok(Tree::new(arena, executors, reports))
    }

    fn check_hooks(&self, planned: &[PlannedNode]) -> Result<(), RuntimeError> {
        for name in self.hooks.referenced_nodes() {
            if !planned.iter().any(|n| n.name == name) {
                return Err(RuntimeError::UnknownNode {
                    name: name.to_string(),
                });
            }
        }

        for node in planned {
            for (command, _) in self.hooks.commands_for(&node.name) {
                if node.config.knows_trigger(command) {
                    return Err(RuntimeError::DuplicateCommand {
                        node: node.name.clone(),
                        command: command.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn plan_node(
    name: &str,
    decl: &NodeDecl,
    parent: Option<usize>,
    depth: usize,
    planned: &mut Vec<PlannedNode>,
    names: &mut HashSet<String>,
) -> Result<usize, RuntimeError> {
    if !names.insert(name.to_string()) {
        return Err(RuntimeError::DuplicateNode {
            name: name.to_string(),
        });
    }

    let parent_config = parent.map(|p| Arc::clone(&planned[p].config));
    let config = resolve(name, &decl.fsm, parent_config.as_deref())?;
    tracing::debug!(
        "{}: resolved {} state(s), {} transition(s), checksum {}",
        name,
        config.states.len(),
        config.transitions.len(),
        config.checksum
    );

    let idx = planned.len();
    planned.push(PlannedNode {
        name: name.to_string(),
        parent,
        children: Vec::new(),
        depth,
        config: Arc::new(config),
    });

    for (child_name, child) in &decl.children {
        let child_idx = match child {
            ChildDecl::Node(node) => plan_node(child_name, node, Some(idx), depth + 1, planned, names)?,
            ChildDecl::Leaf => plan_node(
                child_name,
                &NodeDecl::default(),
                Some(idx),
                depth + 1,
                planned,
                names,
            )?,
        };
        planned[idx].children.push(child_idx);
    }
    Ok(idx)
}

/// Every internal node needs an included child, and every included child
/// must accept the commands its parent fans out.
fn check_children(node: &PlannedNode, planned: &[PlannedNode]) -> Result<(), RuntimeError> {
    if node.children.is_empty() {
        return Ok(());
    }

    let included: Vec<&PlannedNode> = node
        .children
        .iter()
        .map(|c| &planned[*c])
        .filter(|c| c.config.included)
        .collect();
    if included.is_empty() {
        return Err(RuntimeError::Structural {
            node: node.name.clone(),
        });
    }

    for command in node.config.commands() {
        for child in &included {
            if !child.config.knows_trigger(command) {
                return Err(RuntimeError::UnknownCommand {
                    node: child.name.clone(),
                    command: command.to_string(),
                });
            }
        }
    }
    Ok(())
}
