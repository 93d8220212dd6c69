//! Subtree consistency.

use crate::arena::{Arena, NodeId};

/// Returns true if every included descendant of `id` is in the same state as
/// its parent. Leaves are always consistent.
///
/// Reads published snapshots only, so it is safe to call while commands are
/// in flight.
pub(crate) fn is_consistent(arena: &Arena, id: NodeId) -> bool {
    let node = arena.node(id);
    if node.is_leaf() {
        return true;
    }
    let state = node.state();
    arena
        .included_children(id)
        .into_iter()
        .all(|child| arena.node(child).state() == state && is_consistent(arena, child))
}
