//! Structural substitution over IR trees.
//!
//! All replacement modes rebuild the spine above every changed node through
//! the node manager, so results are interned like any other node. Whenever
//! a node is exchanged for a logically equivalent one, its annotations are
//! migrated (existing annotations on the replacement are never
//! overwritten). If nothing in the substitution map occurs in the tree, the
//! original root is returned unchanged, reference-equal.

use std::collections::HashMap;

use crate::types::deduction;

use super::manager::NodeManager;
use super::visitor::NodeAddress;
use super::{NodeCategory, NodeId, NodeKind};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Replace everywhere; if no key is a type, type subtrees are pruned.
    Plain,
    /// Do not descend into lambdas, keeping the replacement within the
    /// current function scope.
    ScopeLimited,
    /// Like [`Mode::Plain`] for variables, but every call above a changed
    /// argument has its return type re-deduced.
    FixCallTypes,
}

/// Simultaneous multi-map substitution: every node equal to a key of `map`
/// is exchanged for the mapped value.
pub fn replace_all(
    mgr: &mut NodeManager,
    root: NodeId,
    map: &HashMap<NodeId, NodeId>,
) -> NodeId {
    run(mgr, root, map, Mode::Plain)
}

/// Fast path replacing a single node.
pub fn replace_single(mgr: &mut NodeManager, root: NodeId, old: NodeId, new: NodeId) -> NodeId {
    let mut map = HashMap::new();
    map.insert(old, new);
    run(mgr, root, &map, Mode::Plain)
}

/// Replace variables without crossing lambda boundaries.
pub fn replace_vars_scoped(
    mgr: &mut NodeManager,
    root: NodeId,
    map: &HashMap<NodeId, NodeId>,
) -> NodeId {
    run(mgr, root, map, Mode::ScopeLimited)
}

/// Replace variables and re-deduce the return type of every enclosing
/// call. Required when the mapped variables change their type.
pub fn replace_vars_fix_calls(
    mgr: &mut NodeManager,
    root: NodeId,
    map: &HashMap<NodeId, NodeId>,
) -> NodeId {
    run(mgr, root, map, Mode::FixCallTypes)
}

fn run(mgr: &mut NodeManager, root: NodeId, map: &HashMap<NodeId, NodeId>, mode: Mode) -> NodeId {
    if map.is_empty() {
        return root;
    }
    let prune_types = mode == Mode::Plain
        && map
            .keys()
            .all(|key| mgr.category(*key) != NodeCategory::Type);
    let mut cache = HashMap::new();
    apply(mgr, root, map, &mut cache, prune_types, mode)
}

fn apply(
    mgr: &mut NodeManager,
    node: NodeId,
    map: &HashMap<NodeId, NodeId>,
    cache: &mut HashMap<NodeId, NodeId>,
    prune_types: bool,
    mode: Mode,
) -> NodeId {
    if let Some(replacement) = map.get(&node) {
        let replacement = *replacement;
        mgr.migrate_annotations(node, replacement);
        return replacement;
    }
    if let Some(done) = cache.get(&node) {
        return *done;
    }
    if prune_types && mgr.category(node) == NodeCategory::Type {
        return node;
    }
    if mode == Mode::ScopeLimited && matches!(mgr.kind(node), NodeKind::LambdaExpr { .. }) {
        return node;
    }

    let children = mgr.children(node);
    let rebuilt: Vec<NodeId> = children
        .iter()
        .map(|child| apply(mgr, *child, map, cache, prune_types, mode))
        .collect();

    let result = if rebuilt == children {
        node
    } else {
        let mut kind = mgr.kind(node).with_children(&rebuilt);
        if mode == Mode::FixCallTypes {
            if let NodeKind::CallExpr { func, args, .. } = kind.clone() {
                let arg_types: Vec<NodeId> = args
                    .iter()
                    .map(|arg| {
                        mgr.expr_type(*arg)
                            .unwrap_or_else(|| unreachable!("untyped call argument"))
                    })
                    .collect();
                if let Some(fn_type) = mgr.expr_type(func) {
                    let ret = deduction::deduce_return_type(mgr, fn_type, &arg_types);
                    kind = NodeKind::CallExpr {
                        ty: ret,
                        func,
                        args,
                    };
                }
            }
        }
        let new_node = mgr.get(kind);
        mgr.migrate_annotations(node, new_node);
        new_node
    };

    cache.insert(node, result);
    result
}

/// Exchange the node at `addr` for `replacement` and rebuild the spine up
/// to the root. This is the only occurrence-unique replacement: other
/// occurrences of the addressed node are left untouched.
pub fn replace_address(
    mgr: &mut NodeManager,
    addr: &NodeAddress,
    replacement: NodeId,
) -> NodeId {
    let path_nodes = addr.nodes_on_path(mgr);
    let mut current = replacement;

    for (level, parent) in path_nodes.iter().enumerate().rev().skip(1) {
        let child_index = addr.path()[level];
        let mut children = mgr.children(*parent);
        children[child_index] = current;
        let rebuilt = mgr.kind(*parent).with_children(&children);
        let new_parent = mgr.get(rebuilt);
        mgr.migrate_annotations(*parent, new_parent);
        current = new_parent;
    }

    if let Some(old) = path_nodes.last() {
        mgr.migrate_annotations(*old, replacement);
    }
    current
}
