//! The node store. All IR nodes live in a single arena owned by a
//! [`NodeManager`]; construction goes through [`NodeManager::get`], which
//! interns structurally equal nodes so that node identity doubles as
//! structural equality. Nodes are released en bloc when the manager is
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::annotations::{Annotation, AnnotationKey, AnnotationMap};
use super::{NodeCategory, NodeId, NodeKind};

/// Process-wide source of fresh ids for variables and markers. Strictly
/// increasing so freshly introduced variables never collide, not even
/// across managers.
static FRESH_IDS: AtomicU64 = AtomicU64::new(1);

pub fn fresh_id() -> u64 {
    FRESH_IDS.fetch_add(1, Ordering::Relaxed)
}

#[derive(Default)]
pub struct NodeManager {
    nodes: Vec<NodeKind>,
    interned: HashMap<NodeKind, NodeId>,
    annotations: HashMap<NodeId, AnnotationMap>,
}

impl NodeManager {
    pub fn new() -> NodeManager {
        NodeManager::default()
    }

    /// Return the canonical node for `kind`, inserting it if it is new.
    /// Idempotent: a second call with a structurally equal kind returns the
    /// identical [`NodeId`].
    pub fn get(&mut self, kind: NodeKind) -> NodeId {
        if let Some(id) = self.interned.get(&kind) {
            return *id;
        }

        let id = NodeId(self.nodes.len() as u32);
        self.interned.insert(kind.clone(), id);
        self.nodes.push(kind);
        id
    }

    /// Look up a node without inserting.
    pub fn lookup(&self, kind: &NodeKind) -> Option<NodeId> {
        self.interned.get(kind).copied()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()]
    }

    pub fn category(&self, id: NodeId) -> NodeCategory {
        self.kind(id).category()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    /// Result type of an expression node.
    pub fn expr_type(&self, id: NodeId) -> Option<NodeId> {
        self.kind(id).expr_type()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes of a given category, in creation order.
    pub fn nodes_of_category(&self, category: NodeCategory) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.category() == category)
            .map(|(index, _)| NodeId(index as u32))
            .collect()
    }

    // ---- annotations (observational, never hashed) -------------------

    /// Attach an annotation to a node, replacing any previous annotation of
    /// the same category.
    pub fn annotate(&mut self, id: NodeId, annotation: Annotation) {
        self.annotations
            .entry(id)
            .or_default()
            .insert(annotation.key(), annotation);
    }

    pub fn annotation(&self, id: NodeId, key: AnnotationKey) -> Option<&Annotation> {
        self.annotations.get(&id).and_then(|map| map.get(&key))
    }

    pub fn annotations(&self, id: NodeId) -> Option<&AnnotationMap> {
        self.annotations.get(&id)
    }

    pub fn has_annotation(&self, id: NodeId, key: AnnotationKey) -> bool {
        self.annotation(id, key).is_some()
    }

    pub fn clear_annotations(&mut self, id: NodeId) {
        self.annotations.remove(&id);
    }

    /// Migrate annotations from `from` to `to`: every category present on
    /// `from` but absent on `to` is copied over. Categories already present
    /// on `to` are never overwritten.
    pub fn migrate_annotations(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        let Some(source) = self.annotations.get(&from).cloned() else {
            return;
        };
        let target = self.annotations.entry(to).or_default();
        for (key, annotation) in source {
            target.entry(key).or_insert(annotation);
        }
    }

    /// Deep-clone a subtree from another manager into this one. Since both
    /// stores intern structurally, the transfer is a bottom-up rebuild;
    /// annotations travel along.
    pub fn transfer(&mut self, other: &NodeManager, root: NodeId) -> NodeId {
        let kind = other.kind(root);
        let children = kind.children();
        let moved: Vec<NodeId> = children
            .iter()
            .map(|child| self.transfer(other, *child))
            .collect();
        let transferred = self.get(kind.with_children(&moved));
        if let Some(map) = other.annotations(root) {
            for annotation in map.values() {
                if !self.has_annotation(transferred, annotation.key()) {
                    self.annotate(transferred, annotation.clone());
                }
            }
        }
        transferred
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::annotations::{Annotation, AnnotationKey};
    use crate::span::Span;

    use super::*;

    fn int_literal(mgr: &mut NodeManager, value: &str) -> NodeId {
        let ty = mgr.get(NodeKind::GenericType {
            family: "int".into(),
            type_params: vec![],
            int_params: vec![],
            base: None,
        });
        mgr.get(NodeKind::Literal {
            ty,
            value: value.into(),
        })
    }

    #[test]
    fn test_structural_uniqueness() {
        let mut mgr = NodeManager::new();
        let a = int_literal(&mut mgr, "42");
        let b = int_literal(&mut mgr, "42");
        let c = int_literal(&mut mgr, "43");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut mgr = NodeManager::new();
        let a = int_literal(&mut mgr, "1");
        let count = mgr.node_count();
        let b = int_literal(&mut mgr, "1");
        assert_eq!(a, b);
        assert_eq!(mgr.node_count(), count);
    }

    #[test]
    fn test_variables_differ_by_fresh_id() {
        let mut mgr = NodeManager::new();
        let ty = mgr.get(NodeKind::GenericType {
            family: "bool".into(),
            type_params: vec![],
            int_params: vec![],
            base: None,
        });
        let v1 = mgr.get(NodeKind::Variable { ty, id: fresh_id() });
        let v2 = mgr.get(NodeKind::Variable { ty, id: fresh_id() });
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_annotations_do_not_affect_identity() {
        let mut mgr = NodeManager::new();
        let a = int_literal(&mut mgr, "7");
        mgr.annotate(a, Annotation::SourceLocation(Span::new("x.c", 1, 1)));
        let b = int_literal(&mut mgr, "7");
        assert_eq!(a, b);
        assert!(mgr.has_annotation(b, AnnotationKey::SourceLocation));
    }

    #[test]
    fn test_migrate_does_not_overwrite() {
        let mut mgr = NodeManager::new();
        let a = int_literal(&mut mgr, "1");
        let b = int_literal(&mut mgr, "2");
        mgr.annotate(a, Annotation::CName("one".into()));
        mgr.annotate(a, Annotation::SourceLocation(Span::new("x.c", 1, 1)));
        mgr.annotate(b, Annotation::CName("two".into()));

        mgr.migrate_annotations(a, b);

        let Some(Annotation::CName(name)) = mgr.annotation(b, AnnotationKey::CName) else {
            panic!("missing C name annotation");
        };
        assert_eq!(name, "two");
        assert!(mgr.has_annotation(b, AnnotationKey::SourceLocation));
    }

    #[test]
    fn test_transfer_deep_clones() {
        let mut src = NodeManager::new();
        let lit = int_literal(&mut src, "9");
        src.annotate(lit, Annotation::CName("nine".into()));

        let mut dst = NodeManager::new();
        let moved = dst.transfer(&src, lit);
        assert_eq!(dst.kind(moved), src.kind(lit));
        assert!(dst.has_annotation(moved, AnnotationKey::CName));
    }
}
