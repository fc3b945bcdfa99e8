//! Substitutions: finite maps from type variables to types and from
//! int-param variables to int type params.

use std::collections::HashMap;

use crate::ir::manager::NodeManager;
use crate::ir::{replacer, NodeId, NodeKind};

/// A substitution with its two domains. Application is structural and
/// single-shot: once a mapped variable is replaced, the replacement is not
/// re-examined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitution {
    type_map: HashMap<NodeId, NodeId>,
    int_param_map: HashMap<NodeId, NodeId>,
}

impl Substitution {
    pub fn new() -> Substitution {
        Substitution::default()
    }

    pub fn for_type(var: NodeId, ty: NodeId) -> Substitution {
        let mut subst = Substitution::new();
        subst.add_type_mapping(var, ty);
        subst
    }

    pub fn for_int_param(var: NodeId, param: NodeId) -> Substitution {
        let mut subst = Substitution::new();
        subst.add_int_param_mapping(var, param);
        subst
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty() && self.int_param_map.is_empty()
    }

    pub fn add_type_mapping(&mut self, var: NodeId, ty: NodeId) {
        self.type_map.insert(var, ty);
    }

    pub fn add_int_param_mapping(&mut self, var: NodeId, param: NodeId) {
        self.int_param_map.insert(var, param);
    }

    pub fn type_mapping(&self, var: NodeId) -> Option<NodeId> {
        self.type_map.get(&var).copied()
    }

    pub fn int_param_mapping(&self, var: NodeId) -> Option<NodeId> {
        self.int_param_map.get(&var).copied()
    }

    pub fn maps_type(&self, var: NodeId) -> bool {
        self.type_map.contains_key(&var)
    }

    pub fn maps_int_param(&self, var: NodeId) -> bool {
        self.int_param_map.contains_key(&var)
    }

    pub fn type_mappings(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.type_map.iter().map(|(var, ty)| (*var, *ty))
    }

    pub fn int_param_mappings(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.int_param_map.iter().map(|(var, param)| (*var, *param))
    }

    /// Apply this substitution to an arbitrary IR subtree.
    pub fn apply(&self, mgr: &mut NodeManager, node: NodeId) -> NodeId {
        if self.is_empty() {
            return node;
        }
        let mut merged: HashMap<NodeId, NodeId> = HashMap::new();
        merged.extend(self.type_map.iter());
        merged.extend(self.int_param_map.iter());
        replacer::replace_all(mgr, node, &merged)
    }

    /// `compose(a, b)` builds the substitution equivalent to applying `a`
    /// first and `b` afterwards: `b` is applied to every range element of
    /// `a`, then `b`'s domain is united with `a`'s on keys `a` does not
    /// bind.
    pub fn compose(mgr: &mut NodeManager, a: &Substitution, b: &Substitution) -> Substitution {
        let mut result = Substitution::new();
        for (var, ty) in &a.type_map {
            result.type_map.insert(*var, b.apply(mgr, *ty));
        }
        for (var, param) in &a.int_param_map {
            result.int_param_map.insert(*var, b.apply(mgr, *param));
        }
        for (var, ty) in &b.type_map {
            result.type_map.entry(*var).or_insert(*ty);
        }
        for (var, param) in &b.int_param_map {
            result.int_param_map.entry(*var).or_insert(*param);
        }
        result
    }
}

/// Unroll a recursive type once: the body bound to its variable, with
/// every recursion variable of the shared definition replaced by the
/// corresponding `RecType`. Non-recursive types are returned unchanged.
pub fn unroll_rec_type(mgr: &mut NodeManager, rec: NodeId) -> NodeId {
    let NodeKind::RecType { var, definition } = mgr.kind(rec).clone() else {
        return rec;
    };
    let NodeKind::RecTypeDefinition { bindings } = mgr.kind(definition).clone() else {
        return rec;
    };

    let mut subst = Substitution::new();
    for (bound, _) in &bindings {
        let member = mgr.get(NodeKind::RecType {
            var: *bound,
            definition,
        });
        subst.add_type_mapping(*bound, member);
    }

    let body = bindings
        .iter()
        .find(|(bound, _)| *bound == var)
        .map(|(_, body)| *body)
        .unwrap_or(rec);
    subst.apply(mgr, body)
}

/// Whether `var` occurs anywhere inside `term` (including `term` itself).
pub fn occurs(mgr: &NodeManager, var: NodeId, term: NodeId) -> bool {
    if var == term {
        return true;
    }
    mgr.children(term)
        .iter()
        .any(|child| occurs(mgr, var, *child))
}

/// Collect the names of all type variables and int-param variables in a
/// subtree.
pub fn variable_names(mgr: &NodeManager, node: NodeId) -> Vec<String> {
    let mut names = vec![];
    crate::ir::visitor::visit_once(
        mgr,
        node,
        crate::ir::visitor::VisitOrder::Prefix,
        &mut |current| match mgr.kind(current) {
            NodeKind::TypeVariable { name } => names.push(name.clone()),
            NodeKind::VariableIntParam { symbol } => names.push(symbol.clone()),
            _ => {}
        },
    );
    names
}
