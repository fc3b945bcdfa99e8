//! Return-type deduction for calls, plus capture-free renaming of type
//! variables.

use std::collections::HashSet;

use log::warn;

use crate::ir::lang;
use crate::ir::manager::NodeManager;
use crate::ir::printer;
use crate::ir::{NodeId, NodeKind};

use super::substitution::{variable_names, Substitution};
use super::unify::unify_all;

/// Deduce the return type of calling a function of type `fn_type` with
/// arguments of the given types. `None` if the call does not type.
pub fn try_deduce_return_type(
    mgr: &mut NodeManager,
    fn_type: NodeId,
    args: &[NodeId],
) -> Option<NodeId> {
    let NodeKind::FunctionType { params, ret, .. } = mgr.kind(fn_type).clone() else {
        return None;
    };
    if params.len() != args.len() {
        return None;
    }

    // rename the function's variables away from anything free in the
    // arguments, so unification cannot capture
    let mut used: HashSet<String> = HashSet::new();
    for arg in args {
        used.extend(variable_names(mgr, *arg));
    }
    let renaming = fresh_renaming(mgr, fn_type, &used);
    let params: Vec<NodeId> = params
        .iter()
        .map(|param| renaming.apply(mgr, *param))
        .collect();
    let ret = renaming.apply(mgr, ret);

    let pairs = params.into_iter().zip(args.iter().copied()).collect();
    let subst = unify_all(mgr, pairs)?;
    Some(subst.apply(mgr, ret))
}

/// Like [`try_deduce_return_type`], but recovers from failure: a warning
/// is emitted and `unit` is returned so downstream stays well-typed while
/// preserving a signal.
pub fn deduce_return_type(mgr: &mut NodeManager, fn_type: NodeId, args: &[NodeId]) -> NodeId {
    match try_deduce_return_type(mgr, fn_type, args) {
        Some(ret) => ret,
        None => {
            warn!(
                "unable to deduce return type of call to {}; assuming unit",
                printer::print(mgr, fn_type)
            );
            lang::generic_type(mgr, lang::FAMILY_UNIT)
        }
    }
}

/// Build a substitution renaming every type variable and int-param
/// variable of `node` to a fresh name disjoint from `used`.
pub fn fresh_renaming(mgr: &mut NodeManager, node: NodeId, used: &HashSet<String>) -> Substitution {
    let names = variable_names(mgr, node);

    let mut taken: HashSet<String> = used.clone();
    taken.extend(names.iter().cloned());

    let mut next_fresh = 0usize;
    let mut fresh = |taken: &mut HashSet<String>| loop {
        let candidate = format!("v{next_fresh}");
        next_fresh += 1;
        if taken.insert(candidate.clone()) {
            break candidate;
        }
    };

    let mut subst = Substitution::new();
    let mut seen = HashSet::new();
    crate::ir::visitor::visit_once(
        mgr,
        node,
        crate::ir::visitor::VisitOrder::Prefix,
        &mut |current| {
            seen.insert(current);
        },
    );
    for current in seen {
        match mgr.kind(current).clone() {
            NodeKind::TypeVariable { name } if used.contains(&name) => {
                let renamed = fresh(&mut taken);
                let replacement = lang::type_var(mgr, &renamed);
                subst.add_type_mapping(current, replacement);
            }
            NodeKind::VariableIntParam { symbol } if used.contains(&symbol) => {
                let renamed = fresh(&mut taken);
                let replacement = lang::int_param_var(mgr, &renamed);
                subst.add_int_param_mapping(current, replacement);
            }
            _ => {}
        }
    }
    subst
}
