//! Static control part (SCoP) detection.
//!
//! A region is a SCoP when its loop bounds, conditions and array
//! subscripts are affine expressions over the enclosing iterators and
//! parameters. Detection is conservative: any non-affine piece (a
//! non-constant multiplication, an unknown call, escaping control flow)
//! makes the enclosing region fail, while nested regions may still
//! qualify on their own. Qualifying regions receive a
//! [`ScopRegion`] annotation carrying the iteration vector
//! `(iterators | parameters | 1)` and the constraint system.

use std::collections::HashMap;

use log::trace;

use crate::ir::annotations::{
    AffineFunction, Annotation, Constraint, ConstraintOp, ConstraintTree, IterationVector,
    ScopRegion,
};
use crate::ir::manager::NodeManager;
use crate::ir::{NodeId, NodeKind};

/// Names of builtins that may appear inside a SCoP.
const ACCESS_BUILTINS: [&str; 5] = [
    "array.ref.elem.1D",
    "array.subscript.1D",
    "vector.ref.elem",
    "vector.subscript",
    "array.view",
];

const PURE_BUILTIN_PREFIXES: [&str; 7] = ["int.", "uint.", "real.", "bool.", "char.", "ref.", "composite."];

/// An affine expression while parameters are still being discovered:
/// variable coefficients plus a constant.
#[derive(Clone, Debug, Default)]
struct AffineTerms {
    coeffs: HashMap<NodeId, i64>,
    constant: i64,
}

impl AffineTerms {
    fn constant(value: i64) -> AffineTerms {
        AffineTerms {
            coeffs: HashMap::new(),
            constant: value,
        }
    }

    fn variable(var: NodeId) -> AffineTerms {
        AffineTerms {
            coeffs: HashMap::from([(var, 1)]),
            constant: 0,
        }
    }

    fn add(mut self, other: &AffineTerms) -> AffineTerms {
        for (var, coeff) in &other.coeffs {
            *self.coeffs.entry(*var).or_insert(0) += coeff;
        }
        self.constant += other.constant;
        self
    }

    fn negate(mut self) -> AffineTerms {
        for coeff in self.coeffs.values_mut() {
            *coeff = -*coeff;
        }
        self.constant = -self.constant;
        self
    }

    fn scale(mut self, factor: i64) -> AffineTerms {
        for coeff in self.coeffs.values_mut() {
            *coeff *= factor;
        }
        self.constant *= factor;
        self
    }

    fn as_constant(&self) -> Option<i64> {
        self.coeffs
            .values()
            .all(|coeff| *coeff == 0)
            .then_some(self.constant)
    }
}

/// The expression is not affine over the current iteration vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotAffine;

/// A pending constraint: terms compared against zero.
#[derive(Clone, Debug)]
enum PendingTree {
    Atom(AffineTerms, ConstraintOp),
    Not(Box<PendingTree>),
    And(Vec<PendingTree>),
}

/// What a qualifying region collects before the iteration vector is
/// frozen.
#[derive(Default)]
struct RegionCheck {
    params: Vec<NodeId>,
}

impl RegionCheck {
    fn note_param(&mut self, var: NodeId) {
        if !self.params.contains(&var) {
            self.params.push(var);
        }
    }
}

/// Walk a statement tree and attach [`ScopRegion`] annotations to every
/// maximal qualifying region (normalized loops and conditional branch
/// bodies).
pub fn mark_scops(mgr: &mut NodeManager, root: NodeId) {
    mark(mgr, root, &[]);
}

fn mark(mgr: &mut NodeManager, node: NodeId, iterators: &[NodeId]) {
    match mgr.kind(node).clone() {
        NodeKind::ForStmt {
            decl,
            body,
            end,
            step,
        } => {
            let NodeKind::DeclarationStmt { var, init } = mgr.kind(decl).clone() else {
                return;
            };
            let mut extended: Vec<NodeId> = iterators.to_vec();
            extended.push(var);

            match check_for(mgr, var, init, end, step, body, &extended) {
                Some(region) => {
                    trace!("for loop qualifies as SCoP");
                    mgr.annotate(node, Annotation::Scop(region));
                    mark(mgr, body, &extended);
                }
                None => {
                    // the iterator is no analyzed dimension; inner regions
                    // see it as a parameter
                    mark(mgr, body, iterators);
                }
            }
        }
        NodeKind::IfStmt {
            condition,
            then_body,
            else_body,
        } => {
            let mut check = RegionCheck::default();
            if let Ok(tree) = extract_condition(mgr, condition, iterators, &mut check) {
                // empty branches are interned and shared; annotating them
                // would leak the region onto unrelated occurrences
                let mut then_check = check.clone_params();
                if !is_empty_compound(mgr, then_body)
                    && check_stmt(mgr, then_body, iterators, &mut then_check).is_some()
                {
                    let region = freeze(iterators, then_check.params, vec![tree.clone()]);
                    mgr.annotate(then_body, Annotation::Scop(region));
                }
                let mut else_check = check.clone_params();
                if !is_empty_compound(mgr, else_body)
                    && check_stmt(mgr, else_body, iterators, &mut else_check).is_some()
                {
                    let region = freeze(
                        iterators,
                        else_check.params,
                        vec![PendingTree::Not(Box::new(tree))],
                    );
                    mgr.annotate(else_body, Annotation::Scop(region));
                }
            }
            mark(mgr, then_body, iterators);
            mark(mgr, else_body, iterators);
        }
        NodeKind::CompoundStmt { stmts } => {
            for stmt in stmts {
                mark(mgr, stmt, iterators);
            }
        }
        NodeKind::WhileStmt { body, .. } => mark(mgr, body, iterators),
        NodeKind::SwitchStmt { cases, default, .. } => {
            for (_, case_body) in cases {
                mark(mgr, case_body, iterators);
            }
            mark(mgr, default, iterators);
        }
        NodeKind::MarkerStmt { sub, .. } => mark(mgr, sub, iterators),
        NodeKind::LambdaExpr { definition, .. } => {
            let NodeKind::LambdaDefinition { bindings } = mgr.kind(definition).clone() else {
                return;
            };
            for (_, lambda) in bindings {
                if let NodeKind::Lambda { body, .. } = mgr.kind(lambda).clone() {
                    mark(mgr, body, &[]);
                }
            }
        }
        NodeKind::Program { entry_points, .. } => {
            for entry in entry_points {
                mark(mgr, entry, &[]);
            }
        }
        _ => {}
    }
}

impl RegionCheck {
    fn clone_params(&self) -> RegionCheck {
        RegionCheck {
            params: self.params.clone(),
        }
    }
}

/// Check one normalized loop: bounds affine, constant step, body
/// SCoP-compatible. Returns the frozen region on success.
fn check_for(
    mgr: &NodeManager,
    iterator: NodeId,
    lower: NodeId,
    end: NodeId,
    step: NodeId,
    body: NodeId,
    iterators: &[NodeId],
) -> Option<ScopRegion> {
    let mut check = RegionCheck::default();

    // outer iterators may appear in the bounds, the own iterator not
    let outer = &iterators[..iterators.len() - 1];
    let lower_terms = extract_affine(mgr, lower, outer, &mut check).ok()?;
    let end_terms = extract_affine(mgr, end, outer, &mut check).ok()?;
    let NodeKind::Literal { .. } = mgr.kind(step) else {
        return None;
    };

    check_stmt(mgr, body, iterators, &mut check)?;

    // iter >= lb  and  iter < end
    let iter_terms = AffineTerms::variable(iterator);
    let lower_constraint = PendingTree::Atom(
        iter_terms.clone().add(&lower_terms.negate()),
        ConstraintOp::Ge,
    );
    let upper_constraint =
        PendingTree::Atom(iter_terms.add(&end_terms.negate()), ConstraintOp::Lt);

    Some(freeze(
        iterators,
        check.params,
        vec![lower_constraint, upper_constraint],
    ))
}

/// Structural admissibility of a statement inside a SCoP; collects the
/// parameters of all affine accesses on the way.
fn check_stmt(
    mgr: &NodeManager,
    node: NodeId,
    iterators: &[NodeId],
    check: &mut RegionCheck,
) -> Option<()> {
    match mgr.kind(node).clone() {
        NodeKind::CompoundStmt { stmts } => {
            for stmt in stmts {
                check_stmt(mgr, stmt, iterators, check)?;
            }
            Some(())
        }
        NodeKind::DeclarationStmt { init, .. } => check_expr(mgr, init, iterators, check),
        NodeKind::IfStmt {
            condition,
            then_body,
            else_body,
        } => {
            extract_condition(mgr, condition, iterators, check).ok()?;
            check_stmt(mgr, then_body, iterators, check)?;
            check_stmt(mgr, else_body, iterators, check)
        }
        NodeKind::ForStmt {
            decl,
            body,
            end,
            step,
        } => {
            let NodeKind::DeclarationStmt { var, init } = mgr.kind(decl).clone() else {
                return None;
            };
            let mut extended: Vec<NodeId> = iterators.to_vec();
            extended.push(var);
            let outer = iterators;
            extract_affine(mgr, init, outer, check).ok()?;
            extract_affine(mgr, end, outer, check).ok()?;
            let NodeKind::Literal { .. } = mgr.kind(step) else {
                return None;
            };
            check_stmt(mgr, body, &extended, check)
        }
        NodeKind::MarkerStmt { sub, .. } => check_stmt(mgr, sub, iterators, check),
        // escaping control flow and irregular statements disqualify
        NodeKind::WhileStmt { .. }
        | NodeKind::SwitchStmt { .. }
        | NodeKind::BreakStmt
        | NodeKind::ContinueStmt
        | NodeKind::ReturnStmt { .. } => None,
        // expression statements
        _ => check_expr(mgr, node, iterators, check),
    }
}

/// Expressions are admissible when every subscript is affine and only
/// builtin operations occur.
fn check_expr(
    mgr: &NodeManager,
    node: NodeId,
    iterators: &[NodeId],
    check: &mut RegionCheck,
) -> Option<()> {
    match mgr.kind(node).clone() {
        NodeKind::CallExpr { func, args, .. } => {
            let NodeKind::Literal { value, .. } = mgr.kind(func).clone() else {
                // a lambda call hides arbitrary effects
                return None;
            };
            if ACCESS_BUILTINS.contains(&value.as_str()) {
                check_expr(mgr, args[0], iterators, check)?;
                return extract_affine(mgr, args[1], iterators, check)
                    .ok()
                    .map(|_| ());
            }
            if PURE_BUILTIN_PREFIXES
                .iter()
                .any(|prefix| value.starts_with(prefix))
                || value == "undefined"
            {
                for arg in args {
                    check_expr(mgr, arg, iterators, check)?;
                }
                return Some(());
            }
            // unknown external call
            None
        }
        NodeKind::CastExpr { sub, .. } | NodeKind::MarkerExpr { sub, .. } => {
            check_expr(mgr, sub, iterators, check)
        }
        NodeKind::Literal { .. } | NodeKind::Variable { .. } => Some(()),
        NodeKind::VectorExpr { elements, .. } | NodeKind::TupleExpr { elements, .. } => {
            for element in elements {
                check_expr(mgr, element, iterators, check)?;
            }
            Some(())
        }
        NodeKind::StructExpr { members, .. } => {
            for (_, member) in members {
                check_expr(mgr, member, iterators, check)?;
            }
            Some(())
        }
        _ => None,
    }
}

/// Turn a lowered boolean condition into a pending constraint tree.
/// Logical disjunctions are refused (the region is then not a SCoP).
fn extract_condition(
    mgr: &NodeManager,
    condition: NodeId,
    iterators: &[NodeId],
    check: &mut RegionCheck,
) -> Result<PendingTree, NotAffine> {
    let NodeKind::CallExpr { func, args, .. } = mgr.kind(condition).clone() else {
        return Err(NotAffine);
    };
    let NodeKind::Literal { value, .. } = mgr.kind(func).clone() else {
        return Err(NotAffine);
    };

    if value == "bool.lnot" {
        let inner = extract_condition(mgr, args[0], iterators, check)?;
        return Ok(PendingTree::Not(Box::new(inner)));
    }

    // the lazy conjunction pattern: if.then.else(a, fun(){ b }, fun(){ false })
    if value == "if.then.else" {
        let lhs = extract_condition(mgr, args[0], iterators, check)?;
        let then_value = thunk_result(mgr, args[1]).ok_or(NotAffine)?;
        let else_value = thunk_result(mgr, args[2]).ok_or(NotAffine)?;
        if is_bool_literal(mgr, else_value, false) {
            let rhs = extract_condition(mgr, then_value, iterators, check)?;
            return Ok(PendingTree::And(vec![lhs, rhs]));
        }
        if is_bool_literal(mgr, then_value, true) {
            // a disjunction; not supported, the region is refused
            return Err(NotAffine);
        }
        return Err(NotAffine);
    }

    let op = match value.split('.').nth(1) {
        Some("eq") => ConstraintOp::Eq,
        Some("ne") => ConstraintOp::Ne,
        Some("lt") => ConstraintOp::Lt,
        Some("le") => ConstraintOp::Le,
        Some("gt") => ConstraintOp::Gt,
        Some("ge") => ConstraintOp::Ge,
        _ => return Err(NotAffine),
    };
    let lhs = extract_affine(mgr, args[0], iterators, check)?;
    let rhs = extract_affine(mgr, args[1], iterators, check)?;
    Ok(PendingTree::Atom(lhs.add(&rhs.negate()), op))
}

fn is_empty_compound(mgr: &NodeManager, node: NodeId) -> bool {
    matches!(mgr.kind(node), NodeKind::CompoundStmt { stmts } if stmts.is_empty())
}

fn thunk_result(mgr: &NodeManager, thunk: NodeId) -> Option<NodeId> {
    let NodeKind::LambdaExpr { definition, .. } = mgr.kind(thunk) else {
        return None;
    };
    let NodeKind::LambdaDefinition { bindings } = mgr.kind(*definition) else {
        return None;
    };
    let NodeKind::Lambda { body, .. } = mgr.kind(bindings.first()?.1) else {
        return None;
    };
    let NodeKind::CompoundStmt { stmts } = mgr.kind(*body) else {
        return None;
    };
    let NodeKind::ReturnStmt { expr } = mgr.kind(*stmts.first()?) else {
        return None;
    };
    Some(*expr)
}

fn is_bool_literal(mgr: &NodeManager, node: NodeId, expected: bool) -> bool {
    matches!(
        mgr.kind(node),
        NodeKind::Literal { value, .. } if value == if expected { "true" } else { "false" }
    )
}

/// Affine extraction over the current iterators; unknown variables are
/// registered as parameters.
fn extract_affine(
    mgr: &NodeManager,
    node: NodeId,
    iterators: &[NodeId],
    check: &mut RegionCheck,
) -> Result<AffineTerms, NotAffine> {
    match mgr.kind(node).clone() {
        NodeKind::Literal { value, .. } => value
            .parse::<i64>()
            .map(AffineTerms::constant)
            .map_err(|_| NotAffine),
        NodeKind::Variable { .. } => {
            if !iterators.contains(&node) {
                check.note_param(node);
            }
            Ok(AffineTerms::variable(node))
        }
        NodeKind::CastExpr { sub, .. } | NodeKind::MarkerExpr { sub, .. } => {
            extract_affine(mgr, sub, iterators, check)
        }
        NodeKind::CallExpr { func, args, .. } => {
            let NodeKind::Literal { value, .. } = mgr.kind(func).clone() else {
                return Err(NotAffine);
            };
            // reads of scalar variables stay symbolic
            if value == "ref.deref" {
                return extract_affine(mgr, args[0], iterators, check);
            }
            let operation = value.split('.').nth(1);
            match operation {
                Some("add") => {
                    let lhs = extract_affine(mgr, args[0], iterators, check)?;
                    let rhs = extract_affine(mgr, args[1], iterators, check)?;
                    Ok(lhs.add(&rhs))
                }
                Some("sub") => {
                    let lhs = extract_affine(mgr, args[0], iterators, check)?;
                    let rhs = extract_affine(mgr, args[1], iterators, check)?;
                    Ok(lhs.add(&rhs.negate()))
                }
                Some("mul") => {
                    let lhs = extract_affine(mgr, args[0], iterators, check)?;
                    let rhs = extract_affine(mgr, args[1], iterators, check)?;
                    if let Some(factor) = lhs.as_constant() {
                        return Ok(rhs.scale(factor));
                    }
                    if let Some(factor) = rhs.as_constant() {
                        return Ok(lhs.scale(factor));
                    }
                    // a product of two unknowns
                    Err(NotAffine)
                }
                _ => Err(NotAffine),
            }
        }
        _ => Err(NotAffine),
    }
}

/// Freeze collected parameters and pending constraints into the final
/// region payload with its `(iterators | parameters | 1)` coordinates.
fn freeze(iterators: &[NodeId], params: Vec<NodeId>, pending: Vec<PendingTree>) -> ScopRegion {
    let iter_vec = IterationVector {
        iterators: iterators.to_vec(),
        params,
    };
    let constraints = pending
        .into_iter()
        .map(|tree| finalize(&iter_vec, tree))
        .collect::<Vec<_>>();
    ScopRegion {
        constraints: ConstraintTree::and(constraints),
        iter_vec,
    }
}

fn finalize(iter_vec: &IterationVector, tree: PendingTree) -> ConstraintTree {
    match tree {
        PendingTree::Atom(terms, op) => {
            let mut coeffs = vec![0; iter_vec.size()];
            for (var, coeff) in &terms.coeffs {
                let index = iter_vec
                    .iterator_index(*var)
                    .or_else(|| iter_vec.param_index(*var));
                if let Some(index) = index {
                    coeffs[index] = *coeff;
                }
            }
            *coeffs.last_mut().unwrap_or_else(|| unreachable!()) = terms.constant;
            ConstraintTree::Atom(Constraint {
                func: AffineFunction { coeffs },
                op,
            })
        }
        PendingTree::Not(inner) => ConstraintTree::Not(Box::new(finalize(iter_vec, *inner))),
        PendingTree::And(trees) => ConstraintTree::And(
            trees
                .into_iter()
                .map(|tree| finalize(iter_vec, tree))
                .collect(),
        ),
    }
}
