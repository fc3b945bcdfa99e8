//! Worklist unification of types.

use log::trace;

use crate::ir::manager::NodeManager;
use crate::ir::{NodeCategory, NodeId, NodeKind};

use super::substitution::{occurs, Substitution};

/// Compute the most general substitution making `a` and `b` structurally
/// equal, or `None` if the two types are not unifiable. Variables only ever
/// end up on the left-hand side of the resulting bindings, making the
/// substitution canonical.
pub fn unify(mgr: &mut NodeManager, a: NodeId, b: NodeId) -> Option<Substitution> {
    unify_all(mgr, vec![(a, b)])
}

/// Unify a list of pairs simultaneously under one substitution.
pub fn unify_all(mgr: &mut NodeManager, pairs: Vec<(NodeId, NodeId)>) -> Option<Substitution> {
    let mut worklist = pairs;
    let mut result = Substitution::new();

    while let Some((a, b)) = worklist.pop() {
        // interned nodes: structural equality is id equality
        if a == b {
            continue;
        }

        let (a, b) = orient(mgr, a, b);

        if is_variable(mgr, a) {
            if occurs(mgr, a, b) {
                trace!("occurs check failed");
                return None;
            }
            let binding = match mgr.category(a) {
                NodeCategory::Type => Substitution::for_type(a, b),
                NodeCategory::IntTypeParam => Substitution::for_int_param(a, b),
                _ => unreachable!("variables are types or int params"),
            };
            for (left, right) in worklist.iter_mut() {
                *left = binding.apply(mgr, *left);
                *right = binding.apply(mgr, *right);
            }
            result = Substitution::compose(mgr, &result, &binding);
            continue;
        }

        if !decompose(mgr, a, b, &mut worklist) {
            return None;
        }
    }

    Some(result)
}

/// Variables go to the left-hand side.
fn orient(mgr: &NodeManager, a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if is_variable(mgr, b) && !is_variable(mgr, a) {
        (b, a)
    } else {
        (a, b)
    }
}

fn is_variable(mgr: &NodeManager, node: NodeId) -> bool {
    matches!(
        mgr.kind(node),
        NodeKind::TypeVariable { .. } | NodeKind::VariableIntParam { .. }
    )
}

/// Push the child obligations of two equally-shaped non-variable nodes,
/// or fail if the shapes differ.
fn decompose(
    mgr: &NodeManager,
    a: NodeId,
    b: NodeId,
    worklist: &mut Vec<(NodeId, NodeId)>,
) -> bool {
    use NodeKind::*;
    match (mgr.kind(a).clone(), mgr.kind(b).clone()) {
        (
            GenericType {
                family: fam_a,
                type_params: tp_a,
                int_params: ip_a,
                ..
            },
            GenericType {
                family: fam_b,
                type_params: tp_b,
                int_params: ip_b,
                ..
            },
        ) => {
            if fam_a != fam_b || tp_a.len() != tp_b.len() || ip_a.len() != ip_b.len() {
                return false;
            }
            worklist.extend(tp_a.into_iter().zip(tp_b));
            worklist.extend(ip_a.into_iter().zip(ip_b));
            true
        }
        (TupleType { elements: el_a }, TupleType { elements: el_b }) => {
            if el_a.len() != el_b.len() {
                return false;
            }
            worklist.extend(el_a.into_iter().zip(el_b));
            true
        }
        (
            FunctionType {
                params: p_a,
                ret: r_a,
                plain: plain_a,
            },
            FunctionType {
                params: p_b,
                ret: r_b,
                plain: plain_b,
            },
        ) => {
            if plain_a != plain_b || p_a.len() != p_b.len() {
                return false;
            }
            worklist.extend(p_a.into_iter().zip(p_b));
            worklist.push((r_a, r_b));
            true
        }
        (StructType { entries: en_a }, StructType { entries: en_b })
        | (UnionType { entries: en_a }, UnionType { entries: en_b }) => {
            if en_a.len() != en_b.len() {
                return false;
            }
            for ((name_a, ty_a), (name_b, ty_b)) in en_a.into_iter().zip(en_b) {
                if name_a != name_b {
                    return false;
                }
                worklist.push((ty_a, ty_b));
            }
            true
        }
        (
            ArrayType {
                element: el_a,
                dim: dim_a,
            },
            ArrayType {
                element: el_b,
                dim: dim_b,
            },
        ) => {
            worklist.push((el_a, el_b));
            worklist.push((dim_a, dim_b));
            true
        }
        (
            VectorType {
                element: el_a,
                size: s_a,
            },
            VectorType {
                element: el_b,
                size: s_b,
            },
        ) => {
            worklist.push((el_a, el_b));
            worklist.push((s_a, s_b));
            true
        }
        (RefType { element: el_a }, RefType { element: el_b }) => {
            worklist.push((el_a, el_b));
            true
        }
        (
            ChannelType {
                element: el_a,
                size: s_a,
            },
            ChannelType {
                element: el_b,
                size: s_b,
            },
        ) => {
            worklist.push((el_a, el_b));
            worklist.push((s_a, s_b));
            true
        }
        // recursive types unify nominally; same-instance was handled by
        // the identity check
        (RecType { .. }, RecType { .. }) => false,
        // two distinct concrete int params reject
        (ConcreteIntParam { .. }, ConcreteIntParam { .. }) => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::lang::{self, Basic};

    use super::*;

    struct Fixture {
        mgr: NodeManager,
        basic: Basic,
    }

    impl Fixture {
        fn new() -> Fixture {
            let mut mgr = NodeManager::new();
            let basic = Basic::new(&mut mgr);
            Fixture { mgr, basic }
        }
    }

    #[test]
    fn test_unify_identical() {
        let mut fx = Fixture::new();
        let result = unify(&mut fx.mgr, fx.basic.int4, fx.basic.int4).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_unify_binds_variable() {
        let mut fx = Fixture::new();
        let alpha = lang::type_var(&mut fx.mgr, "a");

        // variable on either side binds
        let left = unify(&mut fx.mgr, alpha, fx.basic.int4).unwrap();
        assert_eq!(left.type_mapping(alpha), Some(fx.basic.int4));

        let right = unify(&mut fx.mgr, fx.basic.int4, alpha).unwrap();
        assert_eq!(right.type_mapping(alpha), Some(fx.basic.int4));
    }

    #[test]
    fn test_unify_applies_substitution_to_both_sides() {
        let mut fx = Fixture::new();
        let alpha = lang::type_var(&mut fx.mgr, "a");
        let beta = lang::type_var(&mut fx.mgr, "b");

        // ('a, 'a) with (int<4>, 'b) must bind both variables
        let tuple_a = fx.mgr.get(NodeKind::TupleType {
            elements: vec![alpha, alpha],
        });
        let tuple_b = fx.mgr.get(NodeKind::TupleType {
            elements: vec![fx.basic.int4, beta],
        });

        let subst = unify(&mut fx.mgr, tuple_a, tuple_b).unwrap();
        let a_applied = subst.apply(&mut fx.mgr, tuple_a);
        let b_applied = subst.apply(&mut fx.mgr, tuple_b);
        assert_eq!(a_applied, b_applied);
    }

    #[test]
    fn test_occurs_check_rejects() {
        let mut fx = Fixture::new();
        let alpha = lang::type_var(&mut fx.mgr, "a");
        let ref_alpha = lang::ref_type(&mut fx.mgr, alpha);
        assert!(unify(&mut fx.mgr, alpha, ref_alpha).is_none());
    }

    #[test]
    fn test_family_mismatch_rejects() {
        let mut fx = Fixture::new();
        assert!(unify(&mut fx.mgr, fx.basic.int4, fx.basic.real4).is_none());
    }

    #[test]
    fn test_distinct_concrete_int_params_reject() {
        let mut fx = Fixture::new();
        assert!(unify(&mut fx.mgr, fx.basic.int4, fx.basic.int8).is_none());
    }

    #[test]
    fn test_int_param_variable_binds() {
        let mut fx = Fixture::new();
        let width = lang::int_param_var(&mut fx.mgr, "a");
        let generic_int = fx.mgr.get(NodeKind::GenericType {
            family: "int".into(),
            type_params: vec![],
            int_params: vec![width],
            base: None,
        });

        let subst = unify(&mut fx.mgr, generic_int, fx.basic.int8).unwrap();
        let eight = fx.mgr.get(NodeKind::ConcreteIntParam { value: 8 });
        assert_eq!(subst.int_param_mapping(width), Some(eight));
    }

    #[test]
    fn test_unification_correctness_property() {
        // if unify(A, B) = σ then σ(A) = σ(B)
        let mut fx = Fixture::new();
        let alpha = lang::type_var(&mut fx.mgr, "a");
        let array_alpha = lang::array_type(&mut fx.mgr, alpha);
        let fn_a = lang::function_type(&mut fx.mgr, vec![array_alpha], fx.basic.unit);

        let array_int = lang::array_type(&mut fx.mgr, fx.basic.int4);
        let fn_b = lang::function_type(&mut fx.mgr, vec![array_int], fx.basic.unit);

        let subst = unify(&mut fx.mgr, fn_a, fn_b).unwrap();
        assert_eq!(
            subst.apply(&mut fx.mgr, fn_a),
            subst.apply(&mut fx.mgr, fn_b)
        );
    }

    #[test]
    fn test_rec_types_unify_nominally() {
        let mut fx = Fixture::new();
        let alpha = lang::type_var(&mut fx.mgr, "a");
        let beta = lang::type_var(&mut fx.mgr, "b");
        let ref_alpha = lang::ref_type(&mut fx.mgr, alpha);
        let ref_beta = lang::ref_type(&mut fx.mgr, beta);

        let def_a = fx.mgr.get(NodeKind::RecTypeDefinition {
            bindings: vec![(alpha, ref_alpha)],
        });
        let def_b = fx.mgr.get(NodeKind::RecTypeDefinition {
            bindings: vec![(beta, ref_beta)],
        });
        let rec_a = fx.mgr.get(NodeKind::RecType {
            var: alpha,
            definition: def_a,
        });
        let rec_b = fx.mgr.get(NodeKind::RecType {
            var: beta,
            definition: def_b,
        });

        // same instance unifies, distinct instances do not
        assert!(unify(&mut fx.mgr, rec_a, rec_a).is_some());
        assert!(unify(&mut fx.mgr, rec_a, rec_b).is_none());
    }
}
