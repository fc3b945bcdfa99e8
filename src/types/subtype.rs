//! The subtyping lattice.
//!
//! Primitive integer and real families form a lattice given by a static
//! table of direct super-types; `is_sub_type` is its reflexive-transitive
//! closure, extended with vector-to-array decay and function-type
//! variance. Everything else is nominal.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::ir::lang::{FAMILY_INT, FAMILY_REAL, FAMILY_UINT};
use crate::ir::manager::NodeManager;
use crate::ir::{NodeId, NodeKind};

/// A primitive scalar as (family, byte width).
type Scalar = (&'static str, u64);

/// Direct super-type edges of the scalar lattice. Unsigned types widen
/// into the next larger signed type; the four-byte ranks widen into
/// doubles.
static DIRECT_SUPER_TYPES: Lazy<Vec<(Scalar, Scalar)>> = Lazy::new(|| {
    vec![
        ((FAMILY_INT, 1), (FAMILY_INT, 2)),
        ((FAMILY_INT, 2), (FAMILY_INT, 4)),
        ((FAMILY_INT, 4), (FAMILY_INT, 8)),
        ((FAMILY_UINT, 1), (FAMILY_UINT, 2)),
        ((FAMILY_UINT, 2), (FAMILY_UINT, 4)),
        ((FAMILY_UINT, 4), (FAMILY_UINT, 8)),
        ((FAMILY_UINT, 1), (FAMILY_INT, 2)),
        ((FAMILY_UINT, 2), (FAMILY_INT, 4)),
        ((FAMILY_UINT, 4), (FAMILY_INT, 8)),
        ((FAMILY_INT, 2), (FAMILY_REAL, 4)),
        ((FAMILY_INT, 4), (FAMILY_REAL, 8)),
        ((FAMILY_UINT, 2), (FAMILY_REAL, 4)),
        ((FAMILY_UINT, 4), (FAMILY_REAL, 8)),
        ((FAMILY_REAL, 4), (FAMILY_REAL, 8)),
    ]
});

/// Decode a node as a scalar lattice member.
fn as_scalar(mgr: &NodeManager, ty: NodeId) -> Option<Scalar> {
    let NodeKind::GenericType {
        family,
        type_params,
        int_params,
        ..
    } = mgr.kind(ty)
    else {
        return None;
    };
    if !type_params.is_empty() || int_params.len() != 1 {
        return None;
    }
    let NodeKind::ConcreteIntParam { value } = mgr.kind(int_params[0]) else {
        return None;
    };
    let family = [FAMILY_INT, FAMILY_UINT, FAMILY_REAL]
        .into_iter()
        .find(|known| *known == family.as_str())?;
    Some((family, *value))
}

fn direct_supers(scalar: Scalar) -> Vec<Scalar> {
    DIRECT_SUPER_TYPES
        .iter()
        .filter(|(sub, _)| *sub == scalar)
        .map(|(_, sup)| *sup)
        .collect()
}

fn direct_subs(scalar: Scalar) -> Vec<Scalar> {
    DIRECT_SUPER_TYPES
        .iter()
        .filter(|(_, sup)| *sup == scalar)
        .map(|(sub, _)| *sub)
        .collect()
}

/// Reflexive-transitive closure of the direct scalar relation.
fn scalar_closure(start: Scalar, up: bool) -> HashSet<Scalar> {
    let mut closure = HashSet::from([start]);
    let mut frontier = vec![start];
    while let Some(current) = frontier.pop() {
        let next = if up {
            direct_supers(current)
        } else {
            direct_subs(current)
        };
        for scalar in next {
            if closure.insert(scalar) {
                frontier.push(scalar);
            }
        }
    }
    closure
}

/// `a` is usable wherever a `b` is expected.
pub fn is_sub_type(mgr: &NodeManager, a: NodeId, b: NodeId) -> bool {
    if a == b {
        return true;
    }

    if let (Some(sa), Some(sb)) = (as_scalar(mgr, a), as_scalar(mgr, b)) {
        return scalar_closure(sa, true).contains(&sb);
    }

    match (mgr.kind(a).clone(), mgr.kind(b).clone()) {
        // Vector(T, n) <= Array(T, 1)
        (
            NodeKind::VectorType { element, .. },
            NodeKind::ArrayType {
                element: array_element,
                dim,
            },
        ) => element == array_element && is_unit_dim(mgr, dim),
        (
            NodeKind::FunctionType {
                params: params_a,
                ret: ret_a,
                plain: plain_a,
            },
            NodeKind::FunctionType {
                params: params_b,
                ret: ret_b,
                plain: plain_b,
            },
        ) => {
            // a plain function can stand in for a closure, not vice versa
            if params_a.len() != params_b.len() || (!plain_a && plain_b) {
                return false;
            }
            let contravariant = params_a
                .iter()
                .zip(params_b.iter())
                .all(|(pa, pb)| is_sub_type(mgr, *pb, *pa));
            contravariant && is_sub_type(mgr, ret_a, ret_b)
        }
        _ => false,
    }
}

fn is_unit_dim(mgr: &NodeManager, dim: NodeId) -> bool {
    matches!(mgr.kind(dim), NodeKind::ConcreteIntParam { value: 1 })
}

/// Smallest common super-type of `a` and `b`, if any. Computed by parallel
/// BFS on the super-type graph from both sides until the closures
/// intersect.
pub fn join(mgr: &mut NodeManager, a: NodeId, b: NodeId) -> Option<NodeId> {
    if is_sub_type(mgr, a, b) {
        return Some(b);
    }
    if is_sub_type(mgr, b, a) {
        return Some(a);
    }

    // vector/array join decays to the array side
    match (mgr.kind(a).clone(), mgr.kind(b).clone()) {
        (NodeKind::VectorType { element, .. }, NodeKind::VectorType { element: other, .. })
            if element == other =>
        {
            return Some(crate::ir::lang::array_type(mgr, element));
        }
        _ => {}
    }

    let (sa, sb) = (as_scalar(mgr, a)?, as_scalar(mgr, b)?);
    bfs_meet_point(sa, sb, true).map(|(family, width)| crate::ir::lang::sized_type(mgr, family, width))
}

/// Greatest common sub-type of `a` and `b`; the dual of [`join`].
pub fn meet(mgr: &mut NodeManager, a: NodeId, b: NodeId) -> Option<NodeId> {
    if is_sub_type(mgr, a, b) {
        return Some(a);
    }
    if is_sub_type(mgr, b, a) {
        return Some(b);
    }

    let (sa, sb) = (as_scalar(mgr, a)?, as_scalar(mgr, b)?);
    bfs_meet_point(sa, sb, false).map(|(family, width)| crate::ir::lang::sized_type(mgr, family, width))
}

/// Expand both frontiers stepwise until they intersect; among the first
/// intersection the extreme element (smallest width for joins, largest for
/// meets) is returned.
fn bfs_meet_point(a: Scalar, b: Scalar, up: bool) -> Option<Scalar> {
    let mut reach_a = HashSet::from([a]);
    let mut reach_b = HashSet::from([b]);
    let mut frontier_a = vec![a];
    let mut frontier_b = vec![b];

    loop {
        let common: Vec<Scalar> = reach_a.intersection(&reach_b).copied().collect();
        if !common.is_empty() {
            return common.into_iter().min_by_key(|(family, width)| {
                let rank = if up { *width } else { u64::MAX - *width };
                // prefer the integral family on ties
                (rank, *family == FAMILY_REAL)
            });
        }
        if frontier_a.is_empty() && frontier_b.is_empty() {
            return None;
        }

        let step = |frontier: &mut Vec<Scalar>, reach: &mut HashSet<Scalar>| {
            let mut next = vec![];
            for current in frontier.drain(..) {
                let successors = if up {
                    direct_supers(current)
                } else {
                    direct_subs(current)
                };
                for scalar in successors {
                    if reach.insert(scalar) {
                        next.push(scalar);
                    }
                }
            }
            *frontier = next;
        };
        step(&mut frontier_a, &mut reach_a);
        step(&mut frontier_b, &mut reach_b);
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
    fn test_reflexive() {
        let fx = Fixture::new();
        assert!(is_sub_type(&fx.mgr, fx.basic.int4, fx.basic.int4));
    }

    #[test]
    fn test_transitive_widening() {
        let fx = Fixture::new();
        // int<1> <= int<2> <= int<4> gives int<1> <= int<4>
        assert!(is_sub_type(&fx.mgr, fx.basic.int1, fx.basic.int4));
        assert!(is_sub_type(&fx.mgr, fx.basic.uint2, fx.basic.int8));
        assert!(is_sub_type(&fx.mgr, fx.basic.int4, fx.basic.real8));
        assert!(!is_sub_type(&fx.mgr, fx.basic.int8, fx.basic.int4));
        assert!(!is_sub_type(&fx.mgr, fx.basic.real8, fx.basic.int8));
    }

    #[test]
    fn test_vector_decays_to_array() {
        let mut fx = Fixture::new();
        let size = fx.mgr.get(NodeKind::ConcreteIntParam { value: 16 });
        let vector = lang::vector_type(&mut fx.mgr, fx.basic.int4, size);
        let array = lang::array_type(&mut fx.mgr, fx.basic.int4);
        assert!(is_sub_type(&fx.mgr, vector, array));
        assert!(!is_sub_type(&fx.mgr, array, vector));
    }

    #[test]
    fn test_function_variance() {
        let mut fx = Fixture::new();
        // (int<8>) -> int<4>  <=  (int<4>) -> int<8>
        let wide_params = lang::function_type(&mut fx.mgr, vec![fx.basic.int8], fx.basic.int4);
        let narrow_params = lang::function_type(&mut fx.mgr, vec![fx.basic.int4], fx.basic.int8);
        assert!(is_sub_type(&fx.mgr, wide_params, narrow_params));
        assert!(!is_sub_type(&fx.mgr, narrow_params, wide_params));
    }

    #[test]
    fn test_join_is_symmetric() {
        let mut fx = Fixture::new();
        let ab = join(&mut fx.mgr, fx.basic.int4, fx.basic.uint4);
        let ba = join(&mut fx.mgr, fx.basic.uint4, fx.basic.int4);
        assert_eq!(ab, ba);
        assert_eq!(ab, Some(fx.basic.int8));
    }

    #[test]
    fn test_meet_is_symmetric() {
        let mut fx = Fixture::new();
        let ab = meet(&mut fx.mgr, fx.basic.int4, fx.basic.uint4);
        let ba = meet(&mut fx.mgr, fx.basic.uint4, fx.basic.int4);
        assert_eq!(ab, ba);
        assert_eq!(ab, Some(fx.basic.uint2));
    }

    #[test]
    fn test_join_of_comparable() {
        let mut fx = Fixture::new();
        assert_eq!(
            join(&mut fx.mgr, fx.basic.int2, fx.basic.int8),
            Some(fx.basic.int8)
        );
    }

    #[test]
    fn test_join_vector_array() {
        let mut fx = Fixture::new();
        let size = fx.mgr.get(NodeKind::ConcreteIntParam { value: 4 });
        let vector = lang::vector_type(&mut fx.mgr, fx.basic.int4, size);
        let array = lang::array_type(&mut fx.mgr, fx.basic.int4);
        assert_eq!(join(&mut fx.mgr, vector, array), Some(array));

        let other_size = fx.mgr.get(NodeKind::ConcreteIntParam { value: 8 });
        let other_vector = lang::vector_type(&mut fx.mgr, fx.basic.int4, other_size);
        assert_eq!(join(&mut fx.mgr, vector, other_vector), Some(array));
    }

    #[test]
    fn test_unrelated_types_have_no_join() {
        let mut fx = Fixture::new();
        assert_eq!(join(&mut fx.mgr, fx.basic.boolean, fx.basic.int4), None);
    }
}
