//! The universal IR invariants, exercised through the public API.

use std::collections::HashMap;

use inspire::ir::annotations::{Annotation, AnnotationKey};
use inspire::ir::lang::{self, Basic};
use inspire::ir::visitor::{self, VisitOrder};
use inspire::ir::{printer, replacer, Builder, NodeKind, NodeManager};
use inspire::span::Span;
use inspire::types::{self, Substitution};

/// Structural uniqueness: same kind and children yields the same node.
#[test]
fn test_structural_uniqueness() {
    let mut b = Builder::new();
    let one = b.int_lit(1);
    let other_one = b.int_lit(1);
    assert_eq!(one, other_one);

    let compound_a = b.compound(vec![one]);
    let compound_b = b.compound(vec![other_one]);
    assert_eq!(compound_a, compound_b);

    let two = b.int_lit(2);
    assert_ne!(one, two);
}

/// Annotation transparency: annotating a node does not change which node
/// structurally equal content resolves to.
#[test]
fn test_annotation_transparency() {
    let mut b = Builder::new();
    let lit = b.int_lit(42);
    b.mgr
        .annotate(lit, Annotation::SourceLocation(Span::new("x.c", 1, 2)));
    let again = b.int_lit(42);
    assert_eq!(lit, again);
    assert!(b.mgr.has_annotation(again, AnnotationKey::SourceLocation));
}

/// Substitution soundness: typeOf(σ(e)) = σ(typeOf(e)).
#[test]
fn test_substitution_soundness() {
    let mut mgr = NodeManager::new();
    let _basic = Basic::new(&mut mgr);
    let alpha = lang::type_var(&mut mgr, "a");
    let ref_alpha = lang::ref_type(&mut mgr, alpha);
    let var = mgr.get(NodeKind::Variable {
        ty: ref_alpha,
        id: 4242,
    });

    let int4 = lang::sized_type(&mut mgr, "int", 4);
    let subst = Substitution::for_type(alpha, int4);

    let substituted = subst.apply(&mut mgr, var);
    let expected_ty = subst.apply(&mut mgr, ref_alpha);
    assert_eq!(mgr.expr_type(substituted), Some(expected_ty));
}

/// Unification correctness: σ(A) = σ(B) for σ = unify(A, B).
#[test]
fn test_unification_correctness() {
    let mut mgr = NodeManager::new();
    let basic = Basic::new(&mut mgr);
    let alpha = lang::type_var(&mut mgr, "a");
    let beta = lang::type_var(&mut mgr, "b");

    let left = lang::function_type(&mut mgr, vec![alpha, basic.int4], beta);
    let right = lang::function_type(&mut mgr, vec![basic.boolean, basic.int4], basic.unit);

    let subst = types::unify(&mut mgr, left, right).expect("unifiable");
    assert_eq!(subst.apply(&mut mgr, left), subst.apply(&mut mgr, right));
}

/// Subtyping is reflexive and transitive.
#[test]
fn test_subtyping_reflexive_transitive() {
    let mut mgr = NodeManager::new();
    let basic = Basic::new(&mut mgr);

    for ty in [basic.int4, basic.uint8, basic.real4, basic.boolean] {
        assert!(types::is_sub_type(&mgr, ty, ty));
    }
    // int<1> <= int<4> and int<4> <= real<8> gives int<1> <= real<8>
    assert!(types::is_sub_type(&mgr, basic.int1, basic.int4));
    assert!(types::is_sub_type(&mgr, basic.int4, basic.real8));
    assert!(types::is_sub_type(&mgr, basic.int1, basic.real8));
}

/// Join and meet are symmetric.
#[test]
fn test_join_meet_symmetry() {
    let mut mgr = NodeManager::new();
    let basic = Basic::new(&mut mgr);

    let pairs = [
        (basic.int2, basic.uint2),
        (basic.int4, basic.real4),
        (basic.uint4, basic.int8),
    ];
    for (a, b) in pairs {
        assert_eq!(types::join(&mut mgr, a, b), types::join(&mut mgr, b, a));
        assert_eq!(types::meet(&mut mgr, a, b), types::meet(&mut mgr, b, a));
    }
}

/// Cycle closure: every member of a record cycle shares the one
/// definition node.
#[test]
fn test_cycle_closure() {
    use inspire::frontend::ast::{RecordDecl, RecordKind, SrcType, TranslationUnit};
    use inspire::frontend::{ConversionContext, ConversionSetup};

    let mut unit = TranslationUnit::new("t.c");
    let a = unit.add_record(RecordDecl {
        name: "a".into(),
        kind: RecordKind::Struct,
        fields: vec![],
        span: Span::default(),
    });
    let b = unit.add_record(RecordDecl {
        name: "b".into(),
        kind: RecordKind::Struct,
        fields: vec![("to_a".into(), SrcType::pointer_to(SrcType::Record(a)))],
        span: Span::default(),
    });
    let c = unit.add_record(RecordDecl {
        name: "c".into(),
        kind: RecordKind::Struct,
        fields: vec![("to_b".into(), SrcType::pointer_to(SrcType::Record(b)))],
        span: Span::default(),
    });
    unit.records[a.0 as usize]
        .fields
        .push(("to_c".into(), SrcType::pointer_to(SrcType::Record(c))));

    let setup = ConversionSetup::default();
    let mut ctx = ConversionContext::new(&unit, &setup);
    let lowered: Vec<_> = [a, b, c]
        .into_iter()
        .map(|record| {
            ctx.convert_type(&SrcType::Record(record), &Span::default())
                .expect("cycle must lower")
        })
        .collect();

    let definitions: Vec<_> = lowered
        .iter()
        .map(|ty| match ctx.builder.mgr.kind(*ty) {
            NodeKind::RecType { definition, .. } => *definition,
            other => panic!("expected rec type, got {other:?}"),
        })
        .collect();
    assert_eq!(definitions[0], definitions[1]);
    assert_eq!(definitions[1], definitions[2]);
}

/// Replacer identity: an inapplicable substitution returns the identical
/// root.
#[test]
fn test_replacer_identity() {
    let mut b = Builder::new();
    let x = b.variable(b.basic.int4);
    let y = b.variable(b.basic.int4);
    let unrelated = b.variable(b.basic.int4);
    let root = b.compound(vec![x]);

    let mut map = HashMap::new();
    map.insert(y, unrelated);
    let replaced = replacer::replace_all(&mut b.mgr, root, &map);
    assert_eq!(replaced, root);
}

/// Visit-once is idempotent: running twice observes the same set.
#[test]
fn test_visit_once_idempotent() {
    let mut b = Builder::new();
    let lit = b.int_lit(1);
    let inner = b.compound(vec![lit, lit]);
    let root = b.compound(vec![inner, inner]);

    let collect = |mgr: &NodeManager| {
        let mut seen = vec![];
        visitor::visit_once(mgr, root, VisitOrder::Prefix, &mut |node| seen.push(node));
        seen
    };
    let first = collect(&b.mgr);
    let second = collect(&b.mgr);
    assert_eq!(first, second);
}

/// Pretty-printing is stable under repetition, also after normalization.
#[test]
fn test_pretty_print_idempotent() {
    let mut b = Builder::new();
    let x = b.variable(b.basic.int4);
    let lit = b.int_lit(5);
    let decl = b.decl_stmt(x, lit).unwrap();
    let root = b.compound(vec![decl]);

    let normalized = printer::normalize(&mut b.mgr, root);
    let first = printer::print(&b.mgr, normalized);
    let second = printer::print(&b.mgr, normalized);
    assert_eq!(first, second);
}

/// Replacer annotation preservation: annotations survive substitution on
/// the node or its replacement.
#[test]
fn test_replacer_preserves_annotations() {
    let mut b = Builder::new();
    let x = b.variable(b.basic.int4);
    let y = b.variable(b.basic.int4);
    b.mgr.annotate(x, Annotation::CName("x".into()));
    let root = b.compound(vec![x]);
    b.mgr.annotate(root, Annotation::CName("block".into()));

    let replaced = replacer::replace_single(&mut b.mgr, root, x, y);
    // the variable's annotation migrated onto its replacement
    assert!(b.mgr.has_annotation(y, AnnotationKey::CName));
    // the rebuilt parent kept its annotation
    assert!(b.mgr.has_annotation(replaced, AnnotationKey::CName));
}
