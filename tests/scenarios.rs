//! End-to-end conversion scenarios: full translation units through the
//! front end, the SCoP analysis and the node inspection API.

use anyhow::Result;

use inspire::analysis;
use inspire::frontend::ast::{
    BinOp, Expr, ExprKind, FuncDecl, SrcType, Stmt, StmtId, StmtKind, Storage, TranslationUnit,
    UnOp, VarDecl, VarId,
};
use inspire::frontend::{self, ConversionSetup, ConvertedUnit};
use inspire::ir::annotations::{Annotation, AnnotationKey, ConstraintOp, ConstraintTree};
use inspire::ir::visitor::{self, VisitOrder};
use inspire::ir::{NodeId, NodeKind};
use inspire::span::Span;

struct UnitBuilder {
    unit: TranslationUnit,
    next_stmt: u32,
}

impl UnitBuilder {
    fn new() -> UnitBuilder {
        UnitBuilder {
            unit: TranslationUnit::new("scenario.c"),
            next_stmt: 0,
        }
    }

    fn param(&mut self, name: &str, ty: SrcType) -> VarId {
        self.unit.add_var(VarDecl {
            name: name.into(),
            ty,
            storage: Storage::Param,
            init: None,
            span: Span::default(),
        })
    }

    fn local(&mut self, name: &str, ty: SrcType) -> VarId {
        self.unit.add_var(VarDecl {
            name: name.into(),
            ty,
            storage: Storage::Local,
            init: None,
            span: Span::default(),
        })
    }

    fn stmt(&mut self, kind: StmtKind) -> Stmt {
        self.next_stmt += 1;
        Stmt::new(StmtId(self.next_stmt), kind)
    }

    fn function(&mut self, name: &str, params: Vec<VarId>, body: Vec<Stmt>) {
        let body = self.stmt(StmtKind::Compound(body));
        self.unit.add_function(FuncDecl {
            name: name.into(),
            params,
            ret: SrcType::Void,
            body: Some(body),
            variadic: false,
            span: Span::default(),
        });
    }

    fn convert(self) -> Result<ConvertedUnit> {
        let setup = ConversionSetup::default();
        let mut converted = frontend::convert(&self.unit, &setup)?;
        analysis::mark_scops(&mut converted.builder.mgr, converted.program);
        Ok(converted)
    }
}

fn find_nodes(converted: &ConvertedUnit, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
    let mut found = vec![];
    visitor::visit_once(
        &converted.builder.mgr,
        converted.program,
        VisitOrder::Prefix,
        &mut |node| {
            if pred(converted.builder.mgr.kind(node)) {
                found.push(node);
            }
        },
    );
    found
}

/// S1: both branches of an if become statements carrying dual SCoP
/// constraints.
#[test]
fn test_if_else_scope() -> Result<()> {
    let mut b = UnitBuilder::new();
    let c = b.param("c", SrcType::int());
    let d = b.param("d", SrcType::int());
    let a = b.param("a", SrcType::int());
    let bb = b.param("b", SrcType::int());
    let v = b.param("v", SrcType::pointer_to(SrcType::int()));

    let then_branch = {
        let access = b.stmt(StmtKind::Expr(Expr::index(
            Expr::var(v),
            Expr::binary(BinOp::Sub, Expr::var(a), Expr::var(bb)),
        )));
        b.stmt(StmtKind::Compound(vec![access]))
    };
    let else_branch = {
        let access = b.stmt(StmtKind::Expr(Expr::index(
            Expr::var(v),
            Expr::binary(BinOp::Add, Expr::var(a), Expr::var(bb)),
        )));
        b.stmt(StmtKind::Compound(vec![access]))
    };
    let if_stmt = b.stmt(StmtKind::If {
        cond_decl: None,
        cond: Expr::binary(BinOp::Le, Expr::var(c), Expr::var(d)),
        then_branch: Box::new(then_branch),
        else_branch: Some(Box::new(else_branch)),
    });
    b.function("kernel", vec![c, d, a, bb, v], vec![if_stmt]);

    let converted = b.convert()?;
    let ifs = find_nodes(&converted, |kind| matches!(kind, NodeKind::IfStmt { .. }));
    assert_eq!(ifs.len(), 1);
    let NodeKind::IfStmt {
        then_body,
        else_body,
        ..
    } = converted.builder.mgr.kind(ifs[0]).clone()
    else {
        unreachable!();
    };

    // the then branch: an affine region over four parameters
    let Some(Annotation::Scop(then_region)) = converted
        .builder
        .mgr
        .annotation(then_body, AnnotationKey::Scop)
    else {
        panic!("then branch must carry a SCoP region");
    };
    assert!(then_region.iter_vec.iterators.is_empty());
    assert_eq!(then_region.iter_vec.params.len(), 4);
    let Some(ConstraintTree::Atom(constraint)) = &then_region.constraints else {
        panic!("expected a single constraint");
    };
    assert_eq!(constraint.op, ConstraintOp::Le);

    // the else branch: the negated condition
    let Some(Annotation::Scop(else_region)) = converted
        .builder
        .mgr
        .annotation(else_body, AnnotationKey::Scop)
    else {
        panic!("else branch must carry a SCoP region");
    };
    assert!(matches!(
        else_region.constraints,
        Some(ConstraintTree::Not(_))
    ));
    Ok(())
}

/// S2: a simple counted loop normalizes into a ForStmt whose region has
/// the iteration vector `(i | b | 1)` and the bounds as constraints.
#[test]
fn test_simple_counted_for() -> Result<()> {
    let mut b = UnitBuilder::new();
    let bb = b.param("b", SrcType::int());
    let v = b.param("v", SrcType::pointer_to(SrcType::int()));
    let i = b.local("i", SrcType::int());

    let body = {
        let access = b.stmt(StmtKind::Expr(Expr::index(
            Expr::var(v),
            Expr::binary(BinOp::Add, Expr::var(i), Expr::var(bb)),
        )));
        b.stmt(StmtKind::Compound(vec![access]))
    };
    let init = b.stmt(StmtKind::Decl(vec![(i, Some(Expr::int(10)))]));
    let for_stmt = b.stmt(StmtKind::For {
        init: Some(Box::new(init)),
        cond: Some(Expr::binary(BinOp::Lt, Expr::var(i), Expr::int(50))),
        inc: Some(Expr::unary(UnOp::PostDec, Expr::var(i))),
        body: Box::new(body),
    });
    b.function("kernel", vec![bb, v], vec![for_stmt]);

    let converted = b.convert()?;
    let fors = find_nodes(&converted, |kind| matches!(kind, NodeKind::ForStmt { .. }));
    assert_eq!(fors.len(), 1, "the loop must normalize");

    let Some(Annotation::Scop(region)) = converted
        .builder
        .mgr
        .annotation(fors[0], AnnotationKey::Scop)
    else {
        panic!("the loop must be a SCoP");
    };
    // (i | b | 1)
    assert_eq!(region.iter_vec.iterators.len(), 1);
    assert_eq!(region.iter_vec.params.len(), 1);
    // i >= 10 and i < 50
    let Some(ConstraintTree::And(parts)) = &region.constraints else {
        panic!("expected two bound constraints");
    };
    let ConstraintTree::Atom(lower) = &parts[0] else {
        panic!("expected atom");
    };
    assert_eq!(lower.op, ConstraintOp::Ge);
    assert_eq!(lower.func.constant(), -10);
    let ConstraintTree::Atom(upper) = &parts[1] else {
        panic!("expected atom");
    };
    assert_eq!(upper.op, ConstraintOp::Lt);
    assert_eq!(upper.func.constant(), -50);
    Ok(())
}

/// S3: a non-affine subscript disqualifies the loop while the inner
/// branch still qualifies, with the iterator demoted to a parameter.
#[test]
fn test_for_containing_partial_scop() -> Result<()> {
    let mut b = UnitBuilder::new();
    let bb = b.param("b", SrcType::int());
    let n = b.param("n", SrcType::int());
    let v = b.param("v", SrcType::pointer_to(SrcType::int()));
    let h = b.local("h", SrcType::int());
    let i = b.local("i", SrcType::int());

    let inner_then = {
        let store = b.stmt(StmtKind::Expr(Expr::binary(
            BinOp::Assign,
            Expr::var(h),
            Expr::index(
                Expr::var(v),
                Expr::binary(
                    BinOp::Sub,
                    Expr::binary(BinOp::Add, Expr::var(n), Expr::var(i)),
                    Expr::int(1),
                ),
            ),
        )));
        b.stmt(StmtKind::Compound(vec![store]))
    };
    let inner_if = b.stmt(StmtKind::If {
        cond_decl: None,
        cond: Expr::binary(BinOp::Gt, Expr::var(i), Expr::int(25)),
        then_branch: Box::new(inner_then),
        else_branch: None,
    });
    let outer_access = b.stmt(StmtKind::Expr(Expr::index(
        Expr::var(v),
        Expr::binary(BinOp::Mul, Expr::var(i), Expr::var(bb)),
    )));
    let body = b.stmt(StmtKind::Compound(vec![outer_access, inner_if]));
    let init = b.stmt(StmtKind::Decl(vec![(i, Some(Expr::int(10)))]));
    let h_decl = b.stmt(StmtKind::Decl(vec![(h, Some(Expr::int(0)))]));
    let for_stmt = b.stmt(StmtKind::For {
        init: Some(Box::new(init)),
        cond: Some(Expr::binary(BinOp::Lt, Expr::var(i), Expr::int(50))),
        inc: Some(Expr::unary(UnOp::PostInc, Expr::var(i))),
        body: Box::new(body),
    });
    b.function("kernel", vec![bb, n, v], vec![h_decl, for_stmt]);

    let converted = b.convert()?;
    let fors = find_nodes(&converted, |kind| matches!(kind, NodeKind::ForStmt { .. }));
    assert_eq!(fors.len(), 1);
    // i*b is not affine
    assert!(!converted
        .builder
        .mgr
        .has_annotation(fors[0], AnnotationKey::Scop));

    let ifs = find_nodes(&converted, |kind| matches!(kind, NodeKind::IfStmt { .. }));
    assert_eq!(ifs.len(), 1);
    let NodeKind::IfStmt { then_body, .. } = converted.builder.mgr.kind(ifs[0]).clone() else {
        unreachable!();
    };
    let Some(Annotation::Scop(region)) = converted
        .builder
        .mgr
        .annotation(then_body, AnnotationKey::Scop)
    else {
        panic!("inner branch must carry a SCoP region");
    };
    // no analyzed iterators; i joined the parameters
    assert!(region.iter_vec.iterators.is_empty());
    assert_eq!(region.iter_vec.params.len(), 2);
    let Some(ConstraintTree::Atom(constraint)) = &region.constraints else {
        panic!("expected a single constraint");
    };
    assert_eq!(constraint.op, ConstraintOp::Gt);
    assert_eq!(constraint.func.constant(), -25);
    Ok(())
}

/// S4: return-type deduction instantiates the type variable.
#[test]
fn test_return_type_deduction() {
    let mut mgr = inspire::ir::NodeManager::new();
    let basic = inspire::ir::lang::Basic::new(&mut mgr);
    let alpha = inspire::ir::lang::type_var(&mut mgr, "a");
    let fn_ty = inspire::ir::lang::function_type(&mut mgr, vec![alpha, basic.int4], alpha);

    let deduced = inspire::types::deduce_return_type(&mut mgr, fn_ty, &[basic.real8, basic.int4]);
    assert_eq!(deduced, basic.real8);
}

/// S5: pointer arithmetic becomes an array view, not an addition.
#[test]
fn test_array_view_pointer_arithmetic() -> Result<()> {
    let mut b = UnitBuilder::new();
    let p = b.param("p", SrcType::pointer_to(SrcType::int()));
    let k = b.param("k", SrcType::int());
    let shift = b.stmt(StmtKind::Expr(Expr::binary(
        BinOp::Add,
        Expr::var(p),
        Expr::var(k),
    )));
    b.function("shift", vec![p, k], vec![shift]);

    let converted = b.convert()?;
    let views = find_nodes(&converted, |kind| {
        matches!(
            kind,
            NodeKind::CallExpr { func, .. }
                if matches!(
                    converted.builder.mgr.kind(*func),
                    NodeKind::Literal { value, .. } if value == "array.view"
                )
        )
    });
    assert_eq!(views.len(), 1);
    let ty = converted.builder.mgr.expr_type(views[0]).unwrap();
    assert_eq!(
        inspire::ir::printer::print(&converted.builder.mgr, ty),
        "ref<array<int<4>,1>>"
    );
    // no int.add over the pointer anywhere
    let adds = find_nodes(&converted, |kind| {
        matches!(
            kind,
            NodeKind::Literal { value, .. } if value == "int.add"
        )
    });
    assert!(adds.is_empty());
    Ok(())
}

/// S6: a cast malloc lowers to ref.new(array.create.1D(...)) with the
/// element count recovered from the sizeof witness.
#[test]
fn test_malloc_lowering() -> Result<()> {
    let mut b = UnitBuilder::new();
    let n = b.param("n", SrcType::int());
    let p = b.local("p", SrcType::pointer_to(SrcType::int()));

    let allocation = Expr::new(ExprKind::Cast {
        ty: SrcType::pointer_to(SrcType::int()),
        sub: Box::new(Expr::call(
            Expr::new(ExprKind::Func(inspire::frontend::ast::FuncId(0))),
            vec![Expr::binary(
                BinOp::Mul,
                Expr::var(n),
                Expr::new(ExprKind::SizeofType(SrcType::int())),
            )],
        )),
    });
    b.unit.add_function(FuncDecl {
        name: "malloc".into(),
        params: vec![],
        ret: SrcType::pointer_to(SrcType::Void),
        body: None,
        variadic: false,
        span: Span::default(),
    });
    let decl = b.stmt(StmtKind::Decl(vec![(p, Some(allocation))]));
    b.function("allocate", vec![n], vec![decl]);

    let converted = b.convert()?;
    let news = find_nodes(&converted, |kind| {
        matches!(
            kind,
            NodeKind::CallExpr { func, .. }
                if matches!(
                    converted.builder.mgr.kind(*func),
                    NodeKind::Literal { value, .. } if value == "ref.new"
                )
        )
    });
    assert_eq!(news.len(), 1);

    let NodeKind::CallExpr { args, .. } = converted.builder.mgr.kind(news[0]).clone() else {
        unreachable!();
    };
    let NodeKind::CallExpr {
        func: create,
        args: create_args,
        ..
    } = converted.builder.mgr.kind(args[0]).clone()
    else {
        panic!("expected array.create.1D under ref.new");
    };
    assert!(matches!(
        converted.builder.mgr.kind(create),
        NodeKind::Literal { value, .. } if value == "array.create.1D"
    ));
    // the type witness names the element type
    assert!(matches!(
        converted.builder.mgr.kind(create_args[0]),
        NodeKind::Literal { value, .. } if value.contains("int<4>")
    ));
    // the element count is n itself, not a division
    let printed = inspire::ir::printer::print(&converted.builder.mgr, create_args[1]);
    assert!(!printed.contains("div"), "got {printed}");
    Ok(())
}
