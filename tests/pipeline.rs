//! A whole program through front end, analysis and back end: globals,
//! mutual recursion, an OpenMP pragma, and target code emission.

use anyhow::Result;

use inspire::analysis;
use inspire::backend::{TargetCode, TypeManager};
use inspire::frontend::ast::{
    BinOp, Expr, ExprKind, FuncDecl, MatchValue, Pragma, SrcType, Stmt, StmtId, StmtKind,
    Storage, TranslationUnit, UnOp, VarDecl,
};
use inspire::frontend::{self, ConversionSetup};
use inspire::ir::annotations::AnnotationKey;
use inspire::ir::visitor::{self, VisitOrder};
use inspire::ir::NodeKind;
use inspire::span::Span;

fn stmt(id: u32, kind: StmtKind) -> Stmt {
    Stmt::new(StmtId(id), kind)
}

/// Roughly:
/// ```c
/// int total;
///
/// int weigh(int n) { if (n <= 0) return 0; return balance(n - 1); }
/// int balance(int n) { return weigh(n - 1); }
///
/// int main() {
///     #pragma omp parallel for
///     for (int i = 0; i < 100; i++) { total += weigh(i); }
///     return total;
/// }
/// ```
fn build_unit() -> TranslationUnit {
    let mut unit = TranslationUnit::new("pipeline.c");

    let total = unit.add_var(VarDecl {
        name: "total".into(),
        ty: SrcType::int(),
        storage: Storage::Global,
        init: Some(Expr::int(0)),
        span: Span::default(),
    });

    let n_weigh = unit.add_var(VarDecl {
        name: "n".into(),
        ty: SrcType::int(),
        storage: Storage::Param,
        init: None,
        span: Span::default(),
    });
    let n_balance = unit.add_var(VarDecl {
        name: "n".into(),
        ty: SrcType::int(),
        storage: Storage::Param,
        init: None,
        span: Span::default(),
    });
    let i = unit.add_var(VarDecl {
        name: "i".into(),
        ty: SrcType::int(),
        storage: Storage::Local,
        init: None,
        span: Span::default(),
    });

    let weigh = unit.add_function(FuncDecl {
        name: "weigh".into(),
        params: vec![n_weigh],
        ret: SrcType::int(),
        body: None,
        variadic: false,
        span: Span::default(),
    });
    let balance = unit.add_function(FuncDecl {
        name: "balance".into(),
        params: vec![n_balance],
        ret: SrcType::int(),
        body: None,
        variadic: false,
        span: Span::default(),
    });

    unit.functions[weigh.index()].body = Some(stmt(
        1,
        StmtKind::Compound(vec![
            stmt(
                2,
                StmtKind::If {
                    cond_decl: None,
                    cond: Expr::binary(BinOp::Le, Expr::var(n_weigh), Expr::int(0)),
                    then_branch: Box::new(stmt(3, StmtKind::Return(Some(Expr::int(0))))),
                    else_branch: None,
                },
            ),
            stmt(
                4,
                StmtKind::Return(Some(Expr::call(
                    Expr::new(ExprKind::Func(balance)),
                    vec![Expr::binary(BinOp::Sub, Expr::var(n_weigh), Expr::int(1))],
                ))),
            ),
        ]),
    ));
    unit.functions[balance.index()].body = Some(stmt(
        5,
        StmtKind::Return(Some(Expr::call(
            Expr::new(ExprKind::Func(weigh)),
            vec![Expr::binary(BinOp::Sub, Expr::var(n_balance), Expr::int(1))],
        ))),
    ));

    let loop_body = stmt(
        6,
        StmtKind::Compound(vec![stmt(
            7,
            StmtKind::Expr(Expr::binary(
                BinOp::AddAssign,
                Expr::var(total),
                Expr::call(Expr::new(ExprKind::Func(weigh)), vec![Expr::var(i)]),
            )),
        )]),
    );
    let for_loop = stmt(
        8,
        StmtKind::For {
            init: Some(Box::new(stmt(
                9,
                StmtKind::Decl(vec![(i, Some(Expr::int(0)))]),
            ))),
            cond: Some(Expr::binary(BinOp::Lt, Expr::var(i), Expr::int(100))),
            inc: Some(Expr::unary(UnOp::PostInc, Expr::var(i))),
            body: Box::new(loop_body),
        },
    );
    unit.pragmas.insert(
        StmtId(8),
        vec![Pragma {
            family: "parallel for".into(),
            clauses: [(
                "shared".to_string(),
                vec![MatchValue::Ident("total".into())],
            )]
            .into_iter()
            .collect(),
            span: Span::default(),
        }],
    );

    let main = unit.add_function(FuncDecl {
        name: "main".into(),
        params: vec![],
        ret: SrcType::int(),
        body: Some(stmt(
            10,
            StmtKind::Compound(vec![
                for_loop,
                stmt(11, StmtKind::Return(Some(Expr::var(total)))),
            ]),
        )),
        variadic: false,
        span: Span::default(),
    });
    unit.entry_point = Some(main);
    unit
}

#[test]
fn test_whole_program_pipeline() -> Result<()> {
    let unit = build_unit();
    let setup = ConversionSetup::default();
    let mut converted = frontend::convert(&unit, &setup)?;
    analysis::mark_scops(&mut converted.builder.mgr, converted.program);

    let mgr = &converted.builder.mgr;

    // a main program with a single (wrapped) entry point
    let NodeKind::Program { entry_points, main } = mgr.kind(converted.program).clone() else {
        panic!("expected program root");
    };
    assert!(main);
    assert_eq!(entry_points.len(), 1);

    // the mutually recursive helpers share one lambda definition
    let mut definitions = vec![];
    visitor::visit_once(mgr, converted.program, VisitOrder::Prefix, &mut |node| {
        if let NodeKind::LambdaDefinition { bindings } = mgr.kind(node) {
            if bindings.len() == 2 {
                definitions.push(node);
            }
        }
    });
    assert_eq!(definitions.len(), 1, "one shared two-member definition");

    // the parallel-for pragma landed on the normalized loop
    let mut annotated_loops = 0;
    visitor::visit_once(mgr, converted.program, VisitOrder::Prefix, &mut |node| {
        if matches!(mgr.kind(node), NodeKind::ForStmt { .. })
            && mgr.has_annotation(node, AnnotationKey::Omp)
        {
            annotated_loops += 1;
        }
    });
    assert_eq!(annotated_loops, 1);

    // the globals aggregate travels as a leading ref<struct> parameter
    let entry_ty = mgr.expr_type(entry_points[0]).unwrap();
    let printed = inspire::ir::printer::print(mgr, entry_ty);
    assert_eq!(printed, "()->int<4>", "the wrapper hides the aggregate");

    // back end: the entry's type resolves and the emission carries the
    // banner and orders includes first
    let mut types = TypeManager::new();
    let mgr = &mut converted.builder.mgr;
    let info = types.resolve(mgr, entry_ty).unwrap();
    let root = info.definition.or(info.declaration).unwrap();
    let code = TargetCode::new(&types.fragments, &[root]);
    let emitted = code.emit(&types.fragments);
    assert!(emitted.starts_with("// --- Generated Inspire Code ---"));
    assert!(emitted.contains("typedef int32_t (*"));
    Ok(())
}

#[test]
fn test_pretty_printed_program_is_stable() -> Result<()> {
    let unit = build_unit();
    let setup = ConversionSetup::default();
    let mut converted = frontend::convert(&unit, &setup)?;

    let normalized = inspire::ir::printer::normalize(&mut converted.builder.mgr, converted.program);
    let first = inspire::ir::printer::print(&converted.builder.mgr, normalized);
    let second = inspire::ir::printer::print(&converted.builder.mgr, normalized);
    assert_eq!(first, second);
    assert!(first.contains("// main program"));
    Ok(())
}

#[test]
fn test_unit_round_trips_through_serde() -> Result<()> {
    let unit = build_unit();
    let encoded = serde_json::to_string(&unit)?;
    let decoded: TranslationUnit = serde_json::from_str(&encoded)?;

    let setup = ConversionSetup::default();
    let converted = frontend::convert(&decoded, &setup)?;
    assert!(converted.builder.mgr.node_count() > 0);
    Ok(())
}
