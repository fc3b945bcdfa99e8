//! Lowering of functions, including the resolution of mutual recursion.
//!
//! The cache-before-recurse discipline is mandatory here: the placeholder
//! variables of a recursion group are installed before any member body is
//! lowered, so an intra-group call always resolves to its placeholder and
//! never to a partially built lambda.

use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::ir::annotations::Annotation;
use crate::ir::lang;
use crate::ir::NodeId;

use super::ast::{Expr, ExprKind, FuncId, Stmt, StmtKind, SwitchItem};
use super::stmt::stmt_writes_var;
use super::{ir_err, ConversionContext, ConvResult};

impl ConversionContext<'_> {
    /// Lower a function declaration into a `LambdaExpr` (or an opaque
    /// literal for externals and intercepted names).
    pub fn convert_function(&mut self, id: FuncId) -> ConvResult<NodeId> {
        if let Some(cached) = self.fn_map.get(&id) {
            return Ok(*cached);
        }
        // a member of the recursion group being resolved answers with its
        // placeholder, never a partial lambda
        if self.is_resolving_rec_fns {
            if let Some(placeholder) = self.rec_fn_map.get(&id) {
                return Ok(*placeholder);
            }
        }

        let decl = self.unit.function(id).clone();

        // intercepted names stay opaque externals
        if let Some(pattern) = self.setup.intercepts(&decl.name) {
            let pattern = pattern.as_str().to_string();
            let fn_ty = self.function_ir_type(id)?;
            let literal = self.builder.literal(fn_ty, &decl.name);
            self.builder
                .mgr
                .annotate(literal, Annotation::Intercepted(pattern));
            self.fn_map.insert(id, literal);
            return Ok(literal);
        }

        // declarations without definition become named literals
        if decl.body.is_none() {
            let fn_ty = self.function_ir_type(id)?;
            let literal = self.builder.literal(fn_ty, &decl.name);
            self.builder
                .mgr
                .annotate(literal, Annotation::CName(decl.name.clone()));
            self.fn_map.insert(id, literal);
            return Ok(literal);
        }

        let component = self.function_component(id);
        let recursive = component.len() > 1 || self.calls_directly(id, id);

        if !recursive {
            let (fn_ty, params, body) = self.lower_function_body(id)?;
            let lambda = self
                .builder
                .lambda_expr(fn_ty, params, body)
                .map_err(ir_err(&decl.span))?;
            self.builder
                .mgr
                .annotate(lambda, Annotation::CName(decl.name.clone()));
            self.builder
                .mgr
                .annotate(lambda, Annotation::SourceLocation(decl.span.clone()));
            self.fn_map.insert(id, lambda);
            return Ok(lambda);
        }

        debug!(
            "resolving recursive function component of size {} around '{}'",
            component.len(),
            decl.name
        );

        // placeholders first (cache-before-recurse)
        for member in &component {
            let fn_ty = self.function_ir_type(*member)?;
            let placeholder = self.builder.variable(fn_ty);
            self.rec_fn_map.insert(*member, placeholder);
        }

        let was_resolving = self.is_resolving_rec_fns;
        self.is_resolving_rec_fns = true;
        let mut bindings = vec![];
        for member in &component {
            let (fn_ty, params, body) = self.lower_function_body(*member)?;
            let lambda = self
                .builder
                .lambda(fn_ty, params, body)
                .map_err(ir_err(&self.unit.function(*member).span))?;
            bindings.push((self.rec_fn_map[member], lambda));
        }
        self.is_resolving_rec_fns = was_resolving;

        let definition = self
            .builder
            .lambda_definition(bindings)
            .map_err(ir_err(&decl.span))?;

        // every member of the component is cached, not only the requested
        // one
        for member in &component {
            let member_decl = self.unit.function(*member);
            let name = member_decl.name.clone();
            let span = member_decl.span.clone();
            let expr = self
                .builder
                .lambda_expr_rec(self.rec_fn_map[member], definition)
                .map_err(ir_err(&span))?;
            self.builder.mgr.annotate(expr, Annotation::CName(name));
            self.builder
                .mgr
                .annotate(expr, Annotation::SourceLocation(span));
            self.fn_map.insert(*member, expr);
        }

        Ok(self.fn_map[&id])
    }

    /// The IR function type of a declaration, globals prefix and variadic
    /// tail included.
    pub(crate) fn function_ir_type(&mut self, id: FuncId) -> ConvResult<NodeId> {
        let decl = self.unit.function(id).clone();
        let mut params = vec![];
        if self.function_uses_globals(id) {
            let aggregate = self
                .globals
                .as_ref()
                .map(|info| info.struct_ty)
                .unwrap_or_else(|| unreachable!("globals user without aggregate"));
            params.push(lang::ref_type(&mut self.builder.mgr, aggregate));
        }
        for param in &decl.params {
            let ty = self.unit.var(*param).ty.clone();
            params.push(self.convert_parameter_type(&ty, &decl.span)?);
        }
        if decl.variadic {
            params.push(self.builder.basic.var_list);
        }
        let ret = self.convert_type(&decl.ret, &decl.span)?;
        Ok(lang::function_type(&mut self.builder.mgr, params, ret))
    }

    /// Lower parameters, the globals prefix and the body of a function.
    fn lower_function_body(
        &mut self,
        id: FuncId,
    ) -> ConvResult<(NodeId, Vec<NodeId>, NodeId)> {
        let decl = self.unit.function(id).clone();
        let body = decl
            .body
            .as_ref()
            .unwrap_or_else(|| unreachable!("lowering a body-less function"));

        let saved_wraps = std::mem::take(&mut self.wrap_ref_map);
        let saved_globals_var = self.current_globals_var.take();
        let saved_ret = self.current_ret_ty.take();

        let mut params = vec![];
        if self.function_uses_globals(id) {
            let aggregate = self
                .globals
                .as_ref()
                .map(|info| info.struct_ty)
                .unwrap_or_else(|| unreachable!("globals user without aggregate"));
            let handle_ty = lang::ref_type(&mut self.builder.mgr, aggregate);
            let handle = self.builder.variable(handle_ty);
            self.current_globals_var = Some(handle);
            params.push(handle);
        }

        let mut prelude = vec![];
        for param in &decl.params {
            let var_decl = self.unit.var(*param).clone();
            let ty = self.convert_parameter_type(&var_decl.ty, &var_decl.span)?;
            let var_ir = self.builder.variable(ty);
            self.builder
                .mgr
                .annotate(var_ir, Annotation::CName(var_decl.name));
            self.var_map.insert(*param, var_ir);
            params.push(var_ir);

            // a parameter the body assigns to is wrapped into a local ref
            if stmt_writes_var(body, *param) {
                let location = self.builder.ref_var(var_ir).map_err(ir_err(&var_decl.span))?;
                let location_ty = self
                    .builder
                    .expr_type(location)
                    .map_err(ir_err(&var_decl.span))?;
                let wrapped = self.builder.variable(location_ty);
                let stmt = self
                    .builder
                    .decl_stmt(wrapped, location)
                    .map_err(ir_err(&var_decl.span))?;
                self.wrap_ref_map.insert(*param, wrapped);
                prelude.push(stmt);
            }
        }
        if decl.variadic {
            let rest = self.builder.variable(self.builder.basic.var_list);
            params.push(rest);
        }

        self.current_ret_ty = Some(self.convert_type(&decl.ret, &decl.span)?);

        let mut stmts = prelude;
        stmts.extend(self.convert_stmt(body)?);
        let body_ir = self.builder.compound(stmts);

        let ret_ty = self
            .current_ret_ty
            .unwrap_or_else(|| unreachable!("return type just set"));
        let param_types: Vec<NodeId> = params
            .iter()
            .map(|param| {
                self.builder
                    .mgr
                    .expr_type(*param)
                    .unwrap_or_else(|| unreachable!("parameters are typed"))
            })
            .collect();
        let fn_ty = lang::function_type(&mut self.builder.mgr, param_types, ret_ty);

        self.wrap_ref_map = saved_wraps;
        self.current_globals_var = saved_globals_var;
        self.current_ret_ty = saved_ret;

        Ok((fn_ty, params, body_ir))
    }

    // ---- call graph --------------------------------------------------

    /// The strongly connected component of the call graph containing
    /// `start`, in deterministic (id) order.
    fn function_component(&self, start: FuncId) -> Vec<FuncId> {
        let mut graph: DiGraph<FuncId, ()> = DiGraph::new();
        let mut indices: HashMap<FuncId, NodeIndex> = HashMap::new();

        let mut worklist = vec![start];
        while let Some(function) = worklist.pop() {
            if indices.contains_key(&function) {
                continue;
            }
            indices.insert(function, graph.add_node(function));
            for callee in self.callees(function) {
                worklist.push(callee);
            }
        }
        let functions: Vec<FuncId> = indices.keys().copied().collect();
        for function in functions {
            for callee in self.callees(function) {
                graph.add_edge(indices[&function], indices[&callee], ());
            }
        }

        let mut component: Vec<FuncId> = tarjan_scc(&graph)
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .map(|index| graph[index])
                    .collect::<Vec<_>>()
            })
            .find(|members| members.contains(&start))
            .unwrap_or_else(|| vec![start]);
        component.sort();
        component
    }

    fn calls_directly(&self, caller: FuncId, callee: FuncId) -> bool {
        self.callees(caller).contains(&callee)
    }

    /// All functions referenced from the body of `id` (the pre-scan of
    /// the dependency graph construction).
    fn callees(&self, id: FuncId) -> Vec<FuncId> {
        let mut callees = vec![];
        if let Some(body) = &self.unit.function(id).body {
            collect_function_refs_stmt(body, &mut callees);
        }
        // only defined functions participate in recursion resolution
        callees.retain(|callee| self.unit.function(*callee).body.is_some());
        callees
    }
}

fn collect_function_refs_stmt(stmt: &Stmt, out: &mut Vec<FuncId>) {
    match &stmt.kind {
        StmtKind::Compound(children) => {
            for child in children {
                collect_function_refs_stmt(child, out);
            }
        }
        StmtKind::Decl(entries) => {
            for (_, init) in entries {
                if let Some(init) = init {
                    collect_function_refs_expr(init, out);
                }
            }
        }
        StmtKind::If {
            cond_decl,
            cond,
            then_branch,
            else_branch,
        } => {
            if let Some((_, init)) = cond_decl {
                collect_function_refs_expr(init, out);
            }
            collect_function_refs_expr(cond, out);
            collect_function_refs_stmt(then_branch, out);
            if let Some(branch) = else_branch {
                collect_function_refs_stmt(branch, out);
            }
        }
        StmtKind::While {
            cond_decl,
            cond,
            body,
        } => {
            if let Some((_, init)) = cond_decl {
                collect_function_refs_expr(init, out);
            }
            collect_function_refs_expr(cond, out);
            collect_function_refs_stmt(body, out);
        }
        StmtKind::For {
            init,
            cond,
            inc,
            body,
        } => {
            if let Some(init) = init {
                collect_function_refs_stmt(init, out);
            }
            if let Some(cond) = cond {
                collect_function_refs_expr(cond, out);
            }
            if let Some(inc) = inc {
                collect_function_refs_expr(inc, out);
            }
            collect_function_refs_stmt(body, out);
        }
        StmtKind::Switch { cond, body } => {
            collect_function_refs_expr(cond, out);
            for item in body {
                match item {
                    SwitchItem::Case(guard) => collect_function_refs_expr(guard, out),
                    SwitchItem::Default => {}
                    SwitchItem::Stmt(stmt) => collect_function_refs_stmt(stmt, out),
                }
            }
        }
        StmtKind::Return(Some(value)) => collect_function_refs_expr(value, out),
        StmtKind::Expr(expr) => collect_function_refs_expr(expr, out),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Null => {}
    }
}

fn collect_function_refs_expr(expr: &Expr, out: &mut Vec<FuncId>) {
    match &expr.kind {
        ExprKind::Func(id) => out.push(*id),
        ExprKind::Call { callee, args } => {
            collect_function_refs_expr(callee, out);
            for arg in args {
                collect_function_refs_expr(arg, out);
            }
        }
        ExprKind::Unary { sub, .. } => collect_function_refs_expr(sub, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_function_refs_expr(lhs, out);
            collect_function_refs_expr(rhs, out);
        }
        ExprKind::Cast { sub, .. } => collect_function_refs_expr(sub, out),
        ExprKind::Index { base, index } => {
            collect_function_refs_expr(base, out);
            collect_function_refs_expr(index, out);
        }
        ExprKind::Member { base, .. } => collect_function_refs_expr(base, out),
        ExprKind::InitList(items) => {
            for item in items {
                collect_function_refs_expr(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{
        BinOp, FuncDecl, SrcType, Storage, StmtId, TranslationUnit, VarDecl,
    };
    use crate::frontend::ConversionSetup;
    use crate::span::Span;

    use super::*;

    static SETUP: once_cell::sync::Lazy<ConversionSetup> =
        once_cell::sync::Lazy::new(ConversionSetup::default);

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(StmtId(0), kind)
    }

    fn simple_function(unit: &mut TranslationUnit, name: &str, body: Stmt) -> FuncId {
        unit.add_function(FuncDecl {
            name: name.into(),
            params: vec![],
            ret: SrcType::Void,
            body: Some(body),
            variadic: false,
            span: Span::default(),
        })
    }

    #[test]
    fn test_plain_function_becomes_single_lambda() {
        let mut unit = TranslationUnit::new("t.c");
        let f = simple_function(&mut unit, "f", stmt(StmtKind::Compound(vec![])));

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let lowered = ctx.convert_function(f).unwrap();
        let NodeKind::LambdaExpr { var, definition, .. } =
            ctx.builder.mgr.kind(lowered).clone()
        else {
            panic!("expected lambda expr");
        };
        let NodeKind::LambdaDefinition { bindings } =
            ctx.builder.mgr.kind(definition).clone()
        else {
            panic!("expected definition");
        };
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, var);
        // caching: a second conversion is free
        assert_eq!(ctx.convert_function(f).unwrap(), lowered);
    }

    #[test]
    fn test_self_recursion_resolves_to_placeholder() {
        let mut unit = TranslationUnit::new("t.c");
        let f = unit.add_function(FuncDecl {
            name: "loop_forever".into(),
            params: vec![],
            ret: SrcType::Void,
            body: None,
            variadic: false,
            span: Span::default(),
        });
        unit.functions[f.index()].body = Some(stmt(StmtKind::Expr(Expr::call(
            Expr::new(ExprKind::Func(f)),
            vec![],
        ))));

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let lowered = ctx.convert_function(f).unwrap();
        let NodeKind::LambdaExpr { var, definition, .. } =
            ctx.builder.mgr.kind(lowered).clone()
        else {
            panic!("expected lambda expr");
        };
        let NodeKind::LambdaDefinition { bindings } =
            ctx.builder.mgr.kind(definition).clone()
        else {
            panic!("expected definition");
        };
        // the body calls the recursion variable, not the lambda itself
        let NodeKind::Lambda { body, .. } = ctx.builder.mgr.kind(bindings[0].1).clone() else {
            panic!("expected lambda");
        };
        let NodeKind::CompoundStmt { stmts } = ctx.builder.mgr.kind(body).clone() else {
            panic!("expected body");
        };
        let NodeKind::CallExpr { func, .. } = ctx.builder.mgr.kind(stmts[0]).clone() else {
            panic!("expected recursive call");
        };
        assert_eq!(func, var);
    }

    #[test]
    fn test_mutual_recursion_shares_definition() {
        let mut unit = TranslationUnit::new("t.c");
        let even = unit.add_function(FuncDecl {
            name: "is_even".into(),
            params: vec![],
            ret: SrcType::Void,
            body: None,
            variadic: false,
            span: Span::default(),
        });
        let odd = unit.add_function(FuncDecl {
            name: "is_odd".into(),
            params: vec![],
            ret: SrcType::Void,
            body: None,
            variadic: false,
            span: Span::default(),
        });
        unit.functions[even.index()].body = Some(stmt(StmtKind::Expr(Expr::call(
            Expr::new(ExprKind::Func(odd)),
            vec![],
        ))));
        unit.functions[odd.index()].body = Some(stmt(StmtKind::Expr(Expr::call(
            Expr::new(ExprKind::Func(even)),
            vec![],
        ))));

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let lowered_even = ctx.convert_function(even).unwrap();
        // resolving one member caches the whole component
        assert!(ctx.fn_map.contains_key(&odd));
        let lowered_odd = ctx.convert_function(odd).unwrap();

        let NodeKind::LambdaExpr { definition: def_a, .. } =
            ctx.builder.mgr.kind(lowered_even).clone()
        else {
            panic!("expected lambda expr");
        };
        let NodeKind::LambdaExpr { definition: def_b, .. } =
            ctx.builder.mgr.kind(lowered_odd).clone()
        else {
            panic!("expected lambda expr");
        };
        assert_eq!(def_a, def_b);
        let NodeKind::LambdaDefinition { bindings } = ctx.builder.mgr.kind(def_a).clone()
        else {
            panic!("expected definition");
        };
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn test_external_function_is_a_literal() {
        let mut unit = TranslationUnit::new("t.c");
        let printf = unit.add_function(FuncDecl {
            name: "printf".into(),
            params: vec![],
            ret: SrcType::int(),
            body: None,
            variadic: true,
            span: Span::default(),
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let lowered = ctx.convert_function(printf).unwrap();
        let NodeKind::Literal { value, ty } = ctx.builder.mgr.kind(lowered).clone() else {
            panic!("expected literal");
        };
        assert_eq!(value, "printf");
        let NodeKind::FunctionType { params, .. } = ctx.builder.mgr.kind(ty).clone() else {
            panic!("expected function type");
        };
        assert_eq!(params, vec![ctx.builder.basic.var_list]);
    }

    #[test]
    fn test_intercepted_function_stays_opaque() {
        let mut unit = TranslationUnit::new("t.c");
        let f = simple_function(&mut unit, "ocl_create_buffer", stmt(StmtKind::Compound(vec![])));

        let setup = ConversionSetup {
            intercept_patterns: vec![regex::Regex::new("^ocl_.*").unwrap()],
            ..Default::default()
        };
        let mut ctx = ConversionContext::new(&unit, &setup);
        let lowered = ctx.convert_function(f).unwrap();
        assert!(matches!(
            ctx.builder.mgr.kind(lowered),
            NodeKind::Literal { .. }
        ));
        assert!(ctx.builder.mgr.has_annotation(
            lowered,
            crate::ir::annotations::AnnotationKey::Intercepted
        ));
    }

    #[test]
    fn test_assigned_parameter_is_wrapped() {
        let mut unit = TranslationUnit::new("t.c");
        let p = unit.add_var(VarDecl {
            name: "p".into(),
            ty: SrcType::int(),
            storage: Storage::Param,
            init: None,
            span: Span::default(),
        });
        let body = stmt(StmtKind::Compound(vec![stmt(StmtKind::Expr(
            Expr::binary(BinOp::Assign, Expr::var(p), Expr::int(1)),
        ))]));
        let f = unit.add_function(FuncDecl {
            name: "f".into(),
            params: vec![p],
            ret: SrcType::Void,
            body: Some(body),
            variadic: false,
            span: Span::default(),
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let lowered = ctx.convert_function(f).unwrap();
        let NodeKind::LambdaExpr { definition, .. } = ctx.builder.mgr.kind(lowered).clone()
        else {
            panic!("expected lambda expr");
        };
        let NodeKind::LambdaDefinition { bindings } =
            ctx.builder.mgr.kind(definition).clone()
        else {
            panic!("expected definition");
        };
        let NodeKind::Lambda { body, params, .. } =
            ctx.builder.mgr.kind(bindings[0].1).clone()
        else {
            panic!("expected lambda");
        };
        let NodeKind::CompoundStmt { stmts } = ctx.builder.mgr.kind(body).clone() else {
            panic!("expected body");
        };
        // prelude declares the wrapping ref initialized from the parameter
        let NodeKind::DeclarationStmt { init, .. } = ctx.builder.mgr.kind(stmts[0]).clone()
        else {
            panic!("expected wrap declaration");
        };
        let NodeKind::CallExpr { func, args, .. } = ctx.builder.mgr.kind(init).clone() else {
            panic!("expected ref.var");
        };
        assert_eq!(func, ctx.builder.basic.ref_var);
        assert_eq!(args[0], params[0]);
    }
}
