//! The globals aggregate.
//!
//! Global variables are modelled as one explicit struct passed by
//! reference: every function that (transitively) touches a global receives
//! the aggregate as an extra leading parameter, and the program entry
//! point is wrapped into a new main that allocates and initializes it
//! once.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::ir::annotations::Annotation;
use crate::ir::lang;
use crate::ir::{NodeId, NodeKind};
use crate::span::Span;

use super::ast::{Expr, ExprKind, FuncId, Stmt, StmtKind, Storage, SwitchItem, VarId};
use super::{ir_err, ConversionContext, ConversionError, ConvResult};

pub struct GlobalsInfo {
    /// The struct-of-globals type.
    pub struct_ty: NodeId,
    /// Field order of the aggregate.
    pub fields: Vec<(VarId, String)>,
    /// Functions that need the aggregate parameter (direct users plus
    /// everything calling them, transitively).
    pub users: HashSet<FuncId>,
}

impl ConversionContext<'_> {
    /// Build the globals aggregate of the unit, if it declares globals.
    pub fn collect_globals(&mut self) -> ConvResult<()> {
        let globals: Vec<(VarId, String)> = self
            .unit
            .globals()
            .map(|(id, decl)| (id, decl.name.clone()))
            .collect();
        if globals.is_empty() {
            return Ok(());
        }

        let mut entries = vec![];
        for (id, name) in &globals {
            let decl = self.unit.var(*id).clone();
            let lowered = self.convert_type(&decl.ty, &decl.span)?;
            entries.push((name.clone(), lowered));
        }
        let struct_ty = self.builder.mgr.get(NodeKind::StructType { entries });
        self.builder
            .mgr
            .annotate(struct_ty, Annotation::CName("irt_globals".into()));

        let users = self.globals_users();
        debug!(
            "globals aggregate carries {} fields, {} function(s) take the handle",
            globals.len(),
            users.len()
        );

        self.globals = Some(GlobalsInfo {
            struct_ty,
            fields: globals,
            users,
        });
        Ok(())
    }

    pub fn function_uses_globals(&self, id: FuncId) -> bool {
        self.globals
            .as_ref()
            .is_some_and(|info| info.users.contains(&id))
    }

    /// The location of a global: a field of the aggregate the current
    /// function holds by reference.
    pub fn global_lvalue(&mut self, id: VarId, span: &Span) -> ConvResult<NodeId> {
        let handle = self.current_globals_var.ok_or_else(|| {
            ConversionError::Ir(
                crate::ir::IrError::IllFormedNode(crate::ir::builder::IllFormedNode {
                    reason: format!(
                        "global '{}' used without the aggregate in scope",
                        self.unit.var(id).name
                    ),
                }),
                span.clone(),
            )
        })?;
        let decl = self.unit.var(id).clone();
        let field_ty = self.convert_type(&decl.ty, &decl.span)?;
        let selector =
            lang::identifier_literal(&mut self.builder.mgr, &self.builder.basic, &decl.name);
        let field_lit = lang::type_literal(&mut self.builder.mgr, field_ty);
        self.builder
            .call_expr(
                self.builder.basic.composite_ref_elem,
                vec![handle, selector, field_lit],
            )
            .map_err(ir_err(span))
    }

    /// Wrap the entry point into a new main that declares and initializes
    /// the globals aggregate and forwards to the original.
    pub fn wrap_entry_point(&mut self, main: FuncId, entry: NodeId) -> ConvResult<NodeId> {
        if !self.function_uses_globals(main) {
            return Ok(entry);
        }
        let info_struct_ty = self
            .globals
            .as_ref()
            .map(|info| info.struct_ty)
            .unwrap_or_else(|| unreachable!("globals user without aggregate"));
        let fields = self
            .globals
            .as_ref()
            .map(|info| info.fields.clone())
            .unwrap_or_default();

        let decl = self.unit.function(main).clone();
        let span = decl.span.clone();

        // the aggregate value: declared initializers, undefined otherwise
        let mut field_values = vec![];
        let NodeKind::StructType { entries } = self.builder.mgr.kind(info_struct_ty).clone()
        else {
            unreachable!("aggregate is a struct");
        };
        for ((var, _), (_, field_ty)) in fields.iter().zip(entries) {
            let init = self.unit.var(*var).init.clone();
            let value = match init {
                Some(init) => self.convert_init(field_ty, &init)?,
                None => {
                    let type_lit = lang::type_literal(&mut self.builder.mgr, field_ty);
                    self.builder
                        .call_expr(self.builder.basic.undefined, vec![type_lit])
                        .map_err(ir_err(&span))?
                }
            };
            field_values.push(value);
        }
        let aggregate = self
            .builder
            .struct_expr(info_struct_ty, field_values)
            .map_err(ir_err(&span))?;

        // decl ref<struct> globals = ref.var(aggregate)
        let location = self.builder.ref_var(aggregate).map_err(ir_err(&span))?;
        let location_ty = self.builder.expr_type(location).map_err(ir_err(&span))?;
        let handle = self.builder.variable(location_ty);
        let handle_decl = self
            .builder
            .decl_stmt(handle, location)
            .map_err(ir_err(&span))?;

        // fresh parameters mirroring the original signature
        let mut params = vec![];
        for param in &decl.params {
            let ty = self.unit.var(*param).ty.clone();
            let lowered = self.convert_parameter_type(&ty, &span)?;
            params.push(self.builder.variable(lowered));
        }

        let mut args = vec![handle];
        args.extend(params.iter().copied());
        let forward = self.builder.call_expr(entry, args).map_err(ir_err(&span))?;

        let ret_ty = self.convert_type(&decl.ret, &span)?;
        let body = if ret_ty == self.builder.basic.unit {
            self.builder.compound(vec![handle_decl, forward])
        } else {
            let ret = self.builder.return_stmt(forward);
            self.builder.compound(vec![handle_decl, ret])
        };

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
        let wrapper = self
            .builder
            .lambda_expr(fn_ty, params, body)
            .map_err(ir_err(&span))?;
        self.builder
            .mgr
            .annotate(wrapper, Annotation::CName(decl.name));
        Ok(wrapper)
    }

    /// Direct global users, closed under "calls a user".
    fn globals_users(&self) -> HashSet<FuncId> {
        let mut users: HashSet<FuncId> = HashSet::new();
        let mut callees: HashMap<FuncId, Vec<FuncId>> = HashMap::new();

        for (index, function) in self.unit.functions.iter().enumerate() {
            let id = FuncId(index as u32);
            let Some(body) = &function.body else {
                continue;
            };
            let mut touches_global = false;
            visit_stmt_exprs(body, &mut |expr| {
                if let ExprKind::Var(var) = &expr.kind {
                    if self.unit.var(*var).storage == Storage::Global {
                        touches_global = true;
                    }
                }
                if let ExprKind::Func(callee) = &expr.kind {
                    callees.entry(id).or_default().push(*callee);
                }
            });
            if touches_global {
                users.insert(id);
            }
        }

        // propagate to callers until stable
        loop {
            let mut changed = false;
            for (caller, called) in &callees {
                if !users.contains(caller) && called.iter().any(|callee| users.contains(callee)) {
                    users.insert(*caller);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        users
    }
}

/// Apply `f` to every expression node (including nested sub-expressions)
/// of a statement tree.
pub(crate) fn visit_stmt_exprs(stmt: &Stmt, f: &mut impl FnMut(&Expr)) {
    match &stmt.kind {
        StmtKind::Compound(children) => {
            for child in children {
                visit_stmt_exprs(child, f);
            }
        }
        StmtKind::Decl(entries) => {
            for (_, init) in entries {
                if let Some(init) = init {
                    visit_expr(init, f);
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
                visit_expr(init, f);
            }
            visit_expr(cond, f);
            visit_stmt_exprs(then_branch, f);
            if let Some(branch) = else_branch {
                visit_stmt_exprs(branch, f);
            }
        }
        StmtKind::While {
            cond_decl,
            cond,
            body,
        } => {
            if let Some((_, init)) = cond_decl {
                visit_expr(init, f);
            }
            visit_expr(cond, f);
            visit_stmt_exprs(body, f);
        }
        StmtKind::For {
            init,
            cond,
            inc,
            body,
        } => {
            if let Some(init) = init {
                visit_stmt_exprs(init, f);
            }
            if let Some(cond) = cond {
                visit_expr(cond, f);
            }
            if let Some(inc) = inc {
                visit_expr(inc, f);
            }
            visit_stmt_exprs(body, f);
        }
        StmtKind::Switch { cond, body } => {
            visit_expr(cond, f);
            for item in body {
                match item {
                    SwitchItem::Case(guard) => visit_expr(guard, f),
                    SwitchItem::Default => {}
                    SwitchItem::Stmt(stmt) => visit_stmt_exprs(stmt, f),
                }
            }
        }
        StmtKind::Return(Some(value)) => visit_expr(value, f),
        StmtKind::Expr(expr) => visit_expr(expr, f),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Null => {}
    }
}

pub(crate) fn visit_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            visit_expr(callee, f);
            for arg in args {
                visit_expr(arg, f);
            }
        }
        ExprKind::Unary { sub, .. } => visit_expr(sub, f),
        ExprKind::Binary { lhs, rhs, .. } => {
            visit_expr(lhs, f);
            visit_expr(rhs, f);
        }
        ExprKind::Cast { sub, .. } => visit_expr(sub, f),
        ExprKind::Index { base, index } => {
            visit_expr(base, f);
            visit_expr(index, f);
        }
        ExprKind::Member { base, .. } => visit_expr(base, f),
        ExprKind::InitList(items) => {
            for item in items {
                visit_expr(item, f);
            }
        }
        _ => {}
    }
}
