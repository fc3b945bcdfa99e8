//! Lowering of source statements into IR, including control-flow
//! normalization.
//!
//! One source statement can lower into several IR statements (lifted
//! condition declarations, stray switch statements, the post-loop
//! assignment of a normalized for). The parent compound flattens them in
//! source order. OpenMP pragmas and source locations attach to the primary
//! statement of the group.

use log::debug;

use crate::ir::annotations::Annotation;
use crate::ir::builder::{IllFormedNode, IrError};
use crate::ir::lang::{self, BasicOp};
use crate::ir::{replacer, NodeId, NodeKind};
use crate::span::Span;

use super::ast::{BinOp, Expr, ExprKind, SrcType, Stmt, StmtKind, SwitchItem, UnOp, VarId};
use super::{ir_err, ConversionContext, ConversionError, ConvResult};

impl ConversionContext<'_> {
    /// Lower one source statement into its IR statement sequence.
    pub fn convert_stmt(&mut self, stmt: &Stmt) -> ConvResult<Vec<NodeId>> {
        let (mut stmts, primary) = self.convert_stmt_inner(stmt)?;
        if let Some(primary) = primary {
            self.builder
                .mgr
                .annotate(primary, Annotation::SourceLocation(stmt.span.clone()));
            if let Some(annotated) = self.attach_pragmas(stmt, primary)? {
                if annotated != primary {
                    let position = stmts
                        .iter()
                        .rposition(|candidate| *candidate == primary)
                        .unwrap_or_else(|| unreachable!("primary statement is in the group"));
                    stmts[position] = annotated;
                }
            }
        } else if self.unit.pragmas.contains_key(&stmt.id) {
            // standalone directives (barrier, taskwait, ...) attach to a
            // marker over the empty statement
            let carrier = self.builder.no_op();
            let marked = self.builder.mgr.get(NodeKind::MarkerStmt {
                sub: carrier,
                id: crate::ir::manager::fresh_id(),
            });
            if let Some(annotated) = self.attach_pragmas(stmt, marked)? {
                stmts.push(annotated);
            }
        }
        Ok(stmts)
    }

    /// Lower a statement in body position into exactly one IR statement.
    pub fn convert_body(&mut self, stmt: &Stmt) -> ConvResult<NodeId> {
        let mut stmts = self.convert_stmt(stmt)?;
        Ok(match stmts.len() {
            1 => stmts.remove(0),
            _ => self.builder.compound(stmts),
        })
    }

    fn convert_stmt_inner(&mut self, stmt: &Stmt) -> ConvResult<(Vec<NodeId>, Option<NodeId>)> {
        let span = &stmt.span;
        match &stmt.kind {
            StmtKind::Compound(children) => {
                let mut stmts = vec![];
                for child in children {
                    stmts.extend(self.convert_stmt(child)?);
                }
                let compound = self.builder.compound(stmts);
                Ok((vec![compound], Some(compound)))
            }
            StmtKind::Decl(entries) => {
                let mut stmts = vec![];
                for (var, init) in entries {
                    stmts.push(self.convert_declaration(*var, init.as_ref(), span)?);
                }
                let primary = stmts.last().copied();
                Ok((stmts, primary))
            }
            StmtKind::If {
                cond_decl,
                cond,
                then_branch,
                else_branch,
            } => {
                let mut stmts = vec![];
                if let Some((var, init)) = cond_decl {
                    // the declaration is lifted into the enclosing compound
                    stmts.push(self.convert_declaration(*var, Some(init), span)?);
                }
                let cond_ir = self.convert_expr(cond)?;
                let cond_ir = self.to_bool(cond_ir, span)?;
                let then_ir = self.convert_body(then_branch)?;
                let else_ir = match else_branch {
                    Some(branch) => Some(self.convert_body(branch)?),
                    None => None,
                };
                let if_ir = self
                    .builder
                    .if_stmt(cond_ir, then_ir, else_ir)
                    .map_err(ir_err(span))?;
                stmts.push(if_ir);
                Ok((stmts, Some(if_ir)))
            }
            StmtKind::While {
                cond_decl,
                cond,
                body,
            } => {
                let mut stmts = vec![];
                if let Some((var, init)) = cond_decl {
                    stmts.push(self.convert_declaration(*var, Some(init), span)?);
                }
                let cond_ir = self.convert_expr(cond)?;
                let cond_ir = self.to_bool(cond_ir, span)?;
                let body_ir = self.convert_body(body)?;
                let while_ir = self
                    .builder
                    .while_stmt(cond_ir, body_ir)
                    .map_err(ir_err(span))?;
                stmts.push(while_ir);
                Ok((stmts, Some(while_ir)))
            }
            StmtKind::For {
                init,
                cond,
                inc,
                body,
            } => self.convert_for(init.as_deref(), cond.as_ref(), inc.as_ref(), body, span),
            StmtKind::Switch { cond, body } => self.convert_switch(cond, body, span),
            StmtKind::Break => {
                let ir = self.builder.break_stmt();
                Ok((vec![ir], Some(ir)))
            }
            StmtKind::Continue => {
                let ir = self.builder.continue_stmt();
                Ok((vec![ir], Some(ir)))
            }
            StmtKind::Return(value) => {
                let value_ir = match value {
                    Some(expr) => {
                        let lowered = self.convert_expr(expr)?;
                        // wrap into the declared return type
                        match self.current_ret_ty {
                            Some(ret_ty) => self
                                .builder
                                .convert_argument(ret_ty, lowered)
                                .map_err(ir_err(span))?,
                            None => lowered,
                        }
                    }
                    None => self.builder.basic.unit_const,
                };
                let ir = self.builder.return_stmt(value_ir);
                Ok((vec![ir], Some(ir)))
            }
            StmtKind::Expr(expr) => {
                let ir = self.convert_expr(expr)?;
                Ok((vec![ir], Some(ir)))
            }
            StmtKind::Null => Ok((vec![], None)),
        }
    }

    // ---- declarations ------------------------------------------------

    /// Lower one declarator: the declared local becomes a `ref` cell
    /// initialized from the (possibly defaulted) initializer.
    fn convert_declaration(
        &mut self,
        var: VarId,
        init: Option<&Expr>,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let decl = self.unit.var(var).clone();
        let (canonical, _) = self.unit.desugar(&decl.ty);
        let lowered_ty = self.convert_type(&decl.ty, span)?;

        let value = match (&canonical, init) {
            // a variable-sized array: the retained size expression turns
            // into the allocation count
            (SrcType::VariableArray(element), Some(size)) => {
                let element_ir = self.convert_type(element, span)?;
                let type_lit = lang::type_literal(&mut self.builder.mgr, element_ir);
                let count = self.convert_expr(size)?;
                let count = self
                    .builder
                    .convert_argument(self.builder.basic.uint8, count)
                    .map_err(ir_err(span))?;
                self.builder
                    .call_expr(self.builder.basic.array_create_1d, vec![type_lit, count])
                    .map_err(ir_err(span))?
            }
            (_, Some(init)) => self.convert_init(lowered_ty, init)?,
            (_, None) => {
                let type_lit = lang::type_literal(&mut self.builder.mgr, lowered_ty);
                self.builder
                    .call_expr(self.builder.basic.undefined, vec![type_lit])
                    .map_err(ir_err(span))?
            }
        };

        let location = self.builder.ref_var(value).map_err(ir_err(span))?;
        let location_ty = self.builder.expr_type(location).map_err(ir_err(span))?;
        let var_ir = self.builder.variable(location_ty);
        self.builder
            .mgr
            .annotate(var_ir, Annotation::CName(decl.name));
        self.var_map.insert(var, var_ir);
        self.builder.decl_stmt(var_ir, location).map_err(ir_err(span))
    }

    // ---- switch ------------------------------------------------------

    fn convert_switch(
        &mut self,
        cond: &Expr,
        body: &[SwitchItem],
        span: &Span,
    ) -> ConvResult<(Vec<NodeId>, Option<NodeId>)> {
        let mut stmts = vec![];

        // the discriminator is evaluated exactly once
        let value = self.convert_expr(cond)?;
        let value_ty = self.builder.expr_type(value).map_err(ir_err(span))?;
        let selector = self.builder.variable(value_ty);
        stmts.push(self.builder.decl_stmt(selector, value).map_err(ir_err(span))?);

        let mut cases: Vec<(NodeId, NodeId)> = vec![];
        let mut default: Option<NodeId> = None;
        let mut current: Option<(Option<NodeId>, Vec<NodeId>)> = None;

        let mut flush =
            |ctx: &mut Self, current: &mut Option<(Option<NodeId>, Vec<NodeId>)>| {
                if let Some((guard, body)) = current.take() {
                    let body = ctx.builder.compound(body);
                    match guard {
                        Some(guard) => cases.push((guard, body)),
                        None => default = Some(body),
                    }
                }
            };

        for item in body {
            match item {
                SwitchItem::Case(guard) => {
                    flush(self, &mut current);
                    let guard_ir = self.convert_expr(guard)?;
                    if !matches!(self.builder.mgr.kind(guard_ir), NodeKind::Literal { .. }) {
                        return Err(ConversionError::Ir(
                            IrError::IllFormedNode(IllFormedNode {
                                reason: "switch case guard is not a constant".into(),
                            }),
                            span.clone(),
                        ));
                    }
                    current = Some((Some(guard_ir), vec![]));
                }
                SwitchItem::Default => {
                    flush(self, &mut current);
                    current = Some((None, vec![]));
                }
                SwitchItem::Stmt(stmt) => {
                    let lowered = self.convert_stmt(stmt)?;
                    match &mut current {
                        Some((_, body)) => body.extend(lowered),
                        // stray statements before the first label are
                        // lifted in front of the switch
                        None => stmts.extend(lowered),
                    }
                }
            }
        }
        flush(self, &mut current);

        let switch_ir = self
            .builder
            .switch_stmt(selector, cases, default)
            .map_err(ir_err(span))?;
        stmts.push(switch_ir);
        Ok((stmts, Some(switch_ir)))
    }

    // ---- for-loop normalization --------------------------------------

    fn convert_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        inc: Option<&Expr>,
        body: &Stmt,
        span: &Span,
    ) -> ConvResult<(Vec<NodeId>, Option<NodeId>)> {
        if init.is_some() {
            if let Some(normalized) = self.try_normalize_for(init, cond, inc, body, span)? {
                return Ok((normalized.0, Some(normalized.1)));
            }
            debug!("for loop at {span} is not affine, falling back to while form");
        }
        self.convert_for_as_while(init, cond, inc, body, span)
    }

    /// The general fallback: `{ init; while (cond) { body; inc; } }`.
    fn convert_for_as_while(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        inc: Option<&Expr>,
        body: &Stmt,
        span: &Span,
    ) -> ConvResult<(Vec<NodeId>, Option<NodeId>)> {
        let mut stmts = vec![];
        if let Some(init) = init {
            stmts.extend(self.convert_stmt(init)?);
        }

        let cond_ir = match cond {
            Some(cond) => {
                let lowered = self.convert_expr(cond)?;
                self.to_bool(lowered, span)?
            }
            None => self.builder.bool_lit(true),
        };

        let mut body_stmts = self.convert_stmt(body)?;
        if let Some(inc) = inc {
            body_stmts.push(self.convert_expr(inc)?);
        }
        let body_ir = self.builder.compound(body_stmts);
        let while_ir = self
            .builder
            .while_stmt(cond_ir, body_ir)
            .map_err(ir_err(span))?;
        stmts.push(while_ir);
        Ok((stmts, Some(while_ir)))
    }

    /// Analyze `init`/`cond`/`inc` for a single affine induction. `None`
    /// when the loop cannot be brought into normal form.
    fn try_normalize_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        inc: Option<&Expr>,
        body: &Stmt,
        span: &Span,
    ) -> ConvResult<Option<(Vec<NodeId>, NodeId)>> {
        let (Some(init), Some(cond), Some(inc)) = (init, cond, inc) else {
            return Ok(None);
        };

        // the induction variable and its lower bound
        let Some(analysis) = analyze_induction(init, cond, inc) else {
            return Ok(None);
        };

        // only integral induction variables normalize; pointers and reals
        // fall back
        let (canonical, _) = self.unit.desugar(&self.unit.var(analysis.var).ty);
        if !matches!(canonical, SrcType::Int { .. }) {
            return Ok(None);
        }
        // bounds must be evaluated once, and the body must not write the
        // iterator
        if expr_has_side_effects(&analysis.lower)
            || expr_has_side_effects(&analysis.bound)
            || expr_mentions_var(&analysis.bound, analysis.var)
            || stmt_writes_var(body, analysis.var)
        {
            return Ok(None);
        }

        let mut stmts = vec![];

        // multi-declarator init: everything but the induction variable is
        // lifted in front of the loop
        if let StmtKind::Decl(entries) = &init.kind {
            for (var, entry_init) in entries {
                if *var != analysis.var {
                    stmts.push(self.convert_declaration(*var, entry_init.as_ref(), span)?);
                }
            }
        }

        let iter_ty = self.convert_type(&self.unit.var(analysis.var).ty, span)?;

        // occurrences of the induction variable lower to a placeholder,
        // which is then exchanged for the fresh iterator via the
        // scope-limited replacer
        let placeholder = self.builder.variable(iter_ty);
        let saved_iter = self.loop_iter_map.insert(analysis.var, placeholder);

        let lower_ir = self.convert_expr(&analysis.lower)?;
        let lower_ir = self
            .builder
            .convert_argument(iter_ty, lower_ir)
            .map_err(ir_err(span))?;
        let body_ir = self.convert_body(body)?;

        match saved_iter {
            Some(previous) => {
                self.loop_iter_map.insert(analysis.var, previous);
            }
            None => {
                self.loop_iter_map.remove(&analysis.var);
            }
        }

        let iterator = self.builder.variable(iter_ty);
        self.builder.mgr.annotate(
            iterator,
            Annotation::CName(self.unit.var(analysis.var).name.clone()),
        );
        let substitution =
            std::collections::HashMap::from([(placeholder, iterator)]);
        let body_ir = replacer::replace_vars_scoped(&mut self.builder.mgr, body_ir, &substitution);

        // the exclusive end bound derived from the condition
        let bound_ir = self.convert_expr(&analysis.bound)?;
        let bound_ir = self
            .builder
            .convert_argument(iter_ty, bound_ir)
            .map_err(ir_err(span))?;
        let end_ir = match analysis.bound_adjust {
            0 => bound_ir,
            delta => self.adjust_bound(bound_ir, iter_ty, delta, span)?,
        };

        let step_ir = self.builder.literal(iter_ty, analysis.step);
        let decl_ir = self
            .builder
            .decl_stmt(iterator, lower_ir)
            .map_err(ir_err(span))?;
        let for_ir = self
            .builder
            .for_stmt(decl_ir, body_ir, end_ir, step_ir)
            .map_err(ir_err(span))?;
        stmts.push(for_ir);

        // an assignment-shaped init keeps the original variable alive;
        // external observers see the final value after the loop
        if analysis.assignment_shaped {
            let target = self.convert_lvalue(&Expr::var(analysis.var))?;
            let restored = self.builder.assign(target, end_ir).map_err(ir_err(span))?;
            stmts.push(restored);
        }

        Ok(Some((stmts, for_ir)))
    }

    fn adjust_bound(
        &mut self,
        bound: NodeId,
        iter_ty: NodeId,
        delta: i64,
        span: &Span,
    ) -> ConvResult<NodeId> {
        // constant bounds fold immediately
        if let NodeKind::Literal { value, .. } = self.builder.mgr.kind(bound).clone() {
            if let Ok(constant) = value.parse::<i64>() {
                return Ok(self.builder.literal(iter_ty, constant + delta));
            }
        }
        let family = match self.builder.mgr.kind(iter_ty) {
            NodeKind::GenericType { family, .. } => family.clone(),
            _ => unreachable!("iterators are scalars"),
        };
        let op = if delta > 0 { BasicOp::Add } else { BasicOp::Sub };
        let amount = self.builder.literal(iter_ty, delta.abs());
        self.basic_op_call(&family, op, vec![bound, amount], span)
    }
}

/// What the induction analysis recovers from `(init, cond, inc)`.
struct InductionAnalysis {
    var: VarId,
    lower: Expr,
    bound: Expr,
    /// +1/-1 applied to the bound for inclusive comparisons.
    bound_adjust: i64,
    step: i64,
    assignment_shaped: bool,
}

fn analyze_induction(init: &Stmt, cond: &Expr, inc: &Expr) -> Option<InductionAnalysis> {
    // candidates settable by the init statement
    let candidates: Vec<(VarId, Expr, bool)> = match &init.kind {
        StmtKind::Decl(entries) => entries
            .iter()
            .filter_map(|(var, init)| init.clone().map(|init| (*var, init, false)))
            .collect(),
        StmtKind::Expr(expr) => match &expr.kind {
            ExprKind::Binary {
                op: BinOp::Assign,
                lhs,
                rhs,
            } => match lhs.kind {
                ExprKind::Var(var) => vec![(var, (**rhs).clone(), true)],
                _ => vec![],
            },
            _ => vec![],
        },
        _ => vec![],
    };

    // the condition names the induction variable on one side
    let ExprKind::Binary { op, lhs, rhs } = &cond.kind else {
        return None;
    };
    let (var, bound, op) = match (&lhs.kind, &rhs.kind) {
        (ExprKind::Var(var), _) => (*var, (**rhs).clone(), *op),
        (_, ExprKind::Var(var)) => (*var, (**lhs).clone(), mirror(*op)?),
        _ => return None,
    };
    let (_, lower, assignment_shaped) = candidates
        .into_iter()
        .find(|(candidate, _, _)| *candidate == var)?;

    let bound_adjust = match op {
        BinOp::Lt | BinOp::Gt | BinOp::Ne => 0,
        BinOp::Le => 1,
        BinOp::Ge => -1,
        _ => return None,
    };

    let step = analyze_step(inc, var)?;

    Some(InductionAnalysis {
        var,
        lower,
        bound,
        bound_adjust,
        step,
        assignment_shaped,
    })
}

/// Mirror a comparison so the induction variable reads on the left.
fn mirror(op: BinOp) -> Option<BinOp> {
    Some(match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        BinOp::Ne => BinOp::Ne,
        _ => return None,
    })
}

/// The affine step of the increment expression, if any.
fn analyze_step(inc: &Expr, var: VarId) -> Option<i64> {
    match &inc.kind {
        ExprKind::Unary { op, sub } => {
            if !matches!(sub.kind, ExprKind::Var(v) if v == var) {
                return None;
            }
            match op {
                UnOp::PreInc | UnOp::PostInc => Some(1),
                UnOp::PreDec | UnOp::PostDec => Some(-1),
                _ => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            if !matches!(lhs.kind, ExprKind::Var(v) if v == var) {
                return None;
            }
            match op {
                BinOp::AddAssign => literal_value(rhs),
                BinOp::SubAssign => literal_value(rhs).map(|step| -step),
                BinOp::Assign => match &rhs.kind {
                    // i = i + c, i = c + i, i = i - c
                    ExprKind::Binary {
                        op: BinOp::Add,
                        lhs: a,
                        rhs: b,
                    } => match (&a.kind, &b.kind) {
                        (ExprKind::Var(v), _) if *v == var => literal_value(b),
                        (_, ExprKind::Var(v)) if *v == var => literal_value(a),
                        _ => None,
                    },
                    ExprKind::Binary {
                        op: BinOp::Sub,
                        lhs: a,
                        rhs: b,
                    } => match &a.kind {
                        ExprKind::Var(v) if *v == var => literal_value(b).map(|step| -step),
                        _ => None,
                    },
                    _ => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}

fn literal_value(expr: &Expr) -> Option<i64> {
    match expr.kind {
        ExprKind::IntLit(value) => Some(value),
        _ => None,
    }
}

// ---- purity helpers --------------------------------------------------

pub(crate) fn expr_has_side_effects(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { .. } => true,
        ExprKind::Unary { op, sub } => {
            matches!(
                op,
                UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec
            ) || expr_has_side_effects(sub)
        }
        ExprKind::Binary { op, lhs, rhs } => {
            op.is_assignment() || expr_has_side_effects(lhs) || expr_has_side_effects(rhs)
        }
        ExprKind::Cast { sub, .. } => expr_has_side_effects(sub),
        ExprKind::Index { base, index } => {
            expr_has_side_effects(base) || expr_has_side_effects(index)
        }
        ExprKind::Member { base, .. } => expr_has_side_effects(base),
        ExprKind::InitList(items) => items.iter().any(expr_has_side_effects),
        _ => false,
    }
}

pub(crate) fn expr_mentions_var(expr: &Expr, var: VarId) -> bool {
    match &expr.kind {
        ExprKind::Var(v) => *v == var,
        ExprKind::Call { callee, args } => {
            expr_mentions_var(callee, var) || args.iter().any(|arg| expr_mentions_var(arg, var))
        }
        ExprKind::Unary { sub, .. } => expr_mentions_var(sub, var),
        ExprKind::Binary { lhs, rhs, .. } => {
            expr_mentions_var(lhs, var) || expr_mentions_var(rhs, var)
        }
        ExprKind::Cast { sub, .. } => expr_mentions_var(sub, var),
        ExprKind::Index { base, index } => {
            expr_mentions_var(base, var) || expr_mentions_var(index, var)
        }
        ExprKind::Member { base, .. } => expr_mentions_var(base, var),
        ExprKind::InitList(items) => items.iter().any(|item| expr_mentions_var(item, var)),
        _ => false,
    }
}

pub(crate) fn expr_writes_var(expr: &Expr, var: VarId) -> bool {
    match &expr.kind {
        ExprKind::Unary { op, sub } => {
            let target = matches!(sub.kind, ExprKind::Var(v) if v == var);
            match op {
                UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec | UnOp::AddrOf => {
                    target || expr_writes_var(sub, var)
                }
                _ => expr_writes_var(sub, var),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let target = op.is_assignment() && matches!(lhs.kind, ExprKind::Var(v) if v == var);
            target || expr_writes_var(lhs, var) || expr_writes_var(rhs, var)
        }
        ExprKind::Call { callee, args } => {
            expr_writes_var(callee, var) || args.iter().any(|arg| expr_writes_var(arg, var))
        }
        ExprKind::Cast { sub, .. } => expr_writes_var(sub, var),
        ExprKind::Index { base, index } => {
            expr_writes_var(base, var) || expr_writes_var(index, var)
        }
        ExprKind::Member { base, .. } => expr_writes_var(base, var),
        ExprKind::InitList(items) => items.iter().any(|item| expr_writes_var(item, var)),
        _ => false,
    }
}

pub(crate) fn stmt_writes_var(stmt: &Stmt, var: VarId) -> bool {
    match &stmt.kind {
        StmtKind::Compound(children) => children.iter().any(|child| stmt_writes_var(child, var)),
        StmtKind::Decl(entries) => entries
            .iter()
            .any(|(_, init)| init.as_ref().is_some_and(|init| expr_writes_var(init, var))),
        StmtKind::If {
            cond_decl,
            cond,
            then_branch,
            else_branch,
        } => {
            cond_decl
                .as_ref()
                .is_some_and(|(_, init)| expr_writes_var(init, var))
                || expr_writes_var(cond, var)
                || stmt_writes_var(then_branch, var)
                || else_branch
                    .as_ref()
                    .is_some_and(|branch| stmt_writes_var(branch, var))
        }
        StmtKind::While {
            cond_decl,
            cond,
            body,
        } => {
            cond_decl
                .as_ref()
                .is_some_and(|(_, init)| expr_writes_var(init, var))
                || expr_writes_var(cond, var)
                || stmt_writes_var(body, var)
        }
        StmtKind::For {
            init,
            cond,
            inc,
            body,
        } => {
            init.as_ref().is_some_and(|init| stmt_writes_var(init, var))
                || cond.as_ref().is_some_and(|cond| expr_writes_var(cond, var))
                || inc.as_ref().is_some_and(|inc| expr_writes_var(inc, var))
                || stmt_writes_var(body, var)
        }
        StmtKind::Switch { cond, body } => {
            expr_writes_var(cond, var)
                || body.iter().any(|item| match item {
                    SwitchItem::Stmt(stmt) => stmt_writes_var(stmt, var),
                    _ => false,
                })
        }
        StmtKind::Return(value) => value
            .as_ref()
            .is_some_and(|value| expr_writes_var(value, var)),
        StmtKind::Expr(expr) => expr_writes_var(expr, var),
        StmtKind::Break | StmtKind::Continue | StmtKind::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{Storage, StmtId, TranslationUnit, VarDecl};
    use crate::frontend::ConversionSetup;
    use crate::ir::printer;

    use super::*;

    static SETUP: once_cell::sync::Lazy<ConversionSetup> =
        once_cell::sync::Lazy::new(ConversionSetup::default);

    fn local(unit: &mut TranslationUnit, name: &str, ty: SrcType) -> VarId {
        unit.add_var(VarDecl {
            name: name.into(),
            ty,
            storage: Storage::Local,
            init: None,
            span: Span::default(),
        })
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(StmtId(0), kind)
    }

    /// `for (int i = 10; i < 50; i--) { v[i]; }` style loops.
    fn counted_loop(
        unit: &mut TranslationUnit,
        lower: i64,
        op: BinOp,
        bound: i64,
        inc: fn(VarId) -> Expr,
    ) -> (VarId, Stmt) {
        let i = local(unit, "i", SrcType::int());
        let body = stmt(StmtKind::Compound(vec![stmt(StmtKind::Expr(Expr::var(i)))]));
        let for_stmt = stmt(StmtKind::For {
            init: Some(Box::new(stmt(StmtKind::Decl(vec![(
                i,
                Some(Expr::int(lower)),
            )])))),
            cond: Some(Expr::binary(op, Expr::var(i), Expr::int(bound))),
            inc: Some(inc(i)),
            body: Box::new(body),
        });
        (i, for_stmt)
    }

    #[test]
    fn test_simple_counted_for_normalizes() {
        let mut unit = TranslationUnit::new("t.c");
        let (_, for_stmt) = counted_loop(&mut unit, 0, BinOp::Lt, 10, |i| {
            Expr::unary(UnOp::PostInc, Expr::var(i))
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        assert_eq!(stmts.len(), 1);
        let NodeKind::ForStmt { decl, end, step, .. } = ctx.builder.mgr.kind(stmts[0]).clone()
        else {
            panic!("expected normalized for");
        };
        assert_eq!(printer::print(&ctx.builder.mgr, end), "10");
        assert_eq!(printer::print(&ctx.builder.mgr, step), "1");
        let NodeKind::DeclarationStmt { init, .. } = ctx.builder.mgr.kind(decl).clone() else {
            panic!("expected iterator declaration");
        };
        assert_eq!(printer::print(&ctx.builder.mgr, init), "0");
    }

    #[test]
    fn test_negative_step_normalizes() {
        // for (int i = 10; i < 50; i--) stays a for with step -1
        let mut unit = TranslationUnit::new("t.c");
        let (_, for_stmt) = counted_loop(&mut unit, 10, BinOp::Lt, 50, |i| {
            Expr::unary(UnOp::PostDec, Expr::var(i))
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        let NodeKind::ForStmt { step, .. } = ctx.builder.mgr.kind(stmts[0]).clone() else {
            panic!("expected normalized for");
        };
        assert_eq!(printer::print(&ctx.builder.mgr, step), "-1");
    }

    #[test]
    fn test_inclusive_bound_adjusts() {
        let mut unit = TranslationUnit::new("t.c");
        let (_, for_stmt) = counted_loop(&mut unit, 0, BinOp::Le, 10, |i| {
            Expr::unary(UnOp::PreInc, Expr::var(i))
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        let NodeKind::ForStmt { end, .. } = ctx.builder.mgr.kind(stmts[0]).clone() else {
            panic!("expected normalized for");
        };
        assert_eq!(printer::print(&ctx.builder.mgr, end), "11");
    }

    #[test]
    fn test_iterator_is_plain_in_body() {
        let mut unit = TranslationUnit::new("t.c");
        let (_, for_stmt) = counted_loop(&mut unit, 0, BinOp::Lt, 10, |i| {
            Expr::unary(UnOp::PostInc, Expr::var(i))
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        let NodeKind::ForStmt { decl, body, .. } = ctx.builder.mgr.kind(stmts[0]).clone()
        else {
            panic!("expected for");
        };
        let NodeKind::DeclarationStmt { var, .. } = ctx.builder.mgr.kind(decl).clone() else {
            panic!("expected decl");
        };
        // the body references the declared iterator directly, no deref
        let NodeKind::CompoundStmt { stmts: body_stmts } =
            ctx.builder.mgr.kind(body).clone()
        else {
            panic!("expected body compound");
        };
        assert_eq!(body_stmts, vec![var]);
    }

    #[test]
    fn test_side_effect_bound_falls_back_to_while() {
        let mut unit = TranslationUnit::new("t.c");
        let i = local(&mut unit, "i", SrcType::int());
        let f = unit.add_function(crate::frontend::ast::FuncDecl {
            name: "bound".into(),
            params: vec![],
            ret: SrcType::int(),
            body: None,
            variadic: false,
            span: Span::default(),
        });
        let for_stmt = stmt(StmtKind::For {
            init: Some(Box::new(stmt(StmtKind::Decl(vec![(
                i,
                Some(Expr::int(0)),
            )])))),
            cond: Some(Expr::binary(
                BinOp::Lt,
                Expr::var(i),
                Expr::call(Expr::new(ExprKind::Func(f)), vec![]),
            )),
            inc: Some(Expr::unary(UnOp::PostInc, Expr::var(i))),
            body: Box::new(stmt(StmtKind::Compound(vec![]))),
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        // { decl i; while (...) { ...; i++ } }
        assert_eq!(stmts.len(), 2);
        assert!(matches!(
            ctx.builder.mgr.kind(stmts[0]),
            NodeKind::DeclarationStmt { .. }
        ));
        assert!(matches!(
            ctx.builder.mgr.kind(stmts[1]),
            NodeKind::WhileStmt { .. }
        ));
    }

    #[test]
    fn test_assignment_shaped_init_restores_final_value() {
        let mut unit = TranslationUnit::new("t.c");
        let i = local(&mut unit, "i", SrcType::int());
        let for_stmt = stmt(StmtKind::For {
            init: Some(Box::new(stmt(StmtKind::Expr(Expr::binary(
                BinOp::Assign,
                Expr::var(i),
                Expr::int(0),
            ))))),
            cond: Some(Expr::binary(BinOp::Lt, Expr::var(i), Expr::int(8))),
            inc: Some(Expr::unary(UnOp::PostInc, Expr::var(i))),
            body: Box::new(stmt(StmtKind::Compound(vec![]))),
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        // the original variable exists outside the loop
        let decl = stmt(StmtKind::Decl(vec![(i, Some(Expr::int(0)))]));
        let mut all = ctx.convert_stmt(&decl).unwrap();
        all.extend(ctx.convert_stmt(&for_stmt).unwrap());

        // decl, for, restore assignment
        assert_eq!(all.len(), 3);
        assert!(matches!(
            ctx.builder.mgr.kind(all[1]),
            NodeKind::ForStmt { .. }
        ));
        let NodeKind::CallExpr { func, .. } = ctx.builder.mgr.kind(all[2]).clone() else {
            panic!("expected restore assignment");
        };
        assert_eq!(func, ctx.builder.basic.ref_assign);
    }

    #[test]
    fn test_empty_init_becomes_plain_while() {
        let mut unit = TranslationUnit::new("t.c");
        let i = local(&mut unit, "i", SrcType::int());
        let for_stmt = stmt(StmtKind::For {
            init: None,
            cond: Some(Expr::binary(BinOp::Lt, Expr::var(i), Expr::int(4))),
            inc: Some(Expr::unary(UnOp::PostInc, Expr::var(i))),
            body: Box::new(stmt(StmtKind::Compound(vec![]))),
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let decl = stmt(StmtKind::Decl(vec![(i, Some(Expr::int(0)))]));
        ctx.convert_stmt(&decl).unwrap();
        let stmts = ctx.convert_stmt(&for_stmt).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(
            ctx.builder.mgr.kind(stmts[0]),
            NodeKind::WhileStmt { .. }
        ));
    }

    #[test]
    fn test_switch_evaluates_discriminator_once() {
        let mut unit = TranslationUnit::new("t.c");
        let x = local(&mut unit, "x", SrcType::int());
        let switch = stmt(StmtKind::Switch {
            cond: Expr::var(x),
            body: vec![
                // a stray statement before the first case
                SwitchItem::Stmt(stmt(StmtKind::Expr(Expr::int(99)))),
                SwitchItem::Case(Expr::int(1)),
                SwitchItem::Stmt(stmt(StmtKind::Break)),
                SwitchItem::Default,
                SwitchItem::Stmt(stmt(StmtKind::Break)),
            ],
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let decl = stmt(StmtKind::Decl(vec![(x, Some(Expr::int(0)))]));
        ctx.convert_stmt(&decl).unwrap();
        let stmts = ctx.convert_stmt(&switch).unwrap();

        // selector declaration, lifted stray statement, switch
        assert_eq!(stmts.len(), 3);
        assert!(matches!(
            ctx.builder.mgr.kind(stmts[0]),
            NodeKind::DeclarationStmt { .. }
        ));
        let NodeKind::SwitchStmt { expr, cases, .. } =
            ctx.builder.mgr.kind(stmts[2]).clone()
        else {
            panic!("expected switch");
        };
        assert!(matches!(
            ctx.builder.mgr.kind(expr),
            NodeKind::Variable { .. }
        ));
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn test_if_with_condition_declaration_lifts() {
        let mut unit = TranslationUnit::new("t.c");
        let x = local(&mut unit, "x", SrcType::int());
        let if_stmt = stmt(StmtKind::If {
            cond_decl: Some((x, Expr::int(3))),
            cond: Expr::var(x),
            then_branch: Box::new(stmt(StmtKind::Compound(vec![]))),
            else_branch: None,
        });

        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&if_stmt).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(
            ctx.builder.mgr.kind(stmts[0]),
            NodeKind::DeclarationStmt { .. }
        ));
        // the non-bool condition is made explicit
        let NodeKind::IfStmt { condition, .. } = ctx.builder.mgr.kind(stmts[1]).clone() else {
            panic!("expected if");
        };
        assert_eq!(
            ctx.builder.mgr.expr_type(condition),
            Some(ctx.builder.basic.boolean)
        );
    }

    #[test]
    fn test_return_casts_to_declared_type() {
        let mut unit = TranslationUnit::new("t.c");
        let x = local(&mut unit, "x", SrcType::int());
        let mut ctx = ConversionContext::new(&unit, &SETUP);
        ctx.current_ret_ty = Some(ctx.builder.basic.real8);

        let decl = stmt(StmtKind::Decl(vec![(x, Some(Expr::int(1)))]));
        ctx.convert_stmt(&decl).unwrap();
        let ret = stmt(StmtKind::Return(Some(Expr::var(x))));
        let stmts = ctx.convert_stmt(&ret).unwrap();

        let NodeKind::ReturnStmt { expr } = ctx.builder.mgr.kind(stmts[0]).clone() else {
            panic!("expected return");
        };
        assert_eq!(
            ctx.builder.mgr.expr_type(expr),
            Some(ctx.builder.basic.real8)
        );
    }

    #[test]
    fn test_null_statement_is_noop() {
        let unit = TranslationUnit::new("t.c");
        let mut ctx = ConversionContext::new(&unit, &SETUP);
        let stmts = ctx.convert_stmt(&stmt(StmtKind::Null)).unwrap();
        assert!(stmts.is_empty());
    }
}
