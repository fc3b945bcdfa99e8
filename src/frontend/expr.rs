//! Lowering of source expressions into IR.
//!
//! Two entry points: [`ConversionContext::convert_expr`] produces r-values
//! (a use of a `ref`-typed location gets an explicit `ref.deref`), while
//! [`ConversionContext::convert_lvalue`] produces the location itself.
//! Pointers follow the ref/array duality: a `T*` value is a
//! `ref<array<T,1>>`, and dereference, subscript and arrow operators pick
//! the accessor builtin witnessing which form applies.

use crate::ir::builder::{IllFormedNode, IrError};
use crate::ir::lang::{
    self, BasicOp, FAMILY_BOOL, FAMILY_CHAR, FAMILY_INT, FAMILY_REAL, FAMILY_UINT,
};
use crate::ir::{NodeId, NodeKind};
use crate::span::Span;
use crate::types::substitution::unroll_rec_type;
use crate::types::{is_sub_type, join};

use super::ast::{BinOp, Expr, ExprKind, SrcType, Storage, UnOp, VarId};
use super::{ir_err, ConversionContext, ConversionError, ConvResult, UndefinedName};

impl ConversionContext<'_> {
    /// Lower an expression to its r-value.
    pub fn convert_expr(&mut self, expr: &Expr) -> ConvResult<NodeId> {
        let span = &expr.span;
        match &expr.kind {
            ExprKind::IntLit(value) => Ok(self.builder.int_lit(*value)),
            ExprKind::FloatLit(text) => Ok(self.builder.real_lit(text)),
            ExprKind::CharLit(value) => {
                let ty = self.builder.basic.character;
                Ok(self.builder.literal(ty, format!("'{value}'")))
            }
            ExprKind::StringLit(text) => {
                let char_ty = self.builder.basic.character;
                let array = lang::array_type(&mut self.builder.mgr, char_ty);
                let ty = lang::ref_type(&mut self.builder.mgr, array);
                Ok(self.builder.literal(ty, format!("\"{text}\"")))
            }
            ExprKind::Var(id) => self.convert_var_rvalue(*id, span),
            ExprKind::Func(id) => self.convert_function(*id),
            ExprKind::Call { .. } => self.convert_call(expr),
            ExprKind::Unary { op, sub } => self.convert_unary(*op, sub, span),
            ExprKind::Binary { op, lhs, rhs } => self.convert_binary(*op, lhs, rhs, span),
            ExprKind::Cast { ty, sub } => self.convert_cast(ty, sub, span),
            ExprKind::Index { .. } | ExprKind::Member { .. } => {
                match self.convert_lvalue(expr) {
                    Ok(location) => self.builder.deref(location).map_err(ir_err(span)),
                    Err(_) => self.convert_value_access(expr),
                }
            }
            ExprKind::InitList(_) => Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "initializer list outside of a declaration".into(),
                }),
                span.clone(),
            )),
            ExprKind::SizeofType(ty) => {
                let lowered = self.convert_type(ty, span)?;
                let type_lit = lang::type_literal(&mut self.builder.mgr, lowered);
                self.builder
                    .call_expr(self.builder.basic.sizeof, vec![type_lit])
                    .map_err(ir_err(span))
            }
        }
    }

    /// Lower an expression to the `ref`-typed location it denotes.
    pub fn convert_lvalue(&mut self, expr: &Expr) -> ConvResult<NodeId> {
        let span = &expr.span;
        match &expr.kind {
            ExprKind::Var(id) => self.convert_var_lvalue(*id, span),
            ExprKind::Unary {
                op: UnOp::Deref,
                sub,
            } => {
                let pointer = self.convert_expr(sub)?;
                self.pointer_element(pointer, span)
            }
            ExprKind::Index { base, index } => self.convert_subscript_lvalue(base, index, span),
            ExprKind::Member {
                base,
                member,
                arrow,
            } => {
                let base_ref = if *arrow {
                    let pointer = self.convert_expr(base)?;
                    self.pointer_element(pointer, span)?
                } else {
                    self.convert_lvalue(base)?
                };
                self.composite_ref_access(base_ref, member, span)
            }
            _ => Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "expression is not an l-value".into(),
                }),
                span.clone(),
            )),
        }
    }

    // ---- variables ---------------------------------------------------

    fn lookup_var(&self, id: VarId, span: &Span) -> ConvResult<NodeId> {
        self.var_map.get(&id).copied().ok_or_else(|| {
            ConversionError::UndefinedName(
                UndefinedName {
                    name: self.unit.var(id).name.clone(),
                },
                span.clone(),
            )
        })
    }

    fn convert_var_rvalue(&mut self, id: VarId, span: &Span) -> ConvResult<NodeId> {
        // loop iterators are plain values, not locations
        if let Some(iter) = self.loop_iter_map.get(&id) {
            return Ok(*iter);
        }
        match self.unit.var(id).storage {
            Storage::Param => {
                if let Some(wrapped) = self.wrap_ref_map.get(&id).copied() {
                    self.builder.deref(wrapped).map_err(ir_err(span))
                } else {
                    self.lookup_var(id, span)
                }
            }
            Storage::Local => {
                let location = self.lookup_var(id, span)?;
                self.builder.deref(location).map_err(ir_err(span))
            }
            Storage::Global => {
                let location = self.global_lvalue(id, span)?;
                self.builder.deref(location).map_err(ir_err(span))
            }
        }
    }

    fn convert_var_lvalue(&mut self, id: VarId, span: &Span) -> ConvResult<NodeId> {
        if self.loop_iter_map.contains_key(&id) {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "loop iterators are immutable".into(),
                }),
                span.clone(),
            ));
        }
        match self.unit.var(id).storage {
            Storage::Param => self.wrap_ref_map.get(&id).copied().ok_or_else(|| {
                ConversionError::Ir(
                    IrError::IllFormedNode(IllFormedNode {
                        reason: format!(
                            "parameter '{}' used as l-value without wrapping",
                            self.unit.var(id).name
                        ),
                    }),
                    span.clone(),
                )
            }),
            Storage::Local => self.lookup_var(id, span),
            Storage::Global => self.global_lvalue(id, span),
        }
    }

    // ---- accessors ---------------------------------------------------

    /// The location of the element a pointer designates: `*p` with the
    /// accessor witnessing the array or vector form.
    fn pointer_element(&mut self, pointer: NodeId, span: &Span) -> ConvResult<NodeId> {
        let ty = self.builder.expr_type(pointer).map_err(ir_err(span))?;
        let NodeKind::RefType { element } = self.builder.mgr.kind(ty).clone() else {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "dereference of a non-pointer value".into(),
                }),
                span.clone(),
            ));
        };
        let zero = self.builder.literal(self.builder.basic.uint8, "0");
        match self.builder.mgr.kind(element) {
            NodeKind::ArrayType { .. } => self
                .builder
                .call_expr(self.builder.basic.array_ref_elem_1d, vec![pointer, zero])
                .map_err(ir_err(span)),
            NodeKind::VectorType { .. } => self
                .builder
                .call_expr(self.builder.basic.vector_ref_elem, vec![pointer, zero])
                .map_err(ir_err(span)),
            // a scalar-addressed location: the pointer already is the spot
            _ => Ok(pointer),
        }
    }

    fn convert_subscript_lvalue(
        &mut self,
        base: &Expr,
        index: &Expr,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let index_ir = self.convert_expr(index)?;
        let index_ir = self
            .builder
            .convert_argument(self.builder.basic.uint8, index_ir)
            .map_err(ir_err(span))?;

        let base_ref = if let Ok(location) = self.convert_lvalue(base) {
            let ty = self.builder.expr_type(location).map_err(ir_err(span))?;
            let NodeKind::RefType { element } = self.builder.mgr.kind(ty).clone() else {
                unreachable!("l-values are refs");
            };
            // a pointer variable subscripts through its value
            if matches!(self.builder.mgr.kind(element), NodeKind::RefType { .. }) {
                self.builder.deref(location).map_err(ir_err(span))?
            } else {
                location
            }
        } else {
            self.convert_expr(base)?
        };

        let ty = self.builder.expr_type(base_ref).map_err(ir_err(span))?;
        let NodeKind::RefType { element } = self.builder.mgr.kind(ty).clone() else {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "subscript base is not addressable".into(),
                }),
                span.clone(),
            ));
        };
        match self.builder.mgr.kind(element) {
            NodeKind::VectorType { .. } => self
                .builder
                .call_expr(self.builder.basic.vector_ref_elem, vec![base_ref, index_ir])
                .map_err(ir_err(span)),
            _ => self
                .builder
                .call_expr(
                    self.builder.basic.array_ref_elem_1d,
                    vec![base_ref, index_ir],
                )
                .map_err(ir_err(span)),
        }
    }

    /// Subscript or member access on a value that has no location (e.g. a
    /// vector returned from a call).
    fn convert_value_access(&mut self, expr: &Expr) -> ConvResult<NodeId> {
        let span = &expr.span;
        match &expr.kind {
            ExprKind::Index { base, index } => {
                let base_ir = self.convert_expr(base)?;
                let index_ir = self.convert_expr(index)?;
                let index_ir = self
                    .builder
                    .convert_argument(self.builder.basic.uint8, index_ir)
                    .map_err(ir_err(span))?;
                let ty = self.builder.expr_type(base_ir).map_err(ir_err(span))?;
                let accessor = match self.builder.mgr.kind(ty) {
                    NodeKind::VectorType { .. } => self.builder.basic.vector_subscript,
                    _ => self.builder.basic.array_subscript_1d,
                };
                self.builder
                    .call_expr(accessor, vec![base_ir, index_ir])
                    .map_err(ir_err(span))
            }
            ExprKind::Member { base, member, .. } => {
                let base_ir = self.convert_expr(base)?;
                self.composite_value_access(base_ir, member, span)
            }
            _ => unreachable!("only subscripts and members reach value access"),
        }
    }

    fn composite_ref_access(
        &mut self,
        base_ref: NodeId,
        member: &str,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let ty = self.builder.expr_type(base_ref).map_err(ir_err(span))?;
        let NodeKind::RefType { element } = self.builder.mgr.kind(ty).clone() else {
            unreachable!("composite ref access requires a ref");
        };
        let field_ty = self.field_type(element, member, span)?;
        let selector = lang::identifier_literal(&mut self.builder.mgr, &self.builder.basic, member);
        let field_lit = lang::type_literal(&mut self.builder.mgr, field_ty);
        self.builder
            .call_expr(
                self.builder.basic.composite_ref_elem,
                vec![base_ref, selector, field_lit],
            )
            .map_err(ir_err(span))
    }

    fn composite_value_access(
        &mut self,
        base: NodeId,
        member: &str,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let ty = self.builder.expr_type(base).map_err(ir_err(span))?;
        let field_ty = self.field_type(ty, member, span)?;
        let selector = lang::identifier_literal(&mut self.builder.mgr, &self.builder.basic, member);
        let field_lit = lang::type_literal(&mut self.builder.mgr, field_ty);
        self.builder
            .call_expr(
                self.builder.basic.composite_member_access,
                vec![base, selector, field_lit],
            )
            .map_err(ir_err(span))
    }

    fn field_type(&mut self, composite: NodeId, member: &str, span: &Span) -> ConvResult<NodeId> {
        let composite = match self.builder.mgr.kind(composite) {
            NodeKind::RecType { .. } => unroll_rec_type(&mut self.builder.mgr, composite),
            _ => composite,
        };
        let (NodeKind::StructType { entries } | NodeKind::UnionType { entries }) =
            self.builder.mgr.kind(composite).clone()
        else {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: format!("member access '{member}' on a non-composite type"),
                }),
                span.clone(),
            ));
        };
        entries
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                ConversionError::UndefinedName(
                    UndefinedName {
                        name: member.to_string(),
                    },
                    span.clone(),
                )
            })
    }

    // ---- unary operators ---------------------------------------------

    fn convert_unary(&mut self, op: UnOp, sub: &Expr, span: &Span) -> ConvResult<NodeId> {
        match op {
            UnOp::Plus => self.convert_expr(sub),
            UnOp::Minus => {
                let value = self.convert_expr(sub)?;
                let ty = self.builder.expr_type(value).map_err(ir_err(span))?;
                let family = self.scalar_family_name(ty, span)?;
                let zero = if family == FAMILY_REAL {
                    self.builder.literal(ty, "0.0")
                } else {
                    self.builder.literal(ty, "0")
                };
                self.basic_op_call(&family, BasicOp::Sub, vec![zero, value], span)
            }
            UnOp::Not => {
                let value = self.convert_expr(sub)?;
                let ty = self.builder.expr_type(value).map_err(ir_err(span))?;
                let family = self.scalar_family_name(ty, span)?;
                self.basic_op_call(&family, BasicOp::Not, vec![value], span)
            }
            UnOp::LNot => {
                let value = self.convert_expr(sub)?;
                let flag = self.to_bool(value, span)?;
                self.builder
                    .call_expr(self.builder.basic.bool_lnot, vec![flag])
                    .map_err(ir_err(span))
            }
            UnOp::Deref => {
                let pointer = self.convert_expr(sub)?;
                let location = self.pointer_element(pointer, span)?;
                self.builder.deref(location).map_err(ir_err(span))
            }
            UnOp::AddrOf => {
                let location = self.convert_lvalue(sub)?;
                let ty = self.builder.expr_type(location).map_err(ir_err(span))?;
                let NodeKind::RefType { element } = self.builder.mgr.kind(ty).clone() else {
                    unreachable!("l-values are refs");
                };
                match self.builder.mgr.kind(element) {
                    // &array decays to a pointer to its first element
                    NodeKind::VectorType { .. } => self
                        .builder
                        .call_expr(self.builder.basic.ref_vector_to_ref_array, vec![location])
                        .map_err(ir_err(span)),
                    NodeKind::ArrayType { .. } => Ok(location),
                    _ => self
                        .builder
                        .call_expr(self.builder.basic.ref_scalar_to_ref_array, vec![location])
                        .map_err(ir_err(span)),
                }
            }
            UnOp::PreInc => self.convert_inc_dec(sub, BasicOp::Add, true, span),
            UnOp::PreDec => self.convert_inc_dec(sub, BasicOp::Sub, true, span),
            UnOp::PostInc => self.convert_inc_dec(sub, BasicOp::Add, false, span),
            UnOp::PostDec => self.convert_inc_dec(sub, BasicOp::Sub, false, span),
        }
    }

    /// Increment/decrement, lowered into a lambda performing the update
    /// and returning either the new (pre) or the saved old (post) value.
    fn convert_inc_dec(
        &mut self,
        sub: &Expr,
        op: BasicOp,
        pre: bool,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let location = self.convert_lvalue(sub)?;
        let loc_ty = self.builder.expr_type(location).map_err(ir_err(span))?;
        let NodeKind::RefType { element } = self.builder.mgr.kind(loc_ty).clone() else {
            unreachable!("l-values are refs");
        };
        let family = self.scalar_family_name(element, span)?;

        let fn_ty = lang::function_type(&mut self.builder.mgr, vec![loc_ty], element);
        let param = self.builder.variable(loc_ty);
        let one = self.builder.literal(element, "1");

        let body = if pre {
            let current = self.builder.deref(param).map_err(ir_err(span))?;
            let updated = self.basic_op_call(&family, op, vec![current, one], span)?;
            let store = self.builder.assign(param, updated).map_err(ir_err(span))?;
            let fresh = self.builder.deref(param).map_err(ir_err(span))?;
            let ret = self.builder.return_stmt(fresh);
            self.builder.compound(vec![store, ret])
        } else {
            let current = self.builder.deref(param).map_err(ir_err(span))?;
            let old = self.builder.variable(element);
            let save = self.builder.decl_stmt(old, current).map_err(ir_err(span))?;
            let updated = self.basic_op_call(&family, op, vec![old, one], span)?;
            let store = self.builder.assign(param, updated).map_err(ir_err(span))?;
            let ret = self.builder.return_stmt(old);
            self.builder.compound(vec![save, store, ret])
        };

        let lambda = self
            .builder
            .lambda_expr(fn_ty, vec![param], body)
            .map_err(ir_err(span))?;
        self.builder
            .call_expr(lambda, vec![location])
            .map_err(ir_err(span))
    }

    // ---- binary operators --------------------------------------------

    fn convert_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        span: &Span,
    ) -> ConvResult<NodeId> {
        // compound assignments become `a = a @ b`
        if let Some(base) = op.compound_base() {
            let rewritten = Expr {
                span: span.clone(),
                kind: ExprKind::Binary {
                    op: base,
                    lhs: Box::new(lhs.clone()),
                    rhs: Box::new(rhs.clone()),
                },
            };
            return self.convert_assignment(lhs, &rewritten, span);
        }
        if op == BinOp::Assign {
            return self.convert_assignment(lhs, rhs, span);
        }
        if op == BinOp::LAnd || op == BinOp::LOr {
            return self.convert_short_circuit(op, lhs, rhs, span);
        }
        if op == BinOp::Comma {
            return self.convert_comma(lhs, rhs, span);
        }

        let lhs_ir = self.convert_expr(lhs)?;
        let rhs_ir = self.convert_expr(rhs)?;
        let lhs_ty = self.builder.expr_type(lhs_ir).map_err(ir_err(span))?;
        let rhs_ty = self.builder.expr_type(rhs_ir).map_err(ir_err(span))?;

        // pointer arithmetic: a view shifted into the same array
        if self.is_pointer(lhs_ty) && matches!(op, BinOp::Add | BinOp::Sub) {
            let offset = self
                .builder
                .convert_argument(self.builder.basic.int8, rhs_ir)
                .map_err(ir_err(span))?;
            let offset = if op == BinOp::Sub {
                let zero = self.builder.literal(self.builder.basic.int8, "0");
                self.basic_op_call(FAMILY_INT, BasicOp::Sub, vec![zero, offset], span)?
            } else {
                offset
            };
            return self
                .builder
                .call_expr(self.builder.basic.array_view, vec![lhs_ir, offset])
                .map_err(ir_err(span));
        }

        // pointer equality goes through the dedicated builtin
        if (self.is_pointer(lhs_ty) || self.is_pointer(rhs_ty))
            && matches!(op, BinOp::Eq | BinOp::Ne)
        {
            return self.convert_pointer_comparison(op, lhs, rhs, lhs_ir, rhs_ir, span);
        }

        let common = join(&mut self.builder.mgr, lhs_ty, rhs_ty).ok_or_else(|| {
            ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: format!(
                        "operands of {op:?} have no common type ({} vs {})",
                        crate::ir::printer::print(&self.builder.mgr, lhs_ty),
                        crate::ir::printer::print(&self.builder.mgr, rhs_ty)
                    ),
                }),
                span.clone(),
            )
        })?;
        let lhs_ir = self
            .builder
            .convert_argument(common, lhs_ir)
            .map_err(ir_err(span))?;
        let rhs_ir = self
            .builder
            .convert_argument(common, rhs_ir)
            .map_err(ir_err(span))?;

        let family = self.scalar_family_name(common, span)?;
        let basic_op = basic_op_for(op);
        self.basic_op_call(&family, basic_op, vec![lhs_ir, rhs_ir], span)
    }

    fn convert_assignment(&mut self, lhs: &Expr, rhs: &Expr, span: &Span) -> ConvResult<NodeId> {
        let target = self.convert_lvalue(lhs)?;
        let target_ty = self.builder.expr_type(target).map_err(ir_err(span))?;
        let NodeKind::RefType { element } = self.builder.mgr.kind(target_ty).clone() else {
            unreachable!("l-values are refs");
        };

        // a null pointer constant on the right-hand side
        let value = if self.is_pointer(element) && matches!(rhs.kind, ExprKind::IntLit(0)) {
            self.null_pointer(element, span)?
        } else {
            self.convert_expr(rhs)?
        };
        self.builder.assign(target, value).map_err(ir_err(span))
    }

    fn convert_short_circuit(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let lhs_ir = self.convert_expr(lhs)?;
        let condition = self.to_bool(lhs_ir, span)?;

        let rhs_ir = self.convert_expr(rhs)?;
        let rhs_bool = self.to_bool(rhs_ir, span)?;
        let rhs_thunk = self.bool_thunk(rhs_bool, span)?;

        let constant = self.builder.bool_lit(op == BinOp::LOr);
        let constant_thunk = self.bool_thunk(constant, span)?;

        let (then_thunk, else_thunk) = if op == BinOp::LAnd {
            // a && b: only evaluate b when a holds
            (rhs_thunk, constant_thunk)
        } else {
            // a || b: only evaluate b when a fails
            (constant_thunk, rhs_thunk)
        };
        self.builder
            .call_expr(
                self.builder.basic.if_then_else,
                vec![condition, then_thunk, else_thunk],
            )
            .map_err(ir_err(span))
    }

    fn bool_thunk(&mut self, value: NodeId, span: &Span) -> ConvResult<NodeId> {
        let bool_ty = self.builder.basic.boolean;
        let fn_ty = lang::function_type(&mut self.builder.mgr, vec![], bool_ty);
        let ret = self.builder.return_stmt(value);
        let body = self.builder.compound(vec![ret]);
        self.builder
            .lambda_expr(fn_ty, vec![], body)
            .map_err(ir_err(span))
    }

    fn convert_comma(&mut self, lhs: &Expr, rhs: &Expr, span: &Span) -> ConvResult<NodeId> {
        let lhs_ir = self.convert_expr(lhs)?;
        let rhs_ir = self.convert_expr(rhs)?;
        let rhs_ty = self.builder.expr_type(rhs_ir).map_err(ir_err(span))?;

        let fn_ty = lang::function_type(&mut self.builder.mgr, vec![], rhs_ty);
        let ret = self.builder.return_stmt(rhs_ir);
        let body = self.builder.compound(vec![lhs_ir, ret]);
        let lambda = self
            .builder
            .lambda_expr(fn_ty, vec![], body)
            .map_err(ir_err(span))?;
        self.builder.call_expr(lambda, vec![]).map_err(ir_err(span))
    }

    fn convert_pointer_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        lhs_ir: NodeId,
        rhs_ir: NodeId,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let lhs_ty = self.builder.expr_type(lhs_ir).map_err(ir_err(span))?;
        let rhs_ty = self.builder.expr_type(rhs_ir).map_err(ir_err(span))?;

        // `0` stands for the null pointer
        let lhs_ir = if matches!(lhs.kind, ExprKind::IntLit(0)) && self.is_pointer(rhs_ty) {
            self.null_pointer(rhs_ty, span)?
        } else {
            lhs_ir
        };
        let rhs_ir = if matches!(rhs.kind, ExprKind::IntLit(0)) && self.is_pointer(lhs_ty) {
            self.null_pointer(lhs_ty, span)?
        } else {
            rhs_ir
        };

        let equal = self
            .builder
            .call_expr(self.builder.basic.ptr_eq, vec![lhs_ir, rhs_ir])
            .map_err(ir_err(span))?;
        if op == BinOp::Eq {
            Ok(equal)
        } else {
            self.builder
                .call_expr(self.builder.basic.bool_lnot, vec![equal])
                .map_err(ir_err(span))
        }
    }

    pub(crate) fn null_pointer(&mut self, pointer_ty: NodeId, span: &Span) -> ConvResult<NodeId> {
        let type_lit = lang::type_literal(&mut self.builder.mgr, pointer_ty);
        self.builder
            .call_expr(self.builder.basic.get_null, vec![type_lit])
            .map_err(ir_err(span))
    }

    // ---- casts -------------------------------------------------------

    fn convert_cast(&mut self, target: &SrcType, sub: &Expr, span: &Span) -> ConvResult<NodeId> {
        let target_ir = self.convert_type(target, span)?;

        // (T*) malloc(...) carries the element type of the allocation
        if let ExprKind::Call { callee, args } = &sub.kind {
            if let Some(name) = self.called_function_name(callee) {
                if name == "malloc" || name == "calloc" {
                    let hint = self.pointer_element_type(target_ir);
                    return self.convert_allocation(&name, args, hint, span);
                }
            }
        }
        // the null pointer constant
        if matches!(sub.kind, ExprKind::IntLit(0)) && self.is_pointer(target_ir) {
            return self.null_pointer(target_ir, span);
        }

        let sub_ir = self.convert_expr(sub)?;
        let sub_ty = self.builder.expr_type(sub_ir).map_err(ir_err(span))?;

        // subtype-compatible casts are the identity
        if sub_ty == target_ir || is_sub_type(&self.builder.mgr, sub_ty, target_ir) {
            return Ok(sub_ir);
        }
        // the builder knows the remaining legal conversions (decay,
        // truncation); anything else stays an explicit cast node
        match self.builder.convert_argument(target_ir, sub_ir) {
            Ok(converted) => Ok(converted),
            Err(IrError::TypeMismatch(_)) => Ok(self.builder.cast_expr(target_ir, sub_ir)),
            Err(err) => Err(ConversionError::Ir(err, span.clone())),
        }
    }

    // ---- calls -------------------------------------------------------

    fn called_function_name(&self, callee: &Expr) -> Option<String> {
        match &callee.kind {
            ExprKind::Func(id) => Some(self.unit.function(*id).name.clone()),
            _ => None,
        }
    }

    fn convert_call(&mut self, expr: &Expr) -> ConvResult<NodeId> {
        let span = &expr.span;
        let ExprKind::Call { callee, args } = &expr.kind else {
            unreachable!("convert_call on a non-call");
        };

        if let Some(name) = self.called_function_name(callee) {
            match name.as_str() {
                "malloc" | "calloc" => {
                    return self.convert_allocation(&name, args, None, span);
                }
                "free" => {
                    let pointer = self.convert_expr(&args[0])?;
                    return self
                        .builder
                        .call_expr(self.builder.basic.ref_delete, vec![pointer])
                        .map_err(ir_err(span));
                }
                _ => {}
            }
        }

        let callee_ir = match &callee.kind {
            ExprKind::Func(id) => self.convert_function(*id)?,
            _ => self.convert_expr(callee)?,
        };
        let fn_ty = self.builder.expr_type(callee_ir).map_err(ir_err(span))?;
        let NodeKind::FunctionType { params, .. } = self.builder.mgr.kind(fn_ty).clone() else {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "callee is not a function".into(),
                }),
                span.clone(),
            ));
        };

        let mut lowered = vec![];
        // a callee reaching for globals receives the aggregate first
        let mut param_index = 0;
        if let ExprKind::Func(id) = &callee.kind {
            if self.function_uses_globals(*id) {
                let handle = self.current_globals_var.ok_or_else(|| {
                    ConversionError::Ir(
                        IrError::IllFormedNode(IllFormedNode {
                            reason: "globals aggregate is not in scope".into(),
                        }),
                        span.clone(),
                    )
                })?;
                lowered.push(handle);
                param_index = 1;
            }
        }
        for arg in args {
            let param_ty = params.get(param_index).copied();
            param_index += 1;
            let value = match param_ty.map(|ty| self.builder.mgr.kind(ty).clone()) {
                // C array arguments are passed by address
                Some(NodeKind::RefType { .. }) => self
                    .convert_lvalue(arg)
                    .or_else(|_| self.convert_expr(arg))?,
                _ => self.convert_expr(arg)?,
            };
            lowered.push(value);
        }

        self.builder
            .call_expr(callee_ir, lowered)
            .map_err(ir_err(span))
    }

    /// `malloc`/`calloc`, rewritten to `ref.new(array.create.1D(...))`.
    /// The element count is recovered by dividing out `sizeof(element)`.
    fn convert_allocation(
        &mut self,
        name: &str,
        args: &[Expr],
        element_hint: Option<NodeId>,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let (count_expr, sizeof_ty) = if name == "calloc" {
            let sizeof_ty = match &args[1].kind {
                ExprKind::SizeofType(ty) => Some(ty.clone()),
                _ => None,
            };
            (Some(args[0].clone()), sizeof_ty)
        } else {
            split_allocation_size(&args[0])
        };

        let element = match element_hint {
            Some(element) => element,
            None => {
                let src = sizeof_ty.ok_or_else(|| {
                    ConversionError::Ir(
                        IrError::IllFormedNode(IllFormedNode {
                            reason: "allocation size without a sizeof witness".into(),
                        }),
                        span.clone(),
                    )
                })?;
                self.convert_type(&src, span)?
            }
        };

        let count_ir = match count_expr {
            Some(expr) => {
                let value = self.convert_expr(&expr)?;
                self.builder
                    .convert_argument(self.builder.basic.uint8, value)
                    .map_err(ir_err(span))?
            }
            None => self.builder.literal(self.builder.basic.uint8, "1"),
        };

        let type_lit = lang::type_literal(&mut self.builder.mgr, element);
        let array = self
            .builder
            .call_expr(self.builder.basic.array_create_1d, vec![type_lit, count_ir])
            .map_err(ir_err(span))?;
        self.builder
            .call_expr(self.builder.basic.ref_new, vec![array])
            .map_err(ir_err(span))
    }

    // ---- initializers ------------------------------------------------

    /// Lower an initializer against its declared type. On arrays, a single
    /// element means "broadcast"; otherwise entries are positional. Struct
    /// initialization recurses per field.
    pub fn convert_init(&mut self, target_ty: NodeId, init: &Expr) -> ConvResult<NodeId> {
        let span = &init.span;
        let ExprKind::InitList(items) = &init.kind else {
            // a null pointer constant initializer
            if self.is_pointer(target_ty) && matches!(init.kind, ExprKind::IntLit(0)) {
                return self.null_pointer(target_ty, span);
            }
            let value = self.convert_expr(init)?;
            return self
                .builder
                .convert_argument(target_ty, value)
                .map_err(ir_err(span));
        };

        match self.builder.mgr.kind(target_ty).clone() {
            NodeKind::VectorType { element, size } => {
                let NodeKind::ConcreteIntParam { value: expected } =
                    self.builder.mgr.kind(size).clone()
                else {
                    unreachable!("vector sizes are concrete");
                };
                let values: Vec<NodeId> = if items.len() == 1 {
                    let value = self.convert_init(element, &items[0])?;
                    vec![value; expected as usize]
                } else {
                    if items.len() != expected as usize {
                        return Err(ConversionError::Ir(
                            IrError::IllFormedNode(IllFormedNode {
                                reason: format!(
                                    "initializer has {} entries, vector holds {expected}",
                                    items.len()
                                ),
                            }),
                            span.clone(),
                        ));
                    }
                    items
                        .iter()
                        .map(|item| self.convert_init(element, item))
                        .collect::<ConvResult<_>>()?
                };
                self.builder
                    .vector_expr(element, values)
                    .map_err(ir_err(span))
            }
            NodeKind::StructType { entries } => {
                if items.len() != entries.len() {
                    return Err(ConversionError::Ir(
                        IrError::IllFormedNode(IllFormedNode {
                            reason: format!(
                                "initializer has {} entries, struct declares {}",
                                items.len(),
                                entries.len()
                            ),
                        }),
                        span.clone(),
                    ));
                }
                let values: Vec<NodeId> = entries
                    .iter()
                    .zip(items)
                    .map(|((_, field_ty), item)| self.convert_init(*field_ty, item))
                    .collect::<ConvResult<_>>()?;
                self.builder
                    .struct_expr(target_ty, values)
                    .map_err(ir_err(span))
            }
            _ => Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: "initializer list on a non-aggregate type".into(),
                }),
                span.clone(),
            )),
        }
    }

    // ---- shared helpers ----------------------------------------------

    /// Coerce a value into a boolean condition the way C does: numeric
    /// values test against zero, pointers against null.
    pub fn to_bool(&mut self, value: NodeId, span: &Span) -> ConvResult<NodeId> {
        let ty = self.builder.expr_type(value).map_err(ir_err(span))?;
        if ty == self.builder.basic.boolean {
            return Ok(value);
        }
        if self.is_pointer(ty) {
            let null = self.null_pointer(ty, span)?;
            let is_null = self
                .builder
                .call_expr(self.builder.basic.ptr_eq, vec![value, null])
                .map_err(ir_err(span))?;
            return self
                .builder
                .call_expr(self.builder.basic.bool_lnot, vec![is_null])
                .map_err(ir_err(span));
        }
        let family = self.scalar_family_name(ty, span)?;
        let zero = if family == FAMILY_REAL {
            self.builder.literal(ty, "0.0")
        } else {
            self.builder.literal(ty, "0")
        };
        self.basic_op_call(&family, BasicOp::Ne, vec![value, zero], span)
    }

    pub(crate) fn basic_op_call(
        &mut self,
        family: &str,
        op: BasicOp,
        args: Vec<NodeId>,
        span: &Span,
    ) -> ConvResult<NodeId> {
        let operator = self
            .builder
            .basic
            .operator(&mut self.builder.mgr, family, op)
            .ok_or_else(|| {
                ConversionError::Ir(
                    IrError::IllFormedNode(IllFormedNode {
                        reason: format!("no operator {family}.{}", op.name()),
                    }),
                    span.clone(),
                )
            })?;
        self.builder.call_expr(operator, args).map_err(ir_err(span))
    }

    fn scalar_family_name(&self, ty: NodeId, span: &Span) -> ConvResult<String> {
        let NodeKind::GenericType { family, .. } = self.builder.mgr.kind(ty) else {
            return Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: format!(
                        "expected a scalar type, found {}",
                        crate::ir::printer::print(&self.builder.mgr, ty)
                    ),
                }),
                span.clone(),
            ));
        };
        match family.as_str() {
            FAMILY_INT | FAMILY_UINT | FAMILY_REAL | FAMILY_BOOL | FAMILY_CHAR => {
                Ok(family.clone())
            }
            other => Err(ConversionError::Ir(
                IrError::IllFormedNode(IllFormedNode {
                    reason: format!("no operators on type family '{other}'"),
                }),
                span.clone(),
            )),
        }
    }

    pub(crate) fn is_pointer(&self, ty: NodeId) -> bool {
        match self.builder.mgr.kind(ty) {
            NodeKind::RefType { element } => matches!(
                self.builder.mgr.kind(*element),
                NodeKind::ArrayType { .. } | NodeKind::VectorType { .. }
            ),
            NodeKind::GenericType { family, .. } => family == lang::FAMILY_ANY_REF,
            _ => false,
        }
    }

    fn pointer_element_type(&self, pointer_ty: NodeId) -> Option<NodeId> {
        let NodeKind::RefType { element } = self.builder.mgr.kind(pointer_ty) else {
            return None;
        };
        match self.builder.mgr.kind(*element) {
            NodeKind::ArrayType { element, .. } => Some(*element),
            _ => None,
        }
    }
}

fn basic_op_for(op: BinOp) -> BasicOp {
    match op {
        BinOp::Add => BasicOp::Add,
        BinOp::Sub => BasicOp::Sub,
        BinOp::Mul => BasicOp::Mul,
        BinOp::Div => BasicOp::Div,
        BinOp::Rem => BasicOp::Mod,
        BinOp::Shl => BasicOp::Shl,
        BinOp::Shr => BasicOp::Shr,
        BinOp::BitAnd => BasicOp::And,
        BinOp::BitOr => BasicOp::Or,
        BinOp::BitXor => BasicOp::Xor,
        BinOp::Eq => BasicOp::Eq,
        BinOp::Ne => BasicOp::Ne,
        BinOp::Lt => BasicOp::Lt,
        BinOp::Le => BasicOp::Le,
        BinOp::Gt => BasicOp::Gt,
        BinOp::Ge => BasicOp::Ge,
        _ => unreachable!("assignments and short-circuits are handled before"),
    }
}

/// Split `n * sizeof(T)` (either side) or a bare `sizeof(T)` into the
/// element count and the witnessed element type.
fn split_allocation_size(size: &Expr) -> (Option<Expr>, Option<SrcType>) {
    match &size.kind {
        ExprKind::SizeofType(ty) => (None, Some(ty.clone())),
        ExprKind::Binary {
            op: BinOp::Mul,
            lhs,
            rhs,
        } => {
            if let ExprKind::SizeofType(ty) = &rhs.kind {
                return (Some((**lhs).clone()), Some(ty.clone()));
            }
            if let ExprKind::SizeofType(ty) = &lhs.kind {
                return (Some((**rhs).clone()), Some(ty.clone()));
            }
            (Some(size.clone()), None)
        }
        _ => (Some(size.clone()), None),
    }
}
