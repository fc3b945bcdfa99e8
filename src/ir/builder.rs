//! Typed smart constructors for IR nodes.
//!
//! Every node a client constructs goes through the [`Builder`], which
//! validates shapes (a call's arity must match its function type, a for
//! loop's bounds must fit its iterator) and inserts legal conversions where
//! an argument type differs from the corresponding parameter type. There is
//! no other way to obtain ill-formed trees than bypassing the builder.

use std::error::Error;
use std::fmt::Display;

use crate::types::{deduction, is_sub_type, unify};

use super::lang::{self, Basic, FAMILY_INT, FAMILY_REAL, FAMILY_UINT};
use super::manager::{fresh_id, NodeManager};
use super::printer;
use super::{NodeCategory, NodeId, NodeKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrError {
    IllFormedNode(IllFormedNode),
    TypeMismatch(TypeMismatch),
}

impl Display for IrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrError::IllFormedNode(e) => e.fmt(f),
            IrError::TypeMismatch(e) => e.fmt(f),
        }
    }
}

impl Error for IrError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IllFormedNode {
    pub reason: String,
}

impl Display for IllFormedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ill-formed node: {}", self.reason)
    }
}

impl Error for IllFormedNode {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeMismatch {
    pub expected: String,
    pub actual: String,
}

impl Display for TypeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected type '{}' but got '{}'",
            self.expected, self.actual
        )
    }
}

impl Error for TypeMismatch {}

pub type IrResult<T> = Result<T, IrError>;

fn ill_formed(reason: impl ToString) -> IrError {
    IrError::IllFormedNode(IllFormedNode {
        reason: reason.to_string(),
    })
}

/// The construction facade over a [`NodeManager`]: the manager, the builtin
/// table, and the smart constructors.
pub struct Builder {
    pub mgr: NodeManager,
    pub basic: Basic,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);
        Builder { mgr, basic }
    }

    fn mismatch(&self, expected: NodeId, actual: NodeId) -> IrError {
        IrError::TypeMismatch(TypeMismatch {
            expected: printer::print(&self.mgr, expected),
            actual: printer::print(&self.mgr, actual),
        })
    }

    // ---- literals and variables --------------------------------------

    pub fn literal(&mut self, ty: NodeId, value: impl ToString) -> NodeId {
        self.mgr.get(NodeKind::Literal {
            ty,
            value: value.to_string(),
        })
    }

    pub fn int_lit(&mut self, value: i64) -> NodeId {
        let ty = self.basic.int4;
        self.literal(ty, value)
    }

    pub fn uint_lit(&mut self, value: u64) -> NodeId {
        let ty = self.basic.uint4;
        self.literal(ty, value)
    }

    pub fn real_lit(&mut self, value: impl ToString) -> NodeId {
        let ty = self.basic.real8;
        self.literal(ty, value)
    }

    pub fn bool_lit(&mut self, value: bool) -> NodeId {
        let ty = self.basic.boolean;
        self.literal(ty, value)
    }

    pub fn string_lit(&mut self, value: impl ToString) -> NodeId {
        let ty = self.basic.string;
        self.literal(ty, value)
    }

    /// A fresh variable of the given type.
    pub fn variable(&mut self, ty: NodeId) -> NodeId {
        self.mgr.get(NodeKind::Variable {
            ty,
            id: fresh_id(),
        })
    }

    /// A fresh marker wrapping `sub`, so one occurrence of a shared
    /// expression can carry its own annotations.
    pub fn marker(&mut self, sub: NodeId) -> IrResult<NodeId> {
        let ty = self
            .mgr
            .expr_type(sub)
            .ok_or_else(|| ill_formed("marker target must be an expression"))?;
        Ok(self.mgr.get(NodeKind::MarkerExpr {
            ty,
            sub,
            id: fresh_id(),
        }))
    }

    pub fn expr_type(&self, expr: NodeId) -> IrResult<NodeId> {
        self.mgr
            .expr_type(expr)
            .ok_or_else(|| ill_formed("expected an expression"))
    }

    // ---- calls -------------------------------------------------------

    /// Build a call, deducing the return type from the function type and
    /// the (possibly converted) argument types.
    pub fn call_expr(&mut self, func: NodeId, args: Vec<NodeId>) -> IrResult<NodeId> {
        let fn_type = self.expr_type(func)?;
        let args = self.adapt_arguments(fn_type, args)?;
        let arg_types = self.argument_types(&args)?;
        let ret = deduction::try_deduce_return_type(&mut self.mgr, fn_type, &arg_types)
            .ok_or_else(|| {
                ill_formed(format!(
                    "call arguments do not match function type {}",
                    printer::print(&self.mgr, fn_type)
                ))
            })?;
        Ok(self.mgr.get(NodeKind::CallExpr { ty: ret, func, args }))
    }

    /// Build a call with an explicitly provided return type; the type must
    /// agree with what deduction yields.
    pub fn call_expr_typed(
        &mut self,
        ret: NodeId,
        func: NodeId,
        args: Vec<NodeId>,
    ) -> IrResult<NodeId> {
        let fn_type = self.expr_type(func)?;
        let args = self.adapt_arguments(fn_type, args)?;
        let arg_types = self.argument_types(&args)?;
        let deduced = deduction::try_deduce_return_type(&mut self.mgr, fn_type, &arg_types)
            .ok_or_else(|| {
                ill_formed(format!(
                    "call arguments do not match function type {}",
                    printer::print(&self.mgr, fn_type)
                ))
            })?;
        if deduced != ret && unify(&mut self.mgr, deduced, ret).is_none() {
            return Err(self.mismatch(ret, deduced));
        }
        Ok(self.mgr.get(NodeKind::CallExpr { ty: ret, func, args }))
    }

    fn argument_types(&self, args: &[NodeId]) -> IrResult<Vec<NodeId>> {
        args.iter().map(|arg| self.expr_type(*arg)).collect()
    }

    /// Apply the conversion rules to the argument list of a call:
    /// variadic packing first, then per-argument cast insertion.
    fn adapt_arguments(&mut self, fn_type: NodeId, args: Vec<NodeId>) -> IrResult<Vec<NodeId>> {
        let NodeKind::FunctionType { params, .. } = self.mgr.kind(fn_type).clone() else {
            return Err(ill_formed("callee is not of function type"));
        };

        let args = self.pack_var_list(&params, args)?;
        if params.len() != args.len() {
            return Err(ill_formed(format!(
                "call arity {} does not match function arity {}",
                args.len(),
                params.len()
            )));
        }

        params
            .iter()
            .zip(args)
            .map(|(param, arg)| self.convert_argument(*param, arg))
            .collect()
    }

    /// If the function's last parameter is `varList`, pack all trailing
    /// positional arguments into a single var-list argument.
    fn pack_var_list(&mut self, params: &[NodeId], args: Vec<NodeId>) -> IrResult<Vec<NodeId>> {
        let Some(last) = params.last() else {
            return Ok(args);
        };
        if *last != self.basic.var_list || args.len() < params.len() {
            return Ok(args);
        }

        let fixed = params.len() - 1;
        let mut packed = args;
        let trailing = packed.split_off(fixed);
        let var_list_ty = self.basic.var_list;
        packed.push(self.mgr.get(NodeKind::TupleExpr {
            ty: var_list_ty,
            elements: trailing,
        }));
        Ok(packed)
    }

    /// Insert the conversion making `arg` usable as a `param`-typed
    /// argument, or fail when no legal conversion exists.
    pub fn convert_argument(&mut self, param: NodeId, arg: NodeId) -> IrResult<NodeId> {
        let actual = self.expr_type(arg)?;
        if actual == param {
            return Ok(arg);
        }
        // generic parameters are instantiated by deduction, not by casts
        if unify(&mut self.mgr, param, actual).is_some() {
            return Ok(arg);
        }
        // scalar widening and vector-to-array decay
        if is_sub_type(&self.mgr, actual, param) {
            return Ok(self.cast_expr(param, arg));
        }
        // ref<vector<T,n>> decays into ref<array<T,1>>
        if self.is_ref_vector(actual) && self.is_ref_array(param) {
            return self.call_expr(self.basic.ref_vector_to_ref_array, vec![arg]);
        }
        // numeric truncation
        if let Some(converted) = self.numeric_truncation(param, arg, actual)? {
            return Ok(converted);
        }
        Err(self.mismatch(param, actual))
    }

    fn scalar_family(&self, ty: NodeId) -> Option<(String, u64)> {
        let NodeKind::GenericType {
            family, int_params, ..
        } = self.mgr.kind(ty)
        else {
            return None;
        };
        if int_params.len() != 1 {
            return None;
        }
        let NodeKind::ConcreteIntParam { value } = self.mgr.kind(int_params[0]) else {
            return None;
        };
        Some((family.clone(), *value))
    }

    fn numeric_truncation(
        &mut self,
        param: NodeId,
        arg: NodeId,
        actual: NodeId,
    ) -> IrResult<Option<NodeId>> {
        let (Some((from, _)), Some((to, to_width))) =
            (self.scalar_family(actual), self.scalar_family(param))
        else {
            return Ok(None);
        };
        if from == FAMILY_REAL && (to == FAMILY_INT || to == FAMILY_UINT) {
            let width = lang::int_param_literal(&mut self.mgr, to_width);
            let call = self.call_expr(self.basic.real_to_int, vec![arg, width])?;
            return Ok(Some(call));
        }
        let integral = |family: &str| family == FAMILY_INT || family == FAMILY_UINT;
        if (integral(&from) && integral(&to)) || (from == FAMILY_REAL && to == FAMILY_REAL) {
            return Ok(Some(self.cast_expr(param, arg)));
        }
        Ok(None)
    }

    fn is_ref_vector(&self, ty: NodeId) -> bool {
        let NodeKind::RefType { element } = self.mgr.kind(ty) else {
            return false;
        };
        matches!(self.mgr.kind(*element), NodeKind::VectorType { .. })
    }

    fn is_ref_array(&self, ty: NodeId) -> bool {
        let NodeKind::RefType { element } = self.mgr.kind(ty) else {
            return false;
        };
        matches!(self.mgr.kind(*element), NodeKind::ArrayType { .. })
    }

    // ---- ref sugar ---------------------------------------------------

    /// Allocate a fresh stack location holding `init`.
    pub fn ref_var(&mut self, init: NodeId) -> IrResult<NodeId> {
        self.call_expr(self.basic.ref_var, vec![init])
    }

    /// Read the value out of a `ref`.
    pub fn deref(&mut self, source: NodeId) -> IrResult<NodeId> {
        let ty = self.expr_type(source)?;
        if !matches!(self.mgr.kind(ty), NodeKind::RefType { .. }) {
            return Err(ill_formed(format!(
                "cannot deref non-ref value of type {}",
                printer::print(&self.mgr, ty)
            )));
        }
        self.call_expr(self.basic.ref_deref, vec![source])
    }

    /// Store `value` into the location `target`.
    pub fn assign(&mut self, target: NodeId, value: NodeId) -> IrResult<NodeId> {
        let target_ty = self.expr_type(target)?;
        let NodeKind::RefType { element } = self.mgr.kind(target_ty).clone() else {
            return Err(ill_formed("assignment target must be a ref"));
        };
        let value = self.convert_argument(element, value)?;
        self.call_expr(self.basic.ref_assign, vec![target, value])
    }

    // ---- composite expressions ---------------------------------------

    pub fn cast_expr(&mut self, ty: NodeId, sub: NodeId) -> NodeId {
        self.mgr.get(NodeKind::CastExpr { ty, sub })
    }

    pub fn tuple_expr(&mut self, elements: Vec<NodeId>) -> IrResult<NodeId> {
        let element_types = self.argument_types(&elements)?;
        let ty = self.mgr.get(NodeKind::TupleType {
            elements: element_types,
        });
        Ok(self.mgr.get(NodeKind::TupleExpr { ty, elements }))
    }

    pub fn vector_expr(&mut self, element_ty: NodeId, elements: Vec<NodeId>) -> IrResult<NodeId> {
        let elements: Vec<NodeId> = elements
            .into_iter()
            .map(|element| self.convert_argument(element_ty, element))
            .collect::<IrResult<_>>()?;
        let size = self.mgr.get(NodeKind::ConcreteIntParam {
            value: elements.len() as u64,
        });
        let ty = lang::vector_type(&mut self.mgr, element_ty, size);
        Ok(self.mgr.get(NodeKind::VectorExpr { ty, elements }))
    }

    /// A struct value; members must positionally align with the declared
    /// entries of `struct_ty`.
    pub fn struct_expr(&mut self, struct_ty: NodeId, values: Vec<NodeId>) -> IrResult<NodeId> {
        let NodeKind::StructType { entries } = self.mgr.kind(struct_ty).clone() else {
            return Err(ill_formed("struct expression requires a struct type"));
        };
        if entries.len() != values.len() {
            return Err(ill_formed(format!(
                "struct expression has {} members, type declares {}",
                values.len(),
                entries.len()
            )));
        }
        let mut members = vec![];
        for ((name, field_ty), value) in entries.into_iter().zip(values) {
            let value = self.convert_argument(field_ty, value)?;
            members.push((name, value));
        }
        Ok(self.mgr.get(NodeKind::StructExpr {
            ty: struct_ty,
            members,
        }))
    }

    // ---- lambdas -----------------------------------------------------

    /// A non-recursive lambda: a fresh lambda variable bound to a single
    /// entry definition.
    pub fn lambda_expr(
        &mut self,
        fn_type: NodeId,
        params: Vec<NodeId>,
        body: NodeId,
    ) -> IrResult<NodeId> {
        let lambda = self.lambda(fn_type, params, body)?;
        let var = self.variable(fn_type);
        let definition = self.mgr.get(NodeKind::LambdaDefinition {
            bindings: vec![(var, lambda)],
        });
        Ok(self.mgr.get(NodeKind::LambdaExpr {
            ty: fn_type,
            var,
            definition,
        }))
    }

    /// A (possibly mutually) recursive lambda selected out of a shared
    /// definition.
    pub fn lambda_expr_rec(&mut self, var: NodeId, definition: NodeId) -> IrResult<NodeId> {
        let NodeKind::LambdaDefinition { bindings } = self.mgr.kind(definition).clone() else {
            return Err(ill_formed("recursive lambda requires a lambda definition"));
        };
        if !bindings.iter().any(|(bound, _)| *bound == var) {
            return Err(ill_formed("lambda variable not bound by the definition"));
        }
        let ty = self.expr_type(var)?;
        Ok(self.mgr.get(NodeKind::LambdaExpr {
            ty,
            var,
            definition,
        }))
    }

    pub fn lambda(
        &mut self,
        fn_type: NodeId,
        params: Vec<NodeId>,
        body: NodeId,
    ) -> IrResult<NodeId> {
        let NodeKind::FunctionType {
            params: param_types,
            ..
        } = self.mgr.kind(fn_type).clone()
        else {
            return Err(ill_formed("lambda requires a function type"));
        };
        if param_types.len() != params.len() {
            return Err(ill_formed(format!(
                "lambda has {} parameters, its type declares {}",
                params.len(),
                param_types.len()
            )));
        }
        for (param, declared) in params.iter().zip(param_types) {
            let actual = self.expr_type(*param)?;
            if actual != declared {
                return Err(self.mismatch(declared, actual));
            }
        }
        if !self.mgr.kind(body).is_statement() {
            return Err(ill_formed("lambda body must be a statement"));
        }
        Ok(self.mgr.get(NodeKind::Lambda {
            ty: fn_type,
            params,
            body,
        }))
    }

    /// Build the definition of a mutually recursive group.
    pub fn lambda_definition(&mut self, bindings: Vec<(NodeId, NodeId)>) -> IrResult<NodeId> {
        for (var, lambda) in &bindings {
            if !matches!(self.mgr.kind(*var), NodeKind::Variable { .. }) {
                return Err(ill_formed("definition keys must be variables"));
            }
            if !matches!(self.mgr.kind(*lambda), NodeKind::Lambda { .. }) {
                return Err(ill_formed("definition values must be lambdas"));
            }
        }
        Ok(self.mgr.get(NodeKind::LambdaDefinition { bindings }))
    }

    // ---- statements --------------------------------------------------

    pub fn compound(&mut self, stmts: Vec<NodeId>) -> NodeId {
        self.mgr.get(NodeKind::CompoundStmt { stmts })
    }

    /// The empty statement.
    pub fn no_op(&mut self) -> NodeId {
        self.compound(vec![])
    }

    /// Wrap a statement list, avoiding a nested compound for a single
    /// compound statement.
    pub fn wrap_body(&mut self, mut stmts: Vec<NodeId>) -> NodeId {
        if stmts.len() == 1 && matches!(self.mgr.kind(stmts[0]), NodeKind::CompoundStmt { .. }) {
            return stmts.remove(0);
        }
        self.compound(stmts)
    }

    pub fn decl_stmt(&mut self, var: NodeId, init: NodeId) -> IrResult<NodeId> {
        let NodeKind::Variable { ty, .. } = self.mgr.kind(var).clone() else {
            return Err(ill_formed("declaration requires a variable"));
        };
        let init = self.convert_argument(ty, init)?;
        Ok(self.mgr.get(NodeKind::DeclarationStmt { var, init }))
    }

    pub fn if_stmt(
        &mut self,
        condition: NodeId,
        then_body: NodeId,
        else_body: Option<NodeId>,
    ) -> IrResult<NodeId> {
        let cond_ty = self.expr_type(condition)?;
        if cond_ty != self.basic.boolean {
            return Err(self.mismatch(self.basic.boolean, cond_ty));
        }
        let else_body = match else_body {
            Some(body) => body,
            None => self.no_op(),
        };
        Ok(self.mgr.get(NodeKind::IfStmt {
            condition,
            then_body,
            else_body,
        }))
    }

    pub fn while_stmt(&mut self, condition: NodeId, body: NodeId) -> IrResult<NodeId> {
        let cond_ty = self.expr_type(condition)?;
        if cond_ty != self.basic.boolean {
            return Err(self.mismatch(self.basic.boolean, cond_ty));
        }
        Ok(self.mgr.get(NodeKind::WhileStmt { condition, body }))
    }

    /// A normalized counted loop. The declared iterator, the bound and the
    /// step must agree on one scalar type.
    pub fn for_stmt(
        &mut self,
        decl: NodeId,
        body: NodeId,
        end: NodeId,
        step: NodeId,
    ) -> IrResult<NodeId> {
        let NodeKind::DeclarationStmt { var, .. } = self.mgr.kind(decl).clone() else {
            return Err(ill_formed("for loop requires an iterator declaration"));
        };
        let iter_ty = self.expr_type(var)?;
        let end = self.convert_argument(iter_ty, end)?;
        let step = self.convert_argument(iter_ty, step)?;
        Ok(self.mgr.get(NodeKind::ForStmt {
            decl,
            body,
            end,
            step,
        }))
    }

    pub fn switch_stmt(
        &mut self,
        expr: NodeId,
        cases: Vec<(NodeId, NodeId)>,
        default: Option<NodeId>,
    ) -> IrResult<NodeId> {
        for (guard, _) in &cases {
            if !matches!(self.mgr.kind(*guard), NodeKind::Literal { .. }) {
                return Err(ill_formed("switch case guards must be literals"));
            }
        }
        let default = match default {
            Some(body) => body,
            None => self.no_op(),
        };
        Ok(self.mgr.get(NodeKind::SwitchStmt {
            expr,
            cases,
            default,
        }))
    }

    pub fn return_stmt(&mut self, expr: NodeId) -> NodeId {
        self.mgr.get(NodeKind::ReturnStmt { expr })
    }

    pub fn break_stmt(&mut self) -> NodeId {
        self.mgr.get(NodeKind::BreakStmt)
    }

    pub fn continue_stmt(&mut self) -> NodeId {
        self.mgr.get(NodeKind::ContinueStmt)
    }

    // ---- programs ----------------------------------------------------

    pub fn program(&mut self, entry_points: Vec<NodeId>, main: bool) -> IrResult<NodeId> {
        for entry in &entry_points {
            if self.mgr.category(*entry) != NodeCategory::Expression {
                return Err(ill_formed("program entry points must be expressions"));
            }
        }
        Ok(self.mgr.get(NodeKind::Program { entry_points, main }))
    }
}
