//! Builtin types and operations.
//!
//! The front end and the builder never invent ad-hoc operators: every
//! primitive operation is a literal with a (possibly generic) function type
//! drawn from this table. Generic builtins use the type variables `'a`/`'b`
//! and the int-param variables `#a`/`#b`/`#n`; call sites instantiate them
//! through return-type deduction.
//!
//! Since the node store interns structurally, builtins need no caching:
//! rebuilding `int.add` a second time yields the identical node.

use super::manager::NodeManager;
use super::{NodeId, NodeKind};

/// Families of the builtin scalar types.
pub const FAMILY_INT: &str = "int";
pub const FAMILY_UINT: &str = "uint";
pub const FAMILY_REAL: &str = "real";
pub const FAMILY_BOOL: &str = "bool";
pub const FAMILY_CHAR: &str = "char";
pub const FAMILY_UNIT: &str = "unit";
pub const FAMILY_ANY_REF: &str = "anyRef";
pub const FAMILY_STRING: &str = "string";
pub const FAMILY_VAR_LIST: &str = "varList";
pub const FAMILY_IDENTIFIER: &str = "identifier";
pub const FAMILY_TYPE: &str = "type";
pub const FAMILY_INT_PARAM: &str = "intTypeParam";

/// Operators of the basic generator table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BasicOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BasicOp {
    pub fn name(self) -> &'static str {
        match self {
            BasicOp::Add => "add",
            BasicOp::Sub => "sub",
            BasicOp::Mul => "mul",
            BasicOp::Div => "div",
            BasicOp::Mod => "mod",
            BasicOp::And => "and",
            BasicOp::Or => "or",
            BasicOp::Xor => "xor",
            BasicOp::Shl => "shl",
            BasicOp::Shr => "shr",
            BasicOp::Not => "not",
            BasicOp::Eq => "eq",
            BasicOp::Ne => "ne",
            BasicOp::Lt => "lt",
            BasicOp::Le => "le",
            BasicOp::Gt => "gt",
            BasicOp::Ge => "ge",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BasicOp::Eq | BasicOp::Ne | BasicOp::Lt | BasicOp::Le | BasicOp::Gt | BasicOp::Ge
        )
    }
}

/// Pre-built handles on the frequently used builtin types and literals.
pub struct Basic {
    pub unit: NodeId,
    pub boolean: NodeId,
    pub character: NodeId,
    pub string: NodeId,
    pub any_ref: NodeId,
    pub var_list: NodeId,
    pub identifier: NodeId,
    pub int1: NodeId,
    pub int2: NodeId,
    pub int4: NodeId,
    pub int8: NodeId,
    pub uint1: NodeId,
    pub uint2: NodeId,
    pub uint4: NodeId,
    pub uint8: NodeId,
    pub real4: NodeId,
    pub real8: NodeId,

    pub ref_deref: NodeId,
    pub ref_assign: NodeId,
    pub ref_var: NodeId,
    pub ref_new: NodeId,
    pub ref_delete: NodeId,
    pub array_create_1d: NodeId,
    pub array_ref_elem_1d: NodeId,
    pub array_subscript_1d: NodeId,
    pub vector_ref_elem: NodeId,
    pub vector_subscript: NodeId,
    pub array_view: NodeId,
    pub ref_vector_to_ref_array: NodeId,
    pub ref_scalar_to_ref_array: NodeId,
    pub composite_member_access: NodeId,
    pub composite_ref_elem: NodeId,
    pub real_to_int: NodeId,
    pub ptr_eq: NodeId,
    pub bool_lnot: NodeId,
    pub if_then_else: NodeId,
    pub get_null: NodeId,
    pub sizeof: NodeId,
    pub undefined: NodeId,
    pub unit_const: NodeId,
}

pub fn generic_type(mgr: &mut NodeManager, family: &str) -> NodeId {
    mgr.get(NodeKind::GenericType {
        family: family.into(),
        type_params: vec![],
        int_params: vec![],
        base: None,
    })
}

pub fn sized_type(mgr: &mut NodeManager, family: &str, bytes: u64) -> NodeId {
    let size = mgr.get(NodeKind::ConcreteIntParam { value: bytes });
    mgr.get(NodeKind::GenericType {
        family: family.into(),
        type_params: vec![],
        int_params: vec![size],
        base: None,
    })
}

pub fn type_var(mgr: &mut NodeManager, name: &str) -> NodeId {
    mgr.get(NodeKind::TypeVariable { name: name.into() })
}

pub fn int_param_var(mgr: &mut NodeManager, symbol: &str) -> NodeId {
    mgr.get(NodeKind::VariableIntParam {
        symbol: symbol.into(),
    })
}

pub fn ref_type(mgr: &mut NodeManager, element: NodeId) -> NodeId {
    mgr.get(NodeKind::RefType { element })
}

pub fn array_type(mgr: &mut NodeManager, element: NodeId) -> NodeId {
    let dim = mgr.get(NodeKind::ConcreteIntParam { value: 1 });
    mgr.get(NodeKind::ArrayType { element, dim })
}

pub fn vector_type(mgr: &mut NodeManager, element: NodeId, size: NodeId) -> NodeId {
    mgr.get(NodeKind::VectorType { element, size })
}

pub fn function_type(mgr: &mut NodeManager, params: Vec<NodeId>, ret: NodeId) -> NodeId {
    mgr.get(NodeKind::FunctionType {
        params,
        ret,
        plain: true,
    })
}

/// The meta type `type<T>` carrying a type as a value.
pub fn type_lit_type(mgr: &mut NodeManager, ty: NodeId) -> NodeId {
    mgr.get(NodeKind::GenericType {
        family: FAMILY_TYPE.into(),
        type_params: vec![ty],
        int_params: vec![],
        base: None,
    })
}

fn builtin(mgr: &mut NodeManager, name: &str, ty: NodeId) -> NodeId {
    mgr.get(NodeKind::Literal {
        ty,
        value: name.into(),
    })
}

impl Basic {
    pub fn new(mgr: &mut NodeManager) -> Basic {
        let unit = generic_type(mgr, FAMILY_UNIT);
        let boolean = generic_type(mgr, FAMILY_BOOL);
        let character = generic_type(mgr, FAMILY_CHAR);
        let string = generic_type(mgr, FAMILY_STRING);
        let any_ref = generic_type(mgr, FAMILY_ANY_REF);
        let var_list = generic_type(mgr, FAMILY_VAR_LIST);
        let identifier = generic_type(mgr, FAMILY_IDENTIFIER);
        let int1 = sized_type(mgr, FAMILY_INT, 1);
        let int2 = sized_type(mgr, FAMILY_INT, 2);
        let int4 = sized_type(mgr, FAMILY_INT, 4);
        let int8 = sized_type(mgr, FAMILY_INT, 8);
        let uint1 = sized_type(mgr, FAMILY_UINT, 1);
        let uint2 = sized_type(mgr, FAMILY_UINT, 2);
        let uint4 = sized_type(mgr, FAMILY_UINT, 4);
        let uint8 = sized_type(mgr, FAMILY_UINT, 8);
        let real4 = sized_type(mgr, FAMILY_REAL, 4);
        let real8 = sized_type(mgr, FAMILY_REAL, 8);

        let alpha = type_var(mgr, "a");
        let beta = type_var(mgr, "b");
        let ref_alpha = ref_type(mgr, alpha);
        let array_alpha = array_type(mgr, alpha);
        let ref_array_alpha = ref_type(mgr, array_alpha);
        let n = int_param_var(mgr, "n");
        let vector_alpha = vector_type(mgr, alpha, n);
        let ref_vector_alpha = ref_type(mgr, vector_alpha);
        let type_alpha = type_lit_type(mgr, alpha);
        let type_beta = type_lit_type(mgr, beta);
        let ref_beta = ref_type(mgr, beta);

        let ref_deref = {
            let ty = function_type(mgr, vec![ref_alpha], alpha);
            builtin(mgr, "ref.deref", ty)
        };
        let ref_assign = {
            let ty = function_type(mgr, vec![ref_alpha, alpha], unit);
            builtin(mgr, "ref.assign", ty)
        };
        let ref_var = {
            let ty = function_type(mgr, vec![alpha], ref_alpha);
            builtin(mgr, "ref.var", ty)
        };
        let ref_new = {
            let ty = function_type(mgr, vec![alpha], ref_alpha);
            builtin(mgr, "ref.new", ty)
        };
        let ref_delete = {
            let ty = function_type(mgr, vec![ref_alpha], unit);
            builtin(mgr, "ref.delete", ty)
        };
        let array_create_1d = {
            let ty = function_type(mgr, vec![type_alpha, uint8], array_alpha);
            builtin(mgr, "array.create.1D", ty)
        };
        let array_ref_elem_1d = {
            let ty = function_type(mgr, vec![ref_array_alpha, uint8], ref_alpha);
            builtin(mgr, "array.ref.elem.1D", ty)
        };
        let array_subscript_1d = {
            let ty = function_type(mgr, vec![array_alpha, uint8], alpha);
            builtin(mgr, "array.subscript.1D", ty)
        };
        let vector_ref_elem = {
            let ty = function_type(mgr, vec![ref_vector_alpha, uint8], ref_alpha);
            builtin(mgr, "vector.ref.elem", ty)
        };
        let vector_subscript = {
            let ty = function_type(mgr, vec![vector_alpha, uint8], alpha);
            builtin(mgr, "vector.subscript", ty)
        };
        let array_view = {
            let ty = function_type(mgr, vec![ref_array_alpha, int8], ref_array_alpha);
            builtin(mgr, "array.view", ty)
        };
        let ref_vector_to_ref_array = {
            let ty = function_type(mgr, vec![ref_vector_alpha], ref_array_alpha);
            builtin(mgr, "ref.vector.to.ref.array", ty)
        };
        let ref_scalar_to_ref_array = {
            let ty = function_type(mgr, vec![ref_alpha], ref_array_alpha);
            builtin(mgr, "ref.scalar.to.ref.array", ty)
        };
        let composite_member_access = {
            let ty = function_type(mgr, vec![alpha, identifier, type_beta], beta);
            builtin(mgr, "composite.member.access", ty)
        };
        let composite_ref_elem = {
            let ty = function_type(mgr, vec![ref_alpha, identifier, type_beta], ref_beta);
            builtin(mgr, "composite.ref.elem", ty)
        };
        let real_to_int = {
            let pa = int_param_var(mgr, "a");
            let pb = int_param_var(mgr, "b");
            let real_a = mgr.get(NodeKind::GenericType {
                family: FAMILY_REAL.into(),
                type_params: vec![],
                int_params: vec![pa],
                base: None,
            });
            let int_b = mgr.get(NodeKind::GenericType {
                family: FAMILY_INT.into(),
                type_params: vec![],
                int_params: vec![pb],
                base: None,
            });
            let param_b = mgr.get(NodeKind::GenericType {
                family: FAMILY_INT_PARAM.into(),
                type_params: vec![],
                int_params: vec![pb],
                base: None,
            });
            let ty = function_type(mgr, vec![real_a, param_b], int_b);
            builtin(mgr, "real.to.int", ty)
        };
        let ptr_eq = {
            let ty = function_type(mgr, vec![ref_alpha, ref_beta], boolean);
            builtin(mgr, "ptr.eq", ty)
        };
        let bool_lnot = {
            let ty = function_type(mgr, vec![boolean], boolean);
            builtin(mgr, "bool.lnot", ty)
        };
        let if_then_else = {
            let thunk = function_type(mgr, vec![], alpha);
            let ty = function_type(mgr, vec![boolean, thunk, thunk], alpha);
            builtin(mgr, "if.then.else", ty)
        };
        let get_null = {
            let ty = function_type(mgr, vec![type_alpha], alpha);
            builtin(mgr, "get.null", ty)
        };
        let sizeof = {
            let ty = function_type(mgr, vec![type_alpha], uint8);
            builtin(mgr, "sizeof", ty)
        };
        let undefined = {
            let ty = function_type(mgr, vec![type_alpha], alpha);
            builtin(mgr, "undefined", ty)
        };
        let unit_const = builtin(mgr, "unit", unit);

        Basic {
            unit,
            boolean,
            character,
            string,
            any_ref,
            var_list,
            identifier,
            int1,
            int2,
            int4,
            int8,
            uint1,
            uint2,
            uint4,
            uint8,
            real4,
            real8,
            ref_deref,
            ref_assign,
            ref_var,
            ref_new,
            ref_delete,
            array_create_1d,
            array_ref_elem_1d,
            array_subscript_1d,
            vector_ref_elem,
            vector_subscript,
            array_view,
            ref_vector_to_ref_array,
            ref_scalar_to_ref_array,
            composite_member_access,
            composite_ref_elem,
            real_to_int,
            ptr_eq,
            bool_lnot,
            if_then_else,
            get_null,
            sizeof,
            undefined,
            unit_const,
        }
    }

    pub fn int_type(&self, bytes: u64) -> Option<NodeId> {
        match bytes {
            1 => Some(self.int1),
            2 => Some(self.int2),
            4 => Some(self.int4),
            8 => Some(self.int8),
            _ => None,
        }
    }

    pub fn uint_type(&self, bytes: u64) -> Option<NodeId> {
        match bytes {
            1 => Some(self.uint1),
            2 => Some(self.uint2),
            4 => Some(self.uint4),
            8 => Some(self.uint8),
            _ => None,
        }
    }

    pub fn real_type(&self, bytes: u64) -> Option<NodeId> {
        match bytes {
            4 => Some(self.real4),
            8 => Some(self.real8),
            _ => None,
        }
    }

    /// Select the operator literal for the basic generator table entry
    /// `(family, op)`. Integer and unsigned entries are generic over the
    /// bit width (`#a`); comparisons return `bool`.
    ///
    /// Returns `None` for combinations outside the table (e.g. `real.mod`).
    pub fn operator(&self, mgr: &mut NodeManager, family: &str, op: BasicOp) -> Option<NodeId> {
        let supported = match family {
            FAMILY_INT | FAMILY_UINT => true,
            FAMILY_REAL => matches!(
                op,
                BasicOp::Add | BasicOp::Sub | BasicOp::Mul | BasicOp::Div
            ) || op.is_comparison(),
            FAMILY_BOOL => matches!(op, BasicOp::And | BasicOp::Or | BasicOp::Xor | BasicOp::Not)
                || matches!(op, BasicOp::Eq | BasicOp::Ne),
            FAMILY_CHAR => op.is_comparison(),
            _ => false,
        };
        if !supported {
            return None;
        }

        let operand = if family == FAMILY_BOOL {
            self.boolean
        } else if family == FAMILY_CHAR {
            self.character
        } else {
            let width = int_param_var(mgr, "a");
            mgr.get(NodeKind::GenericType {
                family: family.into(),
                type_params: vec![],
                int_params: vec![width],
                base: None,
            })
        };

        let ret = if op.is_comparison() {
            self.boolean
        } else {
            operand
        };
        let params = if matches!(op, BasicOp::Not) {
            vec![operand]
        } else {
            vec![operand, operand]
        };
        let ty = function_type(mgr, params, ret);
        Some(builtin(mgr, &format!("{family}.{}", op.name()), ty))
    }

    /// Whether `literal` is one of the builtin operations of this table.
    pub fn is_builtin(&self, mgr: &NodeManager, literal: NodeId) -> bool {
        let NodeKind::Literal { value, .. } = mgr.kind(literal) else {
            return false;
        };
        value.contains('.')
    }
}

/// An identifier literal, used as the member selector of the composite
/// access builtins.
pub fn identifier_literal(mgr: &mut NodeManager, basic: &Basic, name: &str) -> NodeId {
    mgr.get(NodeKind::Literal {
        ty: basic.identifier,
        value: name.into(),
    })
}

/// A type literal `type<T>` carrying `T` as a value.
pub fn type_literal(mgr: &mut NodeManager, ty: NodeId) -> NodeId {
    let meta = type_lit_type(mgr, ty);
    let value = super::printer::print(mgr, ty);
    mgr.get(NodeKind::Literal { ty: meta, value })
}

/// An int-param literal, e.g. the target width argument of `real.to.int`.
pub fn int_param_literal(mgr: &mut NodeManager, value: u64) -> NodeId {
    let param = mgr.get(NodeKind::ConcreteIntParam { value });
    let ty = mgr.get(NodeKind::GenericType {
        family: FAMILY_INT_PARAM.into(),
        type_params: vec![],
        int_params: vec![param],
        base: None,
    });
    mgr.get(NodeKind::Literal {
        ty,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_types_are_interned() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);
        assert_eq!(basic.int4, sized_type(&mut mgr, FAMILY_INT, 4));
        assert_eq!(basic.unit, generic_type(&mut mgr, FAMILY_UNIT));
    }

    #[test]
    fn test_operator_table() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);

        let add = basic.operator(&mut mgr, FAMILY_INT, BasicOp::Add).unwrap();
        let NodeKind::Literal { value, ty } = mgr.kind(add).clone() else {
            panic!("operator must be a literal");
        };
        assert_eq!(value, "int.add");
        let NodeKind::FunctionType { params, ret, .. } = mgr.kind(ty) else {
            panic!("operator must have function type");
        };
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], *ret);

        // comparisons yield bool
        let lt = basic.operator(&mut mgr, FAMILY_INT, BasicOp::Lt).unwrap();
        let ty = mgr.expr_type(lt).unwrap();
        let NodeKind::FunctionType { ret, .. } = mgr.kind(ty) else {
            panic!("operator must have function type");
        };
        assert_eq!(*ret, basic.boolean);

        // real modulo is not in the table
        assert!(basic.operator(&mut mgr, FAMILY_REAL, BasicOp::Mod).is_none());
    }

    #[test]
    fn test_operator_is_stable() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);
        let a = basic.operator(&mut mgr, FAMILY_UINT, BasicOp::Sub).unwrap();
        let b = basic.operator(&mut mgr, FAMILY_UINT, BasicOp::Sub).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_int_param_literal() {
        let mut mgr = NodeManager::new();
        let lit = int_param_literal(&mut mgr, 4);
        let NodeKind::Literal { value, .. } = mgr.kind(lit) else {
            panic!("expected literal");
        };
        assert_eq!(value, "4");
    }
}
