//! # The INSPIRE intermediate representation
//!
//! All IR entities are nodes: types, expressions, statements, programs and a
//! small set of support nodes (lambdas and recursive definitions). Every node
//! is owned by a [`NodeManager`] which enforces structural uniqueness: two
//! nodes with the same kind and the same child identities are the same node.
//! Node identity is therefore [`NodeId`] equality.
//!
//! Nodes are immutable. The only mutable facet is the annotation side channel
//! (see [`annotations`]), which never participates in structural hashing.

pub mod annotations;
pub mod builder;
pub mod lang;
pub mod manager;
pub mod printer;
pub mod replacer;
pub mod visitor;

pub use self::builder::{Builder, IrError};
pub use self::manager::NodeManager;
pub use self::visitor::NodeAddress;

/// Handle to a node inside a [`NodeManager`]. Cheap to copy; comparing two
/// handles obtained from the same manager compares node identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Coarse classification of node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Type,
    IntTypeParam,
    Expression,
    Statement,
    Program,
    Support,
}

/// The structural content of a node: its kind tag together with the
/// identities of its children. This is the interning key of the node store.
///
/// `Variable` and `MarkerExpr` carry a fresh id drawn from a process-wide
/// counter; since the id is part of the structural key, two distinct
/// variables never collapse into one node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // ---- types -------------------------------------------------------
    /// Type unknown, to be bound by a substitution. Printed as `'name`.
    TypeVariable { name: String },
    /// Carrier for all named primitive and user types: `int<4>`,
    /// `real<8>`, `bool`, `unit`, `anyRef`, `vector<..>`-unrelated user
    /// names, etc. `base` is an optional parent type for user declared
    /// sub-types.
    GenericType {
        family: String,
        type_params: Vec<NodeId>,
        int_params: Vec<NodeId>,
        base: Option<NodeId>,
    },
    /// Ordered heterogeneous product.
    TupleType { elements: Vec<NodeId> },
    /// `plain` functions are raw pointer-callables; non-plain functions are
    /// closures carrying an environment.
    FunctionType {
        params: Vec<NodeId>,
        ret: NodeId,
        plain: bool,
    },
    /// Named composite; member identifiers are unique within the composite.
    StructType { entries: Vec<(String, NodeId)> },
    UnionType { entries: Vec<(String, NodeId)> },
    /// Unbounded array of dimension `dim` (an int type param).
    ArrayType { element: NodeId, dim: NodeId },
    /// Statically sized vector; `size` is an int type param.
    VectorType { element: NodeId, size: NodeId },
    /// Mutable location containing an element-typed value.
    RefType { element: NodeId },
    /// Buffered communication channel; `size = 0` is a handshake.
    ChannelType { element: NodeId, size: NodeId },
    /// Recursive type reference: `var` is bound by `definition`, which is a
    /// `RecTypeDefinition` mapping every member of the recursion to its
    /// body. Mutually recursive members share one definition.
    RecType { var: NodeId, definition: NodeId },

    // ---- int type params ---------------------------------------------
    VariableIntParam { symbol: String },
    ConcreteIntParam { value: u64 },

    // ---- expressions -------------------------------------------------
    Literal { ty: NodeId, value: String },
    /// Variables are equal only if their fresh ids are equal.
    Variable { ty: NodeId, id: u64 },
    CallExpr {
        ty: NodeId,
        func: NodeId,
        args: Vec<NodeId>,
    },
    CastExpr { ty: NodeId, sub: NodeId },
    /// Expression form of a lambda; `var` selects the entry of
    /// `definition` this expression evaluates to.
    LambdaExpr {
        ty: NodeId,
        var: NodeId,
        definition: NodeId,
    },
    TupleExpr { ty: NodeId, elements: Vec<NodeId> },
    VectorExpr { ty: NodeId, elements: Vec<NodeId> },
    StructExpr {
        ty: NodeId,
        members: Vec<(String, NodeId)>,
    },
    UnionExpr {
        ty: NodeId,
        member: String,
        value: NodeId,
    },
    /// A parallel work item: a thread-count range expression, local
    /// declarations and the default body.
    JobExpr {
        ty: NodeId,
        range: NodeId,
        local_decls: Vec<NodeId>,
        default_body: NodeId,
    },
    /// Identity-preserving tag. Structurally unique through its fresh id so
    /// distinct occurrences of a shared sub-expression can carry distinct
    /// annotations.
    MarkerExpr { ty: NodeId, sub: NodeId, id: u64 },

    // ---- statements --------------------------------------------------
    CompoundStmt { stmts: Vec<NodeId> },
    DeclarationStmt { var: NodeId, init: NodeId },
    IfStmt {
        condition: NodeId,
        then_body: NodeId,
        else_body: NodeId,
    },
    WhileStmt { condition: NodeId, body: NodeId },
    /// Normal form loop: the declared iterator runs from its initialiser
    /// to `end` by `step`; all three are side-effect free.
    ForStmt {
        decl: NodeId,
        body: NodeId,
        end: NodeId,
        step: NodeId,
    },
    SwitchStmt {
        expr: NodeId,
        cases: Vec<(NodeId, NodeId)>,
        default: NodeId,
    },
    BreakStmt,
    ContinueStmt,
    ReturnStmt { expr: NodeId },
    /// Statement counterpart of [`NodeKind::MarkerExpr`].
    MarkerStmt { sub: NodeId, id: u64 },

    // ---- program -----------------------------------------------------
    Program {
        entry_points: Vec<NodeId>,
        main: bool,
    },

    // ---- support -----------------------------------------------------
    /// One lambda: its function type, parameter variables and body.
    Lambda {
        ty: NodeId,
        params: Vec<NodeId>,
        body: NodeId,
    },
    /// Mapping from lambda variables to lambdas; the unit of (mutual)
    /// function recursion.
    LambdaDefinition { bindings: Vec<(NodeId, NodeId)> },
    /// Mapping from type variables to type bodies; the unit of (mutual)
    /// type recursion.
    RecTypeDefinition { bindings: Vec<(NodeId, NodeId)> },
}

impl NodeKind {
    pub fn category(&self) -> NodeCategory {
        use NodeKind::*;
        match self {
            TypeVariable { .. } | GenericType { .. } | TupleType { .. }
            | FunctionType { .. } | StructType { .. } | UnionType { .. }
            | ArrayType { .. } | VectorType { .. } | RefType { .. }
            | ChannelType { .. } | RecType { .. } => NodeCategory::Type,
            VariableIntParam { .. } | ConcreteIntParam { .. } => NodeCategory::IntTypeParam,
            Literal { .. } | Variable { .. } | CallExpr { .. } | CastExpr { .. }
            | LambdaExpr { .. } | TupleExpr { .. } | VectorExpr { .. }
            | StructExpr { .. } | UnionExpr { .. } | JobExpr { .. }
            | MarkerExpr { .. } => NodeCategory::Expression,
            CompoundStmt { .. } | DeclarationStmt { .. } | IfStmt { .. }
            | WhileStmt { .. } | ForStmt { .. } | SwitchStmt { .. } | BreakStmt
            | ContinueStmt | ReturnStmt { .. } | MarkerStmt { .. } => NodeCategory::Statement,
            Program { .. } => NodeCategory::Program,
            Lambda { .. } | LambdaDefinition { .. } | RecTypeDefinition { .. } => {
                NodeCategory::Support
            }
        }
    }

    /// The ordered child list. The order is canonical: [`with_children`]
    /// consumes a child list produced by this function.
    ///
    /// [`with_children`]: NodeKind::with_children
    pub fn children(&self) -> Vec<NodeId> {
        use NodeKind::*;
        match self {
            TypeVariable { .. }
            | VariableIntParam { .. }
            | ConcreteIntParam { .. }
            | BreakStmt
            | ContinueStmt => vec![],
            GenericType {
                type_params,
                int_params,
                base,
                ..
            } => {
                let mut children = type_params.clone();
                children.extend(int_params.iter().copied());
                children.extend(base.iter().copied());
                children
            }
            TupleType { elements } => elements.clone(),
            FunctionType { params, ret, .. } => {
                let mut children = params.clone();
                children.push(*ret);
                children
            }
            StructType { entries } | UnionType { entries } => {
                entries.iter().map(|(_, ty)| *ty).collect()
            }
            ArrayType { element, dim } => vec![*element, *dim],
            VectorType { element, size } => vec![*element, *size],
            RefType { element } => vec![*element],
            ChannelType { element, size } => vec![*element, *size],
            RecType { var, definition } => vec![*var, *definition],
            Literal { ty, .. } => vec![*ty],
            Variable { ty, .. } => vec![*ty],
            CallExpr { ty, func, args } => {
                let mut children = vec![*ty, *func];
                children.extend(args.iter().copied());
                children
            }
            CastExpr { ty, sub } => vec![*ty, *sub],
            LambdaExpr {
                ty,
                var,
                definition,
            } => vec![*ty, *var, *definition],
            TupleExpr { ty, elements } | VectorExpr { ty, elements } => {
                let mut children = vec![*ty];
                children.extend(elements.iter().copied());
                children
            }
            StructExpr { ty, members } => {
                let mut children = vec![*ty];
                children.extend(members.iter().map(|(_, value)| *value));
                children
            }
            UnionExpr { ty, value, .. } => vec![*ty, *value],
            JobExpr {
                ty,
                range,
                local_decls,
                default_body,
            } => {
                let mut children = vec![*ty, *range];
                children.extend(local_decls.iter().copied());
                children.push(*default_body);
                children
            }
            MarkerExpr { ty, sub, .. } => vec![*ty, *sub],
            CompoundStmt { stmts } => stmts.clone(),
            DeclarationStmt { var, init } => vec![*var, *init],
            IfStmt {
                condition,
                then_body,
                else_body,
            } => vec![*condition, *then_body, *else_body],
            WhileStmt { condition, body } => vec![*condition, *body],
            ForStmt {
                decl,
                body,
                end,
                step,
            } => vec![*decl, *body, *end, *step],
            SwitchStmt {
                expr,
                cases,
                default,
            } => {
                let mut children = vec![*expr];
                for (guard, body) in cases {
                    children.push(*guard);
                    children.push(*body);
                }
                children.push(*default);
                children
            }
            ReturnStmt { expr } => vec![*expr],
            MarkerStmt { sub, .. } => vec![*sub],
            Program { entry_points, .. } => entry_points.clone(),
            Lambda { ty, params, body } => {
                let mut children = vec![*ty];
                children.extend(params.iter().copied());
                children.push(*body);
                children
            }
            LambdaDefinition { bindings } | RecTypeDefinition { bindings } => {
                let mut children = vec![];
                for (var, value) in bindings {
                    children.push(*var);
                    children.push(*value);
                }
                children
            }
        }
    }

    /// Rebuild this kind with a replaced child list. The list must have the
    /// arity produced by [`children`](NodeKind::children) for this kind;
    /// the replacer only ever exchanges child identities, never arity.
    pub fn with_children(&self, children: &[NodeId]) -> NodeKind {
        use NodeKind::*;
        let mut iter = children.iter().copied();
        let mut next = || {
            iter.next()
                .unwrap_or_else(|| unreachable!("child list arity mismatch"))
        };
        match self {
            TypeVariable { .. }
            | VariableIntParam { .. }
            | ConcreteIntParam { .. }
            | BreakStmt
            | ContinueStmt => self.clone(),
            GenericType {
                family,
                type_params,
                int_params,
                base,
            } => GenericType {
                family: family.clone(),
                type_params: (0..type_params.len()).map(|_| next()).collect(),
                int_params: (0..int_params.len()).map(|_| next()).collect(),
                base: base.map(|_| next()),
            },
            TupleType { elements } => TupleType {
                elements: (0..elements.len()).map(|_| next()).collect(),
            },
            FunctionType { params, plain, .. } => FunctionType {
                params: (0..params.len()).map(|_| next()).collect(),
                ret: next(),
                plain: *plain,
            },
            StructType { entries } => StructType {
                entries: entries
                    .iter()
                    .map(|(name, _)| (name.clone(), next()))
                    .collect(),
            },
            UnionType { entries } => UnionType {
                entries: entries
                    .iter()
                    .map(|(name, _)| (name.clone(), next()))
                    .collect(),
            },
            ArrayType { .. } => ArrayType {
                element: next(),
                dim: next(),
            },
            VectorType { .. } => VectorType {
                element: next(),
                size: next(),
            },
            RefType { .. } => RefType { element: next() },
            ChannelType { .. } => ChannelType {
                element: next(),
                size: next(),
            },
            RecType { .. } => RecType {
                var: next(),
                definition: next(),
            },
            Literal { value, .. } => Literal {
                ty: next(),
                value: value.clone(),
            },
            Variable { id, .. } => Variable { ty: next(), id: *id },
            CallExpr { args, .. } => CallExpr {
                ty: next(),
                func: next(),
                args: (0..args.len()).map(|_| next()).collect(),
            },
            CastExpr { .. } => CastExpr {
                ty: next(),
                sub: next(),
            },
            LambdaExpr { .. } => LambdaExpr {
                ty: next(),
                var: next(),
                definition: next(),
            },
            TupleExpr { elements, .. } => TupleExpr {
                ty: next(),
                elements: (0..elements.len()).map(|_| next()).collect(),
            },
            VectorExpr { elements, .. } => VectorExpr {
                ty: next(),
                elements: (0..elements.len()).map(|_| next()).collect(),
            },
            StructExpr { members, .. } => StructExpr {
                ty: next(),
                members: members
                    .iter()
                    .map(|(name, _)| (name.clone(), next()))
                    .collect(),
            },
            UnionExpr { member, .. } => UnionExpr {
                ty: next(),
                member: member.clone(),
                value: next(),
            },
            JobExpr { local_decls, .. } => JobExpr {
                ty: next(),
                range: next(),
                local_decls: (0..local_decls.len()).map(|_| next()).collect(),
                default_body: next(),
            },
            MarkerExpr { id, .. } => MarkerExpr {
                ty: next(),
                sub: next(),
                id: *id,
            },
            CompoundStmt { stmts } => CompoundStmt {
                stmts: (0..stmts.len()).map(|_| next()).collect(),
            },
            DeclarationStmt { .. } => DeclarationStmt {
                var: next(),
                init: next(),
            },
            IfStmt { .. } => IfStmt {
                condition: next(),
                then_body: next(),
                else_body: next(),
            },
            WhileStmt { .. } => WhileStmt {
                condition: next(),
                body: next(),
            },
            ForStmt { .. } => ForStmt {
                decl: next(),
                body: next(),
                end: next(),
                step: next(),
            },
            SwitchStmt { cases, .. } => SwitchStmt {
                expr: next(),
                cases: (0..cases.len()).map(|_| (next(), next())).collect(),
                default: next(),
            },
            ReturnStmt { .. } => ReturnStmt { expr: next() },
            MarkerStmt { id, .. } => MarkerStmt {
                sub: next(),
                id: *id,
            },
            Program {
                entry_points, main, ..
            } => Program {
                entry_points: (0..entry_points.len()).map(|_| next()).collect(),
                main: *main,
            },
            Lambda { params, .. } => Lambda {
                ty: next(),
                params: (0..params.len()).map(|_| next()).collect(),
                body: next(),
            },
            LambdaDefinition { bindings } => LambdaDefinition {
                bindings: (0..bindings.len()).map(|_| (next(), next())).collect(),
            },
            RecTypeDefinition { bindings } => RecTypeDefinition {
                bindings: (0..bindings.len()).map(|_| (next(), next())).collect(),
            },
        }
    }

    /// Result type of an expression kind, `None` for everything else.
    pub fn expr_type(&self) -> Option<NodeId> {
        use NodeKind::*;
        match self {
            Literal { ty, .. }
            | Variable { ty, .. }
            | CallExpr { ty, .. }
            | CastExpr { ty, .. }
            | LambdaExpr { ty, .. }
            | TupleExpr { ty, .. }
            | VectorExpr { ty, .. }
            | StructExpr { ty, .. }
            | UnionExpr { ty, .. }
            | JobExpr { ty, .. }
            | MarkerExpr { ty, .. }
            | Lambda { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    pub fn is_type(&self) -> bool {
        self.category() == NodeCategory::Type
    }

    pub fn is_expression(&self) -> bool {
        self.category() == NodeCategory::Expression
    }

    /// Expressions are valid in statement position.
    pub fn is_statement(&self) -> bool {
        matches!(
            self.category(),
            NodeCategory::Statement | NodeCategory::Expression
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_roundtrip() {
        let kind = NodeKind::ForStmt {
            decl: NodeId(1),
            body: NodeId(2),
            end: NodeId(3),
            step: NodeId(4),
        };
        let children = kind.children();
        assert_eq!(children, vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
        assert_eq!(kind.with_children(&children), kind);
    }

    #[test]
    fn test_with_children_replaces_in_order() {
        let kind = NodeKind::SwitchStmt {
            expr: NodeId(0),
            cases: vec![(NodeId(1), NodeId(2)), (NodeId(3), NodeId(4))],
            default: NodeId(5),
        };
        let replaced = kind.with_children(&[
            NodeId(10),
            NodeId(11),
            NodeId(12),
            NodeId(13),
            NodeId(14),
            NodeId(15),
        ]);
        assert_eq!(
            replaced,
            NodeKind::SwitchStmt {
                expr: NodeId(10),
                cases: vec![(NodeId(11), NodeId(12)), (NodeId(13), NodeId(14))],
                default: NodeId(15),
            }
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            NodeKind::RefType { element: NodeId(0) }.category(),
            NodeCategory::Type
        );
        assert_eq!(
            NodeKind::BreakStmt.category(),
            NodeCategory::Statement
        );
        assert_eq!(
            NodeKind::ConcreteIntParam { value: 3 }.category(),
            NodeCategory::IntTypeParam
        );
        assert!(NodeKind::Literal {
            ty: NodeId(0),
            value: "1".into()
        }
        .is_statement());
    }
}
