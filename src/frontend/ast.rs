//! The source AST consumed by the converters.
//!
//! This is the collaborator contract of the parser: a translation unit of
//! id-indexed declarations with sum-type statements, expressions and
//! types. The front end never parses source text; drivers feed it this
//! structure (e.g. deserialized from JSON).

use std::collections::HashMap;

use crate::span::Span;

macro_rules! ast_id {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

ast_id!(FuncId);
ast_id!(RecordId);
ast_id!(TypedefId);
ast_id!(VarId);
ast_id!(StmtId);

/// One translation unit: all declarations plus the pragma match maps
/// attached to its statements.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct TranslationUnit {
    pub name: String,
    pub functions: Vec<FuncDecl>,
    pub records: Vec<RecordDecl>,
    pub typedefs: Vec<TypedefDecl>,
    pub vars: Vec<VarDecl>,
    pub entry_point: Option<FuncId>,
    pub pragmas: PragmaMap,
}

impl TranslationUnit {
    pub fn new(name: impl ToString) -> TranslationUnit {
        TranslationUnit {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn function(&self, id: FuncId) -> &FuncDecl {
        &self.functions[id.index()]
    }

    pub fn record(&self, id: RecordId) -> &RecordDecl {
        &self.records[id.index()]
    }

    pub fn typedef(&self, id: TypedefId) -> &TypedefDecl {
        &self.typedefs[id.index()]
    }

    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.index()]
    }

    pub fn add_function(&mut self, decl: FuncDecl) -> FuncId {
        self.functions.push(decl);
        FuncId(self.functions.len() as u32 - 1)
    }

    pub fn add_record(&mut self, decl: RecordDecl) -> RecordId {
        self.records.push(decl);
        RecordId(self.records.len() as u32 - 1)
    }

    pub fn add_typedef(&mut self, decl: TypedefDecl) -> TypedefId {
        self.typedefs.push(decl);
        TypedefId(self.typedefs.len() as u32 - 1)
    }

    pub fn add_var(&mut self, decl: VarDecl) -> VarId {
        self.vars.push(decl);
        VarId(self.vars.len() as u32 - 1)
    }

    pub fn globals(&self) -> impl Iterator<Item = (VarId, &VarDecl)> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, var)| var.storage == Storage::Global)
            .map(|(index, var)| (VarId(index as u32), var))
    }

    /// See through typedef chains to the canonical underlying type; the
    /// outermost alias name (if any) is reported alongside.
    pub fn desugar(&self, ty: &SrcType) -> (SrcType, Option<String>) {
        let mut alias = None;
        let mut current = ty.clone();
        while let SrcType::Alias(id) = current {
            let typedef = self.typedef(id);
            alias.get_or_insert(typedef.name.clone());
            current = typedef.underlying.clone();
        }
        (current, alias)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<VarId>,
    pub ret: SrcType,
    /// `None` marks an external declaration without definition.
    pub body: Option<Stmt>,
    pub variadic: bool,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RecordKind {
    Struct,
    Union,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RecordDecl {
    pub name: String,
    pub kind: RecordKind,
    pub fields: Vec<(String, SrcType)>,
    pub span: Span,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TypedefDecl {
    pub name: String,
    pub underlying: SrcType,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Storage {
    Param,
    Local,
    Global,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: SrcType,
    pub storage: Storage,
    /// Initializer of a global; local initializers live in their
    /// declaration statements.
    pub init: Option<Expr>,
    pub span: Span,
}

/// Canonical source types. Sized integers carry their byte width; `T[n]`
/// keeps its constant size, variable-length arrays keep their size
/// expression at the declaration site instead.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SrcType {
    Void,
    Bool,
    Char,
    Int { bytes: u64, signed: bool },
    Real { bytes: u64 },
    Pointer(Box<SrcType>),
    ConstArray { element: Box<SrcType>, size: u64 },
    IncompleteArray(Box<SrcType>),
    VariableArray(Box<SrcType>),
    Function {
        params: Vec<SrcType>,
        ret: Box<SrcType>,
        variadic: bool,
    },
    Record(RecordId),
    Alias(TypedefId),
    /// Anything the front end cannot represent (dependent types, complex
    /// numbers, ...); carries a printable description.
    Unsupported(String),
}

impl SrcType {
    pub fn int() -> SrcType {
        SrcType::Int {
            bytes: 4,
            signed: true,
        }
    }

    pub fn uint() -> SrcType {
        SrcType::Int {
            bytes: 4,
            signed: false,
        }
    }

    pub fn double() -> SrcType {
        SrcType::Real { bytes: 8 }
    }

    pub fn pointer_to(element: SrcType) -> SrcType {
        SrcType::Pointer(Box::new(element))
    }
}

// ---- statements ------------------------------------------------------

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Stmt {
    pub id: StmtId,
    pub span: Span,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(id: StmtId, kind: StmtKind) -> Stmt {
        Stmt {
            id,
            span: Span::default(),
            kind,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum StmtKind {
    Compound(Vec<Stmt>),
    /// One declaration statement can declare several variables. For a
    /// variable-sized array declarator the expression is the size of the
    /// array (its type retains no size), otherwise it is the initializer.
    Decl(Vec<(VarId, Option<Expr>)>),
    If {
        /// A condition-declared variable (`if (int x = f())`), lifted by
        /// the converter into the enclosing scope.
        cond_decl: Option<(VarId, Expr)>,
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond_decl: Option<(VarId, Expr)>,
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        inc: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch {
        cond: Expr,
        body: Vec<SwitchItem>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Expr(Expr),
    Null,
}

/// Flat switch body content, the way C lays it out: labels interleaved
/// with statements. Statements before the first label are "stray" and get
/// lifted in front of the switch.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum SwitchItem {
    Case(Expr),
    Default,
    Stmt(Stmt),
}

// ---- expressions -----------------------------------------------------

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Expr {
        Expr {
            span: Span::default(),
            kind,
        }
    }

    pub fn int(value: i64) -> Expr {
        Expr::new(ExprKind::IntLit(value))
    }

    pub fn var(id: VarId) -> Expr {
        Expr::new(ExprKind::Var(id))
    }

    pub fn unary(op: UnOp, sub: Expr) -> Expr {
        Expr::new(ExprKind::Unary {
            op,
            sub: Box::new(sub),
        })
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn index(base: Expr, index: Expr) -> Expr {
        Expr::new(ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        })
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(String),
    CharLit(char),
    StringLit(String),
    Var(VarId),
    Func(FuncId),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnOp,
        sub: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cast {
        ty: SrcType,
        sub: Box<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: String,
        arrow: bool,
    },
    InitList(Vec<Expr>),
    SizeofType(SrcType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnOp {
    Plus,
    Minus,
    Not,
    LNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LAnd,
    LOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    Comma,
}

impl BinOp {
    /// The operator a compound assignment applies before assigning.
    pub fn compound_base(self) -> Option<BinOp> {
        match self {
            BinOp::AddAssign => Some(BinOp::Add),
            BinOp::SubAssign => Some(BinOp::Sub),
            BinOp::MulAssign => Some(BinOp::Mul),
            BinOp::DivAssign => Some(BinOp::Div),
            BinOp::RemAssign => Some(BinOp::Rem),
            BinOp::ShlAssign => Some(BinOp::Shl),
            BinOp::ShrAssign => Some(BinOp::Shr),
            BinOp::AndAssign => Some(BinOp::BitAnd),
            BinOp::OrAssign => Some(BinOp::BitOr),
            BinOp::XorAssign => Some(BinOp::BitXor),
            _ => None,
        }
    }

    pub fn is_assignment(self) -> bool {
        self == BinOp::Assign || self.compound_base().is_some()
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

// ---- pragmas ---------------------------------------------------------

/// Pre-matched pragma clauses: clause name to value list.
pub type MatchMap = HashMap<String, Vec<MatchValue>>;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum MatchValue {
    Ident(String),
    Expr(Expr),
    Str(String),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Pragma {
    /// The pragma family, e.g. `parallel`, `for`, `barrier`.
    pub family: String,
    pub clauses: MatchMap,
    pub span: Span,
}

/// Statement id to the pragmas attached in front of that statement.
pub type PragmaMap = HashMap<StmtId, Vec<Pragma>>;
