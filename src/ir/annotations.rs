//! The annotation side channel.
//!
//! Annotations are typed key/value pairs attached to nodes through the
//! [`NodeManager`](super::NodeManager). They are opaque to the IR itself:
//! structural hashing and equality never see them, and replacers migrate
//! them when a node is substituted by a logically equivalent one.
//!
//! This module only holds the payload data types; the components producing
//! them live downstream (`frontend::pragma` for the OpenMP family,
//! `analysis::scop` for SCoP regions).

use std::collections::BTreeMap;

use crate::span::Span;

use super::NodeId;

/// Annotation category. One annotation per category per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnnotationKey {
    SourceLocation,
    CName,
    TypeName,
    Omp,
    Scop,
    Intercepted,
    Hint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Annotation {
    /// Position of the originating source construct.
    SourceLocation(Span),
    /// The original C name of a lowered entity.
    CName(String),
    /// The typedef name a lowered type was declared under.
    TypeName(String),
    /// OpenMP directives attached to the annotated statement.
    Omp(Vec<OmpDirective>),
    /// Static control part covering the annotated subtree.
    Scop(ScopRegion),
    /// The annotated entity matched an intercepted namespace and is kept
    /// opaque; the payload is the matching pattern.
    Intercepted(String),
    /// Free-form transformation hint.
    Hint(String),
}

impl Annotation {
    pub fn key(&self) -> AnnotationKey {
        match self {
            Annotation::SourceLocation(_) => AnnotationKey::SourceLocation,
            Annotation::CName(_) => AnnotationKey::CName,
            Annotation::TypeName(_) => AnnotationKey::TypeName,
            Annotation::Omp(_) => AnnotationKey::Omp,
            Annotation::Scop(_) => AnnotationKey::Scop,
            Annotation::Intercepted(_) => AnnotationKey::Intercepted,
            Annotation::Hint(_) => AnnotationKey::Hint,
        }
    }
}

/// Per-node annotation storage, ordered by category for deterministic
/// iteration.
pub type AnnotationMap = BTreeMap<AnnotationKey, Annotation>;

// ---- OpenMP payloads -------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReductionOp {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
    LAnd,
    LOr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reduction {
    pub op: ReductionOp,
    pub vars: Vec<NodeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultKind {
    Shared,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleKind {
    Static,
    Dynamic,
    Guided,
    Auto,
    Runtime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub kind: ScheduleKind,
    pub chunk: Option<NodeId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParallelClauses {
    pub if_expr: Option<NodeId>,
    pub num_threads: Option<NodeId>,
    pub default: Option<DefaultKind>,
    pub private: Vec<NodeId>,
    pub firstprivate: Vec<NodeId>,
    pub shared: Vec<NodeId>,
    pub copyin: Vec<NodeId>,
    pub reduction: Option<Reduction>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForClauses {
    pub private: Vec<NodeId>,
    pub firstprivate: Vec<NodeId>,
    pub lastprivate: Vec<NodeId>,
    pub reduction: Option<Reduction>,
    pub schedule: Option<Schedule>,
    pub collapse: Option<NodeId>,
    pub nowait: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionsClauses {
    pub private: Vec<NodeId>,
    pub firstprivate: Vec<NodeId>,
    pub lastprivate: Vec<NodeId>,
    pub reduction: Option<Reduction>,
    pub nowait: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SingleClauses {
    pub private: Vec<NodeId>,
    pub firstprivate: Vec<NodeId>,
    pub copyprivate: Vec<NodeId>,
    pub nowait: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskClauses {
    pub if_expr: Option<NodeId>,
    pub untied: bool,
    pub default: Option<DefaultKind>,
    pub private: Vec<NodeId>,
    pub firstprivate: Vec<NodeId>,
    pub shared: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OmpDirective {
    Parallel(ParallelClauses),
    For(ForClauses),
    ParallelFor(ParallelClauses, ForClauses),
    Sections(SectionsClauses),
    Section,
    Single(SingleClauses),
    Task(TaskClauses),
    Master,
    Critical(Option<String>),
    Barrier,
    Taskwait,
    Atomic,
    Flush(Vec<NodeId>),
    Ordered,
    ThreadPrivate(Vec<NodeId>),
}

// ---- SCoP payloads ---------------------------------------------------

/// Coordinate system of a polyhedral region: `(iterators | parameters | 1)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterationVector {
    pub iterators: Vec<NodeId>,
    pub params: Vec<NodeId>,
}

impl IterationVector {
    /// Total number of coefficient columns, constant included.
    pub fn size(&self) -> usize {
        self.iterators.len() + self.params.len() + 1
    }

    pub fn iterator_index(&self, var: NodeId) -> Option<usize> {
        self.iterators.iter().position(|it| *it == var)
    }

    pub fn param_index(&self, var: NodeId) -> Option<usize> {
        self.params
            .iter()
            .position(|p| *p == var)
            .map(|idx| self.iterators.len() + idx)
    }
}

/// Integer coefficient row over an [`IterationVector`]; the last entry is
/// the constant column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffineFunction {
    pub coeffs: Vec<i64>,
}

impl AffineFunction {
    pub fn zero(size: usize) -> AffineFunction {
        AffineFunction {
            coeffs: vec![0; size],
        }
    }

    pub fn constant(&self) -> i64 {
        *self.coeffs.last().unwrap_or(&0)
    }
}

/// Comparison of an affine function against zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub func: AffineFunction,
    pub op: ConstraintOp,
}

/// Boolean combination of affine constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstraintTree {
    Atom(Constraint),
    Not(Box<ConstraintTree>),
    And(Vec<ConstraintTree>),
    Or(Vec<ConstraintTree>),
}

impl ConstraintTree {
    pub fn negate(self) -> ConstraintTree {
        match self {
            ConstraintTree::Not(inner) => *inner,
            other => ConstraintTree::Not(Box::new(other)),
        }
    }

    pub fn and(constraints: Vec<ConstraintTree>) -> Option<ConstraintTree> {
        match constraints.len() {
            0 => None,
            1 => constraints.into_iter().next(),
            _ => Some(ConstraintTree::And(constraints)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopRegion {
    pub iter_vec: IterationVector,
    pub constraints: Option<ConstraintTree>,
}
