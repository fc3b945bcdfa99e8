//! # The front end
//!
//! Lowers a source [`TranslationUnit`](ast::TranslationUnit) into an IR
//! [`Program`](crate::ir::NodeKind::Program). The work is split across
//! three mutually recursive converters sharing one [`ConversionContext`]:
//!
//! - types ([`types`]): source types to IR types, including recursive
//!   record resolution,
//! - expressions ([`expr`]): operators, accesses, calls, allocation,
//! - statements ([`stmt`]): control flow, including for-loop
//!   normalization.
//!
//! Function lowering with mutual-recursion resolution lives in
//! [`functions`], the globals aggregate in [`globals`], and the OpenMP
//! pragma conversion in [`pragma`].

pub mod ast;
pub mod expr;
pub mod functions;
pub mod globals;
pub mod pragma;
pub mod stmt;
pub mod types;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;

use log::info;
use regex::Regex;

use crate::ir::{Builder, IrError, NodeId};
use crate::span::Span;

use self::ast::{FuncId, RecordId, TranslationUnit, VarId};
use self::globals::GlobalsInfo;

#[derive(Clone, Debug)]
pub enum ConversionError {
    UnsupportedType(UnsupportedType, Span),
    UndefinedName(UndefinedName, Span),
    Ir(IrError, Span),
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionError::UnsupportedType(e, span) => write!(f, "{span}: {e}"),
            ConversionError::UndefinedName(e, span) => write!(f, "{span}: {e}"),
            ConversionError::Ir(e, span) => write!(f, "{span}: {e}"),
        }
    }
}

impl Error for ConversionError {}

impl ConversionError {
    pub fn span(&self) -> &Span {
        match self {
            ConversionError::UnsupportedType(_, span)
            | ConversionError::UndefinedName(_, span)
            | ConversionError::Ir(_, span) => span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnsupportedType {
    pub description: String,
}

impl Display for UnsupportedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported type '{}'", self.description)
    }
}

impl Error for UnsupportedType {}

#[derive(Clone, Debug)]
pub struct UndefinedName {
    pub name: String,
}

impl Display for UndefinedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reference to undefined name '{}'", self.name)
    }
}

impl Error for UndefinedName {}

pub type ConvResult<T> = Result<T, ConversionError>;

pub(crate) fn ir_err(span: &Span) -> impl FnOnce(IrError) -> ConversionError + '_ {
    move |err| ConversionError::Ir(err, span.clone())
}

/// Driver-provided front end configuration (see the CLI surface).
#[derive(Debug, Default)]
pub struct ConversionSetup {
    pub include_paths: Vec<std::path::PathBuf>,
    pub definitions: Vec<String>,
    /// Names matching any of these patterns are represented as opaque
    /// externals; their definitions are not lowered.
    pub intercept_patterns: Vec<Regex>,
    pub kidnapped_headers: Vec<std::path::PathBuf>,
}

impl ConversionSetup {
    pub fn intercepts(&self, name: &str) -> Option<&Regex> {
        self.intercept_patterns
            .iter()
            .find(|pattern| pattern.is_match(name))
    }
}

/// Mutable state threaded through the converter cluster for one
/// translation unit.
pub struct ConversionContext<'tu> {
    pub unit: &'tu TranslationUnit,
    pub setup: &'tu ConversionSetup,
    pub builder: Builder,

    /// var-decl to IR variable
    pub(crate) var_map: HashMap<VarId, NodeId>,
    /// func-decl to lowered lambda
    pub(crate) fn_map: HashMap<FuncId, NodeId>,
    /// func-decl to the placeholder variable of its recursion group
    pub(crate) rec_fn_map: HashMap<FuncId, NodeId>,
    /// record-decl to IR type
    pub(crate) record_map: HashMap<RecordId, NodeId>,
    /// record-decl to the type variable of its recursion group
    pub(crate) rec_type_map: HashMap<RecordId, NodeId>,
    /// parameter to the wrapping ref introduced for assigned parameters
    pub(crate) wrap_ref_map: HashMap<VarId, NodeId>,
    /// loop induction variables, lowered as plain (non-ref) variables
    pub(crate) loop_iter_map: HashMap<VarId, NodeId>,
    /// the globals aggregate of the unit, if any
    pub(crate) globals: Option<GlobalsInfo>,
    /// the current function's handle on the globals aggregate
    pub(crate) current_globals_var: Option<NodeId>,
    /// the current function's return type
    pub(crate) current_ret_ty: Option<NodeId>,
    /// reentrancy guards for the recursion resolvers
    pub(crate) is_resolving_rec_types: bool,
    pub(crate) is_resolving_rec_fns: bool,
}

impl<'tu> ConversionContext<'tu> {
    pub fn new(unit: &'tu TranslationUnit, setup: &'tu ConversionSetup) -> ConversionContext<'tu> {
        ConversionContext {
            unit,
            setup,
            builder: Builder::new(),
            var_map: HashMap::new(),
            fn_map: HashMap::new(),
            rec_fn_map: HashMap::new(),
            record_map: HashMap::new(),
            rec_type_map: HashMap::new(),
            wrap_ref_map: HashMap::new(),
            loop_iter_map: HashMap::new(),
            globals: None,
            current_globals_var: None,
            current_ret_ty: None,
            is_resolving_rec_types: false,
            is_resolving_rec_fns: false,
        }
    }
}

/// Result of converting one translation unit: the builder (owning the node
/// manager and all nodes) plus the program root.
pub struct ConvertedUnit {
    pub builder: Builder,
    pub program: NodeId,
}

/// Convert a whole translation unit into an IR program.
pub fn convert(unit: &TranslationUnit, setup: &ConversionSetup) -> ConvResult<ConvertedUnit> {
    info!("converting translation unit '{}'", unit.name);

    let mut ctx = ConversionContext::new(unit, setup);
    ctx.collect_globals()?;

    let mut entry_points = vec![];
    let mut is_main = false;

    if let Some(main) = unit.entry_point {
        let entry = ctx.convert_function(main)?;
        let wrapped = ctx.wrap_entry_point(main, entry)?;
        entry_points.push(wrapped);
        is_main = true;
    } else {
        for (index, function) in unit.functions.iter().enumerate() {
            if function.body.is_some() {
                entry_points.push(ctx.convert_function(ast::FuncId(index as u32))?);
            }
        }
    }

    let program = ctx
        .builder
        .program(entry_points, is_main)
        .map_err(ir_err(&Span::default()))?;

    info!(
        "conversion of '{}' produced {} nodes",
        unit.name,
        ctx.builder.mgr.node_count()
    );

    Ok(ConvertedUnit {
        builder: ctx.builder,
        program,
    })
}
