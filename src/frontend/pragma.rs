//! Conversion of pre-matched OpenMP pragmas into IR annotations.
//!
//! The matcher itself is a collaborator; this module reads its match maps
//! (clause name to value list) and builds the typed `OmpDirective` payload
//! attached to the lowered statement. Clause expressions are lowered
//! through the regular expression converter, identifier lists resolve
//! against the variables in scope.

use log::warn;

use crate::ir::annotations::{
    Annotation, AnnotationKey, DefaultKind, ForClauses, OmpDirective, ParallelClauses, Reduction,
    ReductionOp, Schedule, ScheduleKind, SectionsClauses, SingleClauses, TaskClauses,
};
use crate::ir::{NodeId, NodeKind};

use super::ast::{MatchMap, MatchValue, Pragma, Stmt, Storage};
use super::{ConversionContext, ConvResult};

impl ConversionContext<'_> {
    /// Convert and attach the pragmas recorded for `stmt` to `target`.
    /// When the target already carries an OpenMP annotation (it is a
    /// structurally shared statement), a fresh marker is interposed so
    /// this occurrence carries its own payload. Returns the node the
    /// annotation ended up on, or `None` when there was nothing to
    /// attach.
    pub fn attach_pragmas(&mut self, stmt: &Stmt, target: NodeId) -> ConvResult<Option<NodeId>> {
        let Some(pragmas) = self.unit.pragmas.get(&stmt.id).cloned() else {
            return Ok(None);
        };

        let mut directives = vec![];
        for pragma in &pragmas {
            if let Some(directive) = self.convert_pragma(pragma)? {
                directives.push(directive);
            }
        }
        if directives.is_empty() {
            return Ok(None);
        }

        let target = if self.builder.mgr.has_annotation(target, AnnotationKey::Omp) {
            match self.builder.mgr.kind(target).category() {
                crate::ir::NodeCategory::Expression => {
                    self.builder.marker(target).unwrap_or(target)
                }
                _ => self.builder.mgr.get(NodeKind::MarkerStmt {
                    sub: target,
                    id: crate::ir::manager::fresh_id(),
                }),
            }
        } else {
            target
        };

        self.builder.mgr.annotate(target, Annotation::Omp(directives));
        Ok(Some(target))
    }

    fn convert_pragma(&mut self, pragma: &Pragma) -> ConvResult<Option<OmpDirective>> {
        let clauses = &pragma.clauses;
        let directive = match pragma.family.as_str() {
            "parallel" => OmpDirective::Parallel(self.parallel_clauses(clauses)?),
            "parallel for" => OmpDirective::ParallelFor(
                self.parallel_clauses(clauses)?,
                self.for_clauses(clauses)?,
            ),
            "for" => OmpDirective::For(self.for_clauses(clauses)?),
            "sections" => OmpDirective::Sections(self.sections_clauses(clauses)?),
            "section" => OmpDirective::Section,
            "single" => OmpDirective::Single(SingleClauses {
                private: self.clause_vars(clauses, "private")?,
                firstprivate: self.clause_vars(clauses, "firstprivate")?,
                copyprivate: self.clause_vars(clauses, "copyprivate")?,
                nowait: clauses.contains_key("nowait"),
            }),
            "task" => OmpDirective::Task(TaskClauses {
                if_expr: self.clause_expr(clauses, "if")?,
                untied: clauses.contains_key("untied"),
                default: default_kind(clauses),
                private: self.clause_vars(clauses, "private")?,
                firstprivate: self.clause_vars(clauses, "firstprivate")?,
                shared: self.clause_vars(clauses, "shared")?,
            }),
            "master" => OmpDirective::Master,
            "critical" => OmpDirective::Critical(clause_string(clauses, "name")),
            "barrier" => OmpDirective::Barrier,
            "taskwait" => OmpDirective::Taskwait,
            "atomic" => OmpDirective::Atomic,
            "flush" => OmpDirective::Flush(self.clause_vars(clauses, "list")?),
            "ordered" => OmpDirective::Ordered,
            "threadprivate" => {
                OmpDirective::ThreadPrivate(self.clause_vars(clauses, "list")?)
            }
            family => {
                warn!("{}: ignoring unknown pragma family '{family}'", pragma.span);
                return Ok(None);
            }
        };
        Ok(Some(directive))
    }

    fn parallel_clauses(&mut self, clauses: &MatchMap) -> ConvResult<ParallelClauses> {
        Ok(ParallelClauses {
            if_expr: self.clause_expr(clauses, "if")?,
            num_threads: self.clause_expr(clauses, "num_threads")?,
            default: default_kind(clauses),
            private: self.clause_vars(clauses, "private")?,
            firstprivate: self.clause_vars(clauses, "firstprivate")?,
            shared: self.clause_vars(clauses, "shared")?,
            copyin: self.clause_vars(clauses, "copyin")?,
            reduction: self.reduction(clauses)?,
        })
    }

    fn for_clauses(&mut self, clauses: &MatchMap) -> ConvResult<ForClauses> {
        Ok(ForClauses {
            private: self.clause_vars(clauses, "private")?,
            firstprivate: self.clause_vars(clauses, "firstprivate")?,
            lastprivate: self.clause_vars(clauses, "lastprivate")?,
            reduction: self.reduction(clauses)?,
            schedule: self.schedule(clauses)?,
            collapse: self.clause_expr(clauses, "collapse")?,
            nowait: clauses.contains_key("nowait"),
        })
    }

    fn sections_clauses(&mut self, clauses: &MatchMap) -> ConvResult<SectionsClauses> {
        Ok(SectionsClauses {
            private: self.clause_vars(clauses, "private")?,
            firstprivate: self.clause_vars(clauses, "firstprivate")?,
            lastprivate: self.clause_vars(clauses, "lastprivate")?,
            reduction: self.reduction(clauses)?,
            nowait: clauses.contains_key("nowait"),
        })
    }

    /// Resolve an identifier-list clause against the variables in scope.
    fn clause_vars(&mut self, clauses: &MatchMap, name: &str) -> ConvResult<Vec<NodeId>> {
        let Some(values) = clauses.get(name) else {
            return Ok(vec![]);
        };
        let mut vars = vec![];
        for value in values.clone() {
            match value {
                MatchValue::Ident(ident) => match self.resolve_name(&ident) {
                    Some(var) => vars.push(var),
                    None => warn!("pragma clause '{name}' names unknown variable '{ident}'"),
                },
                other => warn!("pragma clause '{name}' expects identifiers, got {other:?}"),
            }
        }
        Ok(vars)
    }

    fn clause_expr(&mut self, clauses: &MatchMap, name: &str) -> ConvResult<Option<NodeId>> {
        let Some(values) = clauses.get(name) else {
            return Ok(None);
        };
        match values.first().cloned() {
            Some(MatchValue::Expr(expr)) => Ok(Some(self.convert_expr(&expr)?)),
            Some(other) => {
                warn!("pragma clause '{name}' expects an expression, got {other:?}");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn reduction(&mut self, clauses: &MatchMap) -> ConvResult<Option<Reduction>> {
        let Some(values) = clauses.get("reduction") else {
            return Ok(None);
        };
        let mut op = None;
        let mut vars = vec![];
        for value in values.clone() {
            match value {
                MatchValue::Str(symbol) => match reduction_op(&symbol) {
                    Some(parsed) => op = Some(parsed),
                    None => warn!("unknown reduction operator '{symbol}'"),
                },
                MatchValue::Ident(ident) => match self.resolve_name(&ident) {
                    Some(var) => vars.push(var),
                    None => warn!("reduction names unknown variable '{ident}'"),
                },
                other => warn!("unexpected reduction clause value {other:?}"),
            }
        }
        Ok(op.map(|op| Reduction { op, vars }))
    }

    fn schedule(&mut self, clauses: &MatchMap) -> ConvResult<Option<Schedule>> {
        let Some(values) = clauses.get("schedule") else {
            return Ok(None);
        };
        let mut kind = None;
        let mut chunk = None;
        for value in values.clone() {
            match value {
                MatchValue::Str(symbol) => kind = schedule_kind(&symbol),
                MatchValue::Expr(expr) => chunk = Some(self.convert_expr(&expr)?),
                other => warn!("unexpected schedule clause value {other:?}"),
            }
        }
        Ok(kind.map(|kind| Schedule { kind, chunk }))
    }

    /// A clause identifier resolves like a variable use at the pragma's
    /// position: loop iterators and wrapped parameters first, then the
    /// lowered declaration, then globals.
    fn resolve_name(&mut self, name: &str) -> Option<NodeId> {
        let var = self
            .unit
            .vars
            .iter()
            .position(|decl| decl.name == name)
            .map(|index| super::ast::VarId(index as u32))?;
        if let Some(iterator) = self.loop_iter_map.get(&var) {
            return Some(*iterator);
        }
        if let Some(wrapped) = self.wrap_ref_map.get(&var) {
            return Some(*wrapped);
        }
        if self.unit.var(var).storage == Storage::Global {
            return self
                .global_lvalue(var, &crate::span::Span::default())
                .ok();
        }
        self.var_map.get(&var).copied()
    }
}

fn clause_string(clauses: &MatchMap, name: &str) -> Option<String> {
    match clauses.get(name)?.first()? {
        MatchValue::Str(value) | MatchValue::Ident(value) => Some(value.clone()),
        _ => None,
    }
}

fn default_kind(clauses: &MatchMap) -> Option<DefaultKind> {
    match clause_string(clauses, "default")?.as_str() {
        "shared" => Some(DefaultKind::Shared),
        "none" => Some(DefaultKind::None),
        other => {
            warn!("unknown default kind '{other}'");
            None
        }
    }
}

fn reduction_op(symbol: &str) -> Option<ReductionOp> {
    Some(match symbol {
        "+" => ReductionOp::Add,
        "-" => ReductionOp::Sub,
        "*" => ReductionOp::Mul,
        "&" => ReductionOp::BitAnd,
        "|" => ReductionOp::BitOr,
        "^" => ReductionOp::BitXor,
        "&&" => ReductionOp::LAnd,
        "||" => ReductionOp::LOr,
        _ => return None,
    })
}

fn schedule_kind(symbol: &str) -> Option<ScheduleKind> {
    Some(match symbol {
        "static" => ScheduleKind::Static,
        "dynamic" => ScheduleKind::Dynamic,
        "guided" => ScheduleKind::Guided,
        "auto" => ScheduleKind::Auto,
        "runtime" => ScheduleKind::Runtime,
        _ => {
            warn!("unknown schedule kind '{symbol}'");
            return None;
        }
    })
}
