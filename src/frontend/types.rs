//! Lowering of source types into IR types, including the resolution of
//! (mutually) recursive record types.

use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::ir::annotations::Annotation;
use crate::ir::{lang, NodeId, NodeKind};
use crate::span::Span;

use super::ast::{RecordId, RecordKind, SrcType};
use super::{ConversionContext, ConversionError, ConvResult, UnsupportedType};

impl ConversionContext<'_> {
    /// Lower a source type. Typedefs are transparent; the alias name is
    /// kept as an annotation on the lowered type.
    pub fn convert_type(&mut self, ty: &SrcType, span: &Span) -> ConvResult<NodeId> {
        let (canonical, alias) = self.unit.desugar(ty);
        let lowered = self.convert_canonical(&canonical, span)?;
        if let Some(name) = alias {
            self.builder.mgr.annotate(lowered, Annotation::TypeName(name));
        }
        Ok(lowered)
    }

    fn unsupported(&self, description: impl ToString, span: &Span) -> ConversionError {
        ConversionError::UnsupportedType(
            UnsupportedType {
                description: description.to_string(),
            },
            span.clone(),
        )
    }

    fn convert_canonical(&mut self, ty: &SrcType, span: &Span) -> ConvResult<NodeId> {
        let basic = &self.builder.basic;
        match ty {
            SrcType::Void => Ok(basic.unit),
            SrcType::Bool => Ok(basic.boolean),
            SrcType::Char => Ok(basic.character),
            SrcType::Int { bytes, signed } => {
                let lowered = if *signed {
                    basic.int_type(*bytes)
                } else {
                    basic.uint_type(*bytes)
                };
                lowered.ok_or_else(|| self.unsupported(format!("int<{bytes}>"), span))
            }
            SrcType::Real { bytes } => basic
                .real_type(*bytes)
                .ok_or_else(|| self.unsupported(format!("real<{bytes}>"), span)),
            SrcType::Pointer(element) => {
                let (canonical, _) = self.unit.desugar(element);
                // void* becomes the dedicated any-ref type
                if canonical == SrcType::Void {
                    return Ok(self.builder.basic.any_ref);
                }
                // pointer-to-function is the plain function type itself
                if matches!(canonical, SrcType::Function { .. }) {
                    return self.convert_canonical(&canonical, span);
                }
                let element = self.convert_canonical(&canonical, span)?;
                let array = lang::array_type(&mut self.builder.mgr, element);
                Ok(lang::ref_type(&mut self.builder.mgr, array))
            }
            SrcType::ConstArray { element, size } => {
                let element = self.convert_type(element, span)?;
                let size = self
                    .builder
                    .mgr
                    .get(NodeKind::ConcreteIntParam { value: *size });
                Ok(lang::vector_type(&mut self.builder.mgr, element, size))
            }
            SrcType::IncompleteArray(element) => {
                let element = self.convert_type(element, span)?;
                let array = lang::array_type(&mut self.builder.mgr, element);
                Ok(lang::ref_type(&mut self.builder.mgr, array))
            }
            SrcType::VariableArray(element) => {
                // the size expression stays at the declaration site
                let element = self.convert_type(element, span)?;
                Ok(lang::array_type(&mut self.builder.mgr, element))
            }
            SrcType::Function {
                params,
                ret,
                variadic,
            } => {
                let mut lowered_params = vec![];
                for param in params {
                    lowered_params.push(self.convert_parameter_type(param, span)?);
                }
                if *variadic {
                    lowered_params.push(self.builder.basic.var_list);
                }
                let ret = self.convert_type(ret, span)?;
                Ok(lang::function_type(
                    &mut self.builder.mgr,
                    lowered_params,
                    ret,
                ))
            }
            SrcType::Record(id) => self.convert_record_type(*id),
            SrcType::Alias(_) => unreachable!("desugared before lowering"),
            SrcType::Unsupported(description) => Err(self.unsupported(description, span)),
        }
    }

    /// A C array argument is passed by address: parameters of vector or
    /// array type are wrapped into refs.
    pub fn convert_parameter_type(&mut self, ty: &SrcType, span: &Span) -> ConvResult<NodeId> {
        let lowered = self.convert_type(ty, span)?;
        match self.builder.mgr.kind(lowered) {
            NodeKind::VectorType { .. } | NodeKind::ArrayType { .. } => {
                Ok(lang::ref_type(&mut self.builder.mgr, lowered))
            }
            _ => Ok(lowered),
        }
    }

    // ---- recursive record resolution ---------------------------------

    /// Lower a record type, resolving record cycles through a shared
    /// `RecTypeDefinition`.
    pub fn convert_record_type(&mut self, id: RecordId) -> ConvResult<NodeId> {
        if let Some(cached) = self.record_map.get(&id) {
            return Ok(*cached);
        }
        // while resolving a cycle, member references yield the placeholder
        // type variable instead of descending again
        if self.is_resolving_rec_types {
            if let Some(placeholder) = self.rec_type_map.get(&id) {
                return Ok(*placeholder);
            }
        }

        let component = self.record_component(id);

        if component.len() == 1 && !self.has_self_edge(id) {
            let body = self.convert_record_body(id)?;
            self.record_map.insert(id, body);
            return Ok(body);
        }

        debug!(
            "resolving recursive record component of size {} around '{}'",
            component.len(),
            self.unit.record(id).name
        );

        // placeholder variables for every member of the cycle
        for member in &component {
            let name = self.unit.record(*member).name.clone();
            let placeholder = lang::type_var(&mut self.builder.mgr, &name);
            self.rec_type_map.insert(*member, placeholder);
        }

        let was_resolving = self.is_resolving_rec_types;
        self.is_resolving_rec_types = true;
        let mut bindings = vec![];
        for member in &component {
            let body = self.convert_record_body(*member)?;
            bindings.push((self.rec_type_map[member], body));
        }
        self.is_resolving_rec_types = was_resolving;

        let definition = self
            .builder
            .mgr
            .get(NodeKind::RecTypeDefinition { bindings });

        // every member shares the one definition
        for member in &component {
            let rec = self.builder.mgr.get(NodeKind::RecType {
                var: self.rec_type_map[member],
                definition,
            });
            let name = self.unit.record(*member).name.clone();
            self.builder.mgr.annotate(rec, Annotation::CName(name));
            self.record_map.insert(*member, rec);
        }

        Ok(self.record_map[&id])
    }

    fn convert_record_body(&mut self, id: RecordId) -> ConvResult<NodeId> {
        let record = self.unit.record(id).clone();
        let mut entries = vec![];
        for (name, field_ty) in &record.fields {
            let lowered = self.convert_type(field_ty, &record.span)?;
            entries.push((name.clone(), lowered));
        }
        let body = match record.kind {
            RecordKind::Struct => self.builder.mgr.get(NodeKind::StructType { entries }),
            RecordKind::Union => self.builder.mgr.get(NodeKind::UnionType { entries }),
        };
        self.builder
            .mgr
            .annotate(body, Annotation::CName(record.name));
        Ok(body)
    }

    /// The strongly connected component of the record dependency graph
    /// containing `start`, in deterministic (id) order.
    fn record_component(&self, start: RecordId) -> Vec<RecordId> {
        let mut graph: DiGraph<RecordId, ()> = DiGraph::new();
        let mut indices: HashMap<RecordId, NodeIndex> = HashMap::new();

        // build the subgraph reachable from `start`
        let mut worklist = vec![start];
        while let Some(record) = worklist.pop() {
            if indices.contains_key(&record) {
                continue;
            }
            let index = graph.add_node(record);
            indices.insert(record, index);
            for target in self.record_references(record) {
                worklist.push(target);
            }
        }
        let records: Vec<RecordId> = indices.keys().copied().collect();
        for record in records {
            for target in self.record_references(record) {
                graph.add_edge(indices[&record], indices[&target], ());
            }
        }

        let mut component: Vec<RecordId> = tarjan_scc(&graph)
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .map(|index| graph[index])
                    .collect::<Vec<_>>()
            })
            .find(|members| members.contains(&start))
            .unwrap_or_else(|| vec![start]);
        component.sort();
        component
    }

    fn has_self_edge(&self, id: RecordId) -> bool {
        self.record_references(id).contains(&id)
    }

    /// All records referenced from the fields of `id`.
    fn record_references(&self, id: RecordId) -> Vec<RecordId> {
        let mut references = vec![];
        for (_, field_ty) in &self.unit.record(id).fields {
            collect_record_references(self.unit, field_ty, &mut references);
        }
        references
    }
}

fn collect_record_references(
    unit: &super::ast::TranslationUnit,
    ty: &SrcType,
    out: &mut Vec<RecordId>,
) {
    match ty {
        SrcType::Record(id) => out.push(*id),
        SrcType::Pointer(inner)
        | SrcType::IncompleteArray(inner)
        | SrcType::VariableArray(inner) => collect_record_references(unit, inner, out),
        SrcType::ConstArray { element, .. } => collect_record_references(unit, element, out),
        SrcType::Function { params, ret, .. } => {
            for param in params {
                collect_record_references(unit, param, out);
            }
            collect_record_references(unit, ret, out);
        }
        SrcType::Alias(id) => {
            collect_record_references(unit, &unit.typedef(*id).underlying, out)
        }
        _ => {}
    }
}
