//! Lowering of IR types into target type descriptors.
//!
//! Every resolved IR type yields a [`TypeInfo`]: the target fragments for
//! l-values, r-values and the external ABI form, the rewriters moving
//! values across the external boundary, and the declaration/definition
//! code fragments with their dependencies. A registry of user handlers is
//! consulted before the default dispatch so domain-specific types can map
//! onto opaque named target types.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;

use log::debug;
use once_cell::sync::Lazy;

use crate::ir::annotations::AnnotationKey;
use crate::ir::lang::{
    FAMILY_ANY_REF, FAMILY_BOOL, FAMILY_CHAR, FAMILY_INT, FAMILY_REAL, FAMILY_STRING,
    FAMILY_UINT, FAMILY_UNIT,
};
use crate::ir::manager::NodeManager;
use crate::ir::printer;
use crate::ir::{NodeId, NodeKind};
use crate::types::substitution::unroll_rec_type;

use super::fragments::{FragmentId, FragmentManager};

#[derive(Clone, Debug)]
pub enum BackendError {
    UnsupportedType(UnsupportedTargetType),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::UnsupportedType(e) => e.fmt(f),
        }
    }
}

impl Error for BackendError {}

#[derive(Clone, Debug)]
pub struct UnsupportedTargetType {
    pub description: String,
}

impl Display for UnsupportedTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type '{}' cannot be represented in the target language",
            self.description
        )
    }
}

impl Error for UnsupportedTargetType {}

/// Rewriting of an expression at the external boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ExprRewrite {
    #[default]
    Identity,
    /// Wrap the expression into `prefix expr suffix`.
    Wrap {
        prefix: String,
        suffix: String,
    },
}

impl ExprRewrite {
    pub fn call(function: impl Display) -> ExprRewrite {
        ExprRewrite::Wrap {
            prefix: format!("{function}("),
            suffix: ")".into(),
        }
    }

    pub fn apply(&self, expr: &str) -> String {
        match self {
            ExprRewrite::Identity => expr.to_string(),
            ExprRewrite::Wrap { prefix, suffix } => format!("{prefix}{expr}{suffix}"),
        }
    }
}

/// The target type descriptor of one IR type.
#[derive(Clone, Debug, Default)]
pub struct TypeInfo {
    pub l_value: String,
    pub r_value: String,
    pub external: String,
    pub externalize: ExprRewrite,
    pub internalize: ExprRewrite,
    pub declaration: Option<FragmentId>,
    pub definition: Option<FragmentId>,
}

impl TypeInfo {
    fn simple(name: impl ToString) -> TypeInfo {
        let name = name.to_string();
        TypeInfo {
            l_value: name.clone(),
            r_value: name.clone(),
            external: name,
            ..Default::default()
        }
    }
}

/// User-supplied rewriter consulted before the default dispatch.
pub trait TypeHandler {
    fn resolve(
        &self,
        mgr: &NodeManager,
        fragments: &mut FragmentManager,
        ty: NodeId,
    ) -> Option<TypeInfo>;
}

/// The scalar include table: family/width to target type and header.
static INCLUDE_TABLE: Lazy<HashMap<(&'static str, u64), (&'static str, Option<&'static str>)>> =
    Lazy::new(|| {
        HashMap::from([
            ((FAMILY_INT, 1), ("int8_t", Some("stdint.h"))),
            ((FAMILY_INT, 2), ("int16_t", Some("stdint.h"))),
            ((FAMILY_INT, 4), ("int32_t", Some("stdint.h"))),
            ((FAMILY_INT, 8), ("int64_t", Some("stdint.h"))),
            ((FAMILY_UINT, 1), ("uint8_t", Some("stdint.h"))),
            ((FAMILY_UINT, 2), ("uint16_t", Some("stdint.h"))),
            ((FAMILY_UINT, 4), ("uint32_t", Some("stdint.h"))),
            ((FAMILY_UINT, 8), ("uint64_t", Some("stdint.h"))),
            ((FAMILY_REAL, 4), ("float", None)),
            ((FAMILY_REAL, 8), ("double", None)),
        ])
    });

pub struct TypeManager {
    pub fragments: FragmentManager,
    cache: HashMap<NodeId, TypeInfo>,
    handlers: Vec<Box<dyn TypeHandler>>,
    fresh_names: u32,
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeManager {
    pub fn new() -> TypeManager {
        TypeManager {
            fragments: FragmentManager::new(),
            cache: HashMap::new(),
            handlers: vec![],
            fresh_names: 0,
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn TypeHandler>) {
        self.handlers.push(handler);
    }

    /// Resolve an IR type into its target descriptor. Results are cached
    /// per type node.
    pub fn resolve(&mut self, mgr: &mut NodeManager, ty: NodeId) -> Result<TypeInfo, BackendError> {
        if let Some(cached) = self.cache.get(&ty) {
            return Ok(cached.clone());
        }
        for handler in &self.handlers {
            if let Some(info) = handler.resolve(mgr, &mut self.fragments, ty) {
                self.cache.insert(ty, info.clone());
                return Ok(info);
            }
        }

        let info = self.resolve_internal(mgr, ty)?;
        self.cache.insert(ty, info.clone());
        Ok(info)
    }

    fn unsupported(&self, mgr: &NodeManager, ty: NodeId) -> BackendError {
        BackendError::UnsupportedType(UnsupportedTargetType {
            description: printer::print(mgr, ty),
        })
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.fresh_names += 1;
        format!("{prefix}_{}", self.fresh_names)
    }

    /// The name a composite is emitted under: its original C name when
    /// known, a generated one otherwise.
    fn composite_name(&mut self, mgr: &NodeManager, ty: NodeId, prefix: &str) -> String {
        match mgr.annotation(ty, AnnotationKey::CName) {
            Some(crate::ir::annotations::Annotation::CName(name)) => name.clone(),
            _ => self.fresh_name(prefix),
        }
    }

    fn resolve_internal(
        &mut self,
        mgr: &mut NodeManager,
        ty: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        match mgr.kind(ty).clone() {
            NodeKind::GenericType {
                family, int_params, ..
            } => self.resolve_generic(mgr, ty, &family, &int_params),
            NodeKind::TupleType { elements } => {
                // tuples are structs with positional member names
                let entries: Vec<(String, NodeId)> = elements
                    .iter()
                    .enumerate()
                    .map(|(index, element)| (format!("c{index}"), *element))
                    .collect();
                let name = self.fresh_name("tuple");
                self.resolve_composite(mgr, &name, "struct", &entries)
            }
            NodeKind::StructType { entries } => {
                let name = self.composite_name(mgr, ty, "struct");
                self.resolve_composite(mgr, &name, "struct", &entries)
            }
            NodeKind::UnionType { entries } => {
                let name = self.composite_name(mgr, ty, "union");
                self.resolve_composite(mgr, &name, "union", &entries)
            }
            NodeKind::ArrayType { element, dim } => {
                let NodeKind::ConcreteIntParam { value: dims } = mgr.kind(dim).clone() else {
                    return Err(self.unsupported(mgr, ty));
                };
                let element_info = self.resolve(mgr, element)?;
                let stars: String = "*".repeat(dims as usize);
                let name = format!("{}{stars}", element_info.l_value);
                Ok(TypeInfo {
                    l_value: name.clone(),
                    r_value: name.clone(),
                    external: name,
                    declaration: element_info.declaration,
                    definition: element_info.definition,
                    ..Default::default()
                })
            }
            NodeKind::VectorType { element, size } => self.resolve_vector(mgr, element, size),
            NodeKind::RefType { element } => self.resolve_ref(mgr, element),
            NodeKind::FunctionType { params, ret, plain } => {
                if plain {
                    self.resolve_function_pointer(mgr, &params, ret)
                } else {
                    self.resolve_closure(mgr, &params, ret)
                }
            }
            NodeKind::RecType { .. } => self.resolve_recursive(mgr, ty),
            NodeKind::TypeVariable { .. } => {
                // unbound variables have no target representation
                Err(self.unsupported(mgr, ty))
            }
            _ => Err(self.unsupported(mgr, ty)),
        }
    }

    fn resolve_generic(
        &mut self,
        mgr: &NodeManager,
        ty: NodeId,
        family: &str,
        int_params: &[NodeId],
    ) -> Result<TypeInfo, BackendError> {
        match family {
            FAMILY_UNIT => return Ok(TypeInfo::simple("void")),
            FAMILY_BOOL => {
                let mut info = TypeInfo::simple("bool");
                let fragment = self.fragments.create("bool_include", "");
                self.fragments.add_include(fragment, "stdbool.h");
                info.declaration = Some(fragment);
                return Ok(info);
            }
            FAMILY_CHAR => return Ok(TypeInfo::simple("char")),
            FAMILY_STRING => return Ok(TypeInfo::simple("char*")),
            FAMILY_ANY_REF => return Ok(TypeInfo::simple("void*")),
            _ => {}
        }

        let width = int_params.first().and_then(|param| match mgr.kind(*param) {
            NodeKind::ConcreteIntParam { value } => Some(*value),
            _ => None,
        });
        let family_key = [FAMILY_INT, FAMILY_UINT, FAMILY_REAL]
            .into_iter()
            .find(|known| *known == family);
        if let (Some(family), Some(width)) = (family_key, width) {
            if let Some((target, header)) = INCLUDE_TABLE.get(&(family, width)) {
                let mut info = TypeInfo::simple(target);
                if let Some(header) = header {
                    let fragment = self
                        .fragments
                        .create(format!("{target}_include"), "");
                    self.fragments.add_include(fragment, *header);
                    info.declaration = Some(fragment);
                }
                return Ok(info);
            }
        }
        Err(self.unsupported(mgr, ty))
    }

    fn resolve_composite(
        &mut self,
        mgr: &mut NodeManager,
        name: &str,
        tag: &str,
        entries: &[(String, NodeId)],
    ) -> Result<TypeInfo, BackendError> {
        let declaration = self
            .fragments
            .create(format!("{name}_decl"), format!("declaration of {tag} {name}"));
        self.fragments.set_body(declaration, format!("{tag} {name};"));

        let definition = self
            .fragments
            .create(format!("{name}_def"), format!("definition of {tag} {name}"));
        self.fragments.add_dependency(definition, declaration);

        let mut body = format!("{tag} {name} {{\n");
        for (field, field_ty) in entries {
            let field_info = self.resolve(mgr, *field_ty)?;
            body.push_str(&format!("    {} {field};\n", field_info.l_value));
            // the definition requires every field's definition
            if let Some(dep) = field_info.definition.or(field_info.declaration) {
                self.fragments.add_dependency(definition, dep);
            }
        }
        body.push_str("};");
        self.fragments.set_body(definition, body);

        let target = format!("{tag} {name}");
        Ok(TypeInfo {
            l_value: target.clone(),
            r_value: target.clone(),
            external: target,
            declaration: Some(declaration),
            definition: Some(definition),
            ..Default::default()
        })
    }

    /// Vectors wrap their element array into a struct to enforce value
    /// semantics; an init-uniform constructor broadcasting a scalar is
    /// emitted alongside.
    fn resolve_vector(
        &mut self,
        mgr: &mut NodeManager,
        element: NodeId,
        size: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        let NodeKind::ConcreteIntParam { value: length } = mgr.kind(size).clone() else {
            return Err(self.unsupported(mgr, size));
        };
        let element_info = self.resolve(mgr, element)?;
        let name = format!("vec_{}_{length}", mangle(&element_info.l_value));

        let definition = self
            .fragments
            .create(format!("{name}_def"), format!("definition of vector {name}"));
        self.fragments.set_body(
            definition,
            format!(
                "typedef struct {{\n    {} data[{length}];\n}} {name};",
                element_info.l_value
            ),
        );
        if let Some(dep) = element_info.definition.or(element_info.declaration) {
            self.fragments.add_dependency(definition, dep);
        }

        let init = self.fragments.create(
            format!("{name}_init_uniform"),
            format!("uniform initializer of {name}"),
        );
        self.fragments.set_body(
            init,
            format!(
                "static inline {name} {name}_init_uniform({} value) {{\n    {name} result;\n    for (int i = 0; i < {length}; ++i) result.data[i] = value;\n    return result;\n}}",
                element_info.l_value
            ),
        );
        self.fragments.add_dependency(init, definition);

        Ok(TypeInfo {
            l_value: name.clone(),
            r_value: name.clone(),
            external: format!("{}*", element_info.l_value),
            externalize: ExprRewrite::Wrap {
                prefix: "(".into(),
                suffix: ").data".into(),
            },
            internalize: ExprRewrite::call(format!("{name}_init")),
            declaration: Some(definition),
            definition: Some(init),
        })
    }

    /// `ref<T>` is a `T*` r-value; for ref-of-array and ref-of-vector the
    /// extra indirection collapses, since a C array value already is a
    /// pointer.
    fn resolve_ref(
        &mut self,
        mgr: &mut NodeManager,
        element: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        match mgr.kind(element).clone() {
            NodeKind::ArrayType { .. } => {
                let info = self.resolve(mgr, element)?;
                Ok(TypeInfo {
                    l_value: info.l_value.clone(),
                    r_value: info.r_value.clone(),
                    external: info.external.clone(),
                    declaration: info.declaration,
                    definition: info.definition,
                    ..Default::default()
                })
            }
            NodeKind::VectorType { element: inner, .. } => {
                // a reference to a vector decays to the element pointer
                let inner_info = self.resolve(mgr, inner)?;
                let vector_info = self.resolve(mgr, element)?;
                Ok(TypeInfo {
                    l_value: format!("{}*", inner_info.l_value),
                    r_value: format!("{}*", inner_info.l_value),
                    external: format!("{}*", inner_info.l_value),
                    declaration: vector_info.declaration,
                    definition: vector_info.definition,
                    ..Default::default()
                })
            }
            _ => {
                let info = self.resolve(mgr, element)?;
                let name = mangle(&info.l_value);

                // the new-operator: allocate one element and initialize it
                let new_op = self.fragments.create(
                    format!("{name}_new"),
                    format!("new operator of {}", info.l_value),
                );
                self.fragments.set_body(
                    new_op,
                    format!(
                        "static inline {lv}* {name}_new({lv} value) {{\n    {lv}* ptr = ({lv}*)malloc(sizeof({lv}));\n    *ptr = value;\n    return ptr;\n}}",
                        lv = info.l_value
                    ),
                );
                self.fragments.add_include(new_op, "stdlib.h");
                if let Some(dep) = info.definition.or(info.declaration) {
                    self.fragments.add_dependency(new_op, dep);
                }

                Ok(TypeInfo {
                    l_value: info.l_value.clone(),
                    r_value: format!("{}*", info.l_value),
                    external: format!("{}*", info.l_value),
                    externalize: ExprRewrite::Wrap {
                        prefix: "&(".into(),
                        suffix: ")".into(),
                    },
                    internalize: ExprRewrite::Wrap {
                        prefix: "*(".into(),
                        suffix: ")".into(),
                    },
                    declaration: info.declaration,
                    definition: Some(new_op),
                })
            }
        }
    }

    fn resolve_function_pointer(
        &mut self,
        mgr: &mut NodeManager,
        params: &[NodeId],
        ret: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        let ret_info = self.resolve(mgr, ret)?;
        let mut param_names = vec![];
        let mut deps = vec![];
        for param in params {
            let info = self.resolve(mgr, *param)?;
            deps.extend(info.definition.or(info.declaration));
            param_names.push(info.r_value);
        }

        let name = self.fresh_name("fn");
        let definition = self
            .fragments
            .create(format!("{name}_def"), format!("function pointer {name}"));
        self.fragments.set_body(
            definition,
            format!(
                "typedef {} (*{name})({});",
                ret_info.r_value,
                param_names.join(", ")
            ),
        );
        for dep in deps {
            self.fragments.add_dependency(definition, dep);
        }
        if let Some(dep) = ret_info.definition.or(ret_info.declaration) {
            self.fragments.add_dependency(definition, dep);
        }

        Ok(TypeInfo {
            l_value: name.clone(),
            r_value: name.clone(),
            external: name,
            declaration: Some(definition),
            definition: Some(definition),
            ..Default::default()
        })
    }

    /// Closures are structs carrying the call pointer; call sites go
    /// through the emitted caller wrapper, construction through the
    /// constructor wrapper.
    fn resolve_closure(
        &mut self,
        mgr: &mut NodeManager,
        params: &[NodeId],
        ret: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        let ret_info = self.resolve(mgr, ret)?;
        let mut param_types = vec![];
        let mut deps = vec![];
        for param in params {
            let info = self.resolve(mgr, *param)?;
            deps.extend(info.definition.or(info.declaration));
            param_types.push(info.r_value);
        }

        let name = self.fresh_name("closure");
        let definition = self
            .fragments
            .create(format!("{name}_def"), format!("closure type {name}"));
        let mut signature_params = vec![format!("struct {name}*")];
        signature_params.extend(param_types.iter().cloned());
        self.fragments.set_body(
            definition,
            format!(
                "typedef struct {name} {{\n    {} (*call)({});\n}} {name};",
                ret_info.r_value,
                signature_params.join(", ")
            ),
        );
        for dep in &deps {
            self.fragments.add_dependency(definition, *dep);
        }

        // the type-safe caller wrapper
        let caller = self
            .fragments
            .create(format!("{name}_call"), format!("caller of {name}"));
        let mut formals = vec![format!("{name}* closure")];
        let mut actuals = vec!["closure".to_string()];
        for (index, param) in param_types.iter().enumerate() {
            formals.push(format!("{param} p{index}"));
            actuals.push(format!("p{index}"));
        }
        let forwarded: String = actuals[1..]
            .iter()
            .map(|actual| format!(", {actual}"))
            .collect();
        self.fragments.set_body(
            caller,
            format!(
                "static inline {} {name}_call({}) {{\n    return closure->call((struct {name}*)closure{forwarded});\n}}",
                ret_info.r_value,
                formals.join(", "),
            ),
        );
        self.fragments.add_dependency(caller, definition);

        // the constructor wrapper
        let ctor = self
            .fragments
            .create(format!("{name}_ctor"), format!("constructor of {name}"));
        self.fragments.set_body(
            ctor,
            format!(
                "static inline {name} {name}_ctor({} (*call)({})) {{\n    {name} closure;\n    closure.call = call;\n    return closure;\n}}",
                ret_info.r_value,
                signature_params.join(", ")
            ),
        );
        self.fragments.add_dependency(ctor, definition);

        Ok(TypeInfo {
            l_value: name.clone(),
            r_value: name.clone(),
            external: name.clone(),
            externalize: ExprRewrite::Identity,
            internalize: ExprRewrite::Identity,
            declaration: Some(definition),
            definition: Some(ctor),
        })
    }

    /// Recursive types resolve in two passes: first every member of the
    /// component is declared under its tag and cached, then each member is
    /// unrolled once and its definition patched in place. The declaration
    /// fragment handed out in the first pass stays stable.
    fn resolve_recursive(
        &mut self,
        mgr: &mut NodeManager,
        ty: NodeId,
    ) -> Result<TypeInfo, BackendError> {
        let NodeKind::RecType { definition, .. } = mgr.kind(ty).clone() else {
            unreachable!("resolve_recursive on a non-recursive type");
        };
        let NodeKind::RecTypeDefinition { bindings } = mgr.kind(definition).clone() else {
            unreachable!("recursive type without definition");
        };

        debug!(
            "two-pass resolution of a recursive component with {} member(s)",
            bindings.len()
        );

        // pass one: declare and cache every member
        let mut members = vec![];
        for (var, _) in &bindings {
            let member = mgr.get(NodeKind::RecType {
                var: *var,
                definition,
            });
            let name = self.composite_name(mgr, member, "rec");
            let declaration = self.fragments.create(
                format!("{name}_decl"),
                format!("declaration of struct {name}"),
            );
            self.fragments
                .set_body(declaration, format!("struct {name};"));
            let def_fragment = self.fragments.create(
                format!("{name}_def"),
                format!("definition of struct {name}"),
            );
            self.fragments.add_dependency(def_fragment, declaration);

            let target = format!("struct {name}");
            let info = TypeInfo {
                l_value: target.clone(),
                r_value: target.clone(),
                external: target,
                declaration: Some(declaration),
                definition: Some(def_fragment),
                ..Default::default()
            };
            self.cache.insert(member, info);
            members.push((member, name, def_fragment));
        }

        // pass two: unroll each member once and patch the definition
        for (member, name, def_fragment) in &members {
            let unrolled = unroll_rec_type(mgr, *member);
            let (tag, entries) = match mgr.kind(unrolled).clone() {
                NodeKind::StructType { entries } => ("struct", entries),
                NodeKind::UnionType { entries } => ("union", entries),
                _ => return Err(self.unsupported(mgr, unrolled)),
            };
            let mut body = format!("{tag} {name} {{\n");
            for (field, field_ty) in entries {
                let field_info = self.resolve(mgr, field_ty)?;
                body.push_str(&format!("    {} {field};\n", field_info.l_value));
                if let Some(dep) = field_info.declaration {
                    self.fragments.add_dependency(*def_fragment, dep);
                }
            }
            body.push_str("};");
            self.fragments.set_body(*def_fragment, body);
        }

        Ok(self.cache[&ty].clone())
    }
}

/// Reduce a target type text to an identifier-safe token.
fn mangle(target: &str) -> String {
    let mut out = String::new();
    for c in target.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c == '*' {
            out.push_str("ptr");
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use crate::backend::fragments::TargetCode;
    use crate::ir::annotations::Annotation;
    use crate::ir::lang::{self, Basic};

    use super::*;

    struct Fixture {
        mgr: NodeManager,
        basic: Basic,
        types: TypeManager,
    }

    impl Fixture {
        fn new() -> Fixture {
            let mut mgr = NodeManager::new();
            let basic = Basic::new(&mut mgr);
            Fixture {
                mgr,
                basic,
                types: TypeManager::new(),
            }
        }
    }

    #[test]
    fn test_scalar_include_table() {
        let mut fx = Fixture::new();
        let info = fx.types.resolve(&mut fx.mgr, fx.basic.int4).unwrap();
        assert_eq!(info.l_value, "int32_t");
        let include = fx.types.fragments.get(info.declaration.unwrap());
        assert!(include.includes.contains("stdint.h"));

        let info = fx.types.resolve(&mut fx.mgr, fx.basic.real8).unwrap();
        assert_eq!(info.l_value, "double");
        assert!(info.declaration.is_none());
    }

    #[test]
    fn test_struct_has_declaration_and_definition() {
        let mut fx = Fixture::new();
        let ty = fx.mgr.get(NodeKind::StructType {
            entries: vec![
                ("x".into(), fx.basic.int4),
                ("y".into(), fx.basic.real8),
            ],
        });
        fx.mgr.annotate(ty, Annotation::CName("point".into()));

        let info = fx.types.resolve(&mut fx.mgr, ty).unwrap();
        assert_eq!(info.l_value, "struct point");
        let decl = fx.types.fragments.get(info.declaration.unwrap());
        assert_eq!(decl.body, "struct point;");
        let def = fx.types.fragments.get(info.definition.unwrap());
        assert!(def.body.contains("int32_t x;"));
        assert!(def.body.contains("double y;"));
        assert!(def.dependencies.contains(&info.declaration.unwrap()));
    }

    #[test]
    fn test_tuple_becomes_positional_struct() {
        let mut fx = Fixture::new();
        let ty = fx.mgr.get(NodeKind::TupleType {
            elements: vec![fx.basic.int4, fx.basic.boolean],
        });
        let info = fx.types.resolve(&mut fx.mgr, ty).unwrap();
        let def = fx.types.fragments.get(info.definition.unwrap());
        assert!(def.body.contains("c0;"));
        assert!(def.body.contains("c1;"));
    }

    #[test]
    fn test_array_stacks_stars() {
        let mut fx = Fixture::new();
        let array = lang::array_type(&mut fx.mgr, fx.basic.int4);
        let info = fx.types.resolve(&mut fx.mgr, array).unwrap();
        assert_eq!(info.r_value, "int32_t*");
    }

    #[test]
    fn test_vector_wraps_into_value_struct() {
        let mut fx = Fixture::new();
        let size = fx.mgr.get(NodeKind::ConcreteIntParam { value: 8 });
        let vector = lang::vector_type(&mut fx.mgr, fx.basic.int4, size);
        let info = fx.types.resolve(&mut fx.mgr, vector).unwrap();
        assert_eq!(info.l_value, "vec_int32_t_8");

        let def = fx.types.fragments.get(info.declaration.unwrap());
        assert!(def.body.contains("int32_t data[8];"));
        // the uniform initializer is emitted with the vector
        let init = fx.types.fragments.get(info.definition.unwrap());
        assert!(init.body.contains("init_uniform"));
    }

    #[test]
    fn test_ref_of_scalar_gets_new_operator() {
        let mut fx = Fixture::new();
        let referenced = lang::ref_type(&mut fx.mgr, fx.basic.int4);
        let info = fx.types.resolve(&mut fx.mgr, referenced).unwrap();
        assert_eq!(info.r_value, "int32_t*");
        assert_eq!(info.l_value, "int32_t");

        let new_op = fx.types.fragments.get(info.definition.unwrap());
        assert!(new_op.body.contains("malloc(sizeof(int32_t))"));
        assert!(new_op.includes.contains("stdlib.h"));
    }

    #[test]
    fn test_ref_of_array_collapses() {
        let mut fx = Fixture::new();
        let array = lang::array_type(&mut fx.mgr, fx.basic.int4);
        let referenced = lang::ref_type(&mut fx.mgr, array);
        let info = fx.types.resolve(&mut fx.mgr, referenced).unwrap();
        // no extra indirection: a C array value is itself a pointer
        assert_eq!(info.r_value, "int32_t*");
        assert_eq!(info.l_value, "int32_t*");
    }

    #[test]
    fn test_plain_function_type_is_a_pointer_typedef() {
        let mut fx = Fixture::new();
        let fn_ty = lang::function_type(&mut fx.mgr, vec![fx.basic.int4], fx.basic.real8);
        let info = fx.types.resolve(&mut fx.mgr, fn_ty).unwrap();
        let def = fx.types.fragments.get(info.definition.unwrap());
        assert!(def.body.contains("typedef double (*"));
        assert!(def.body.contains("(int32_t);"));
    }

    #[test]
    fn test_closure_emits_caller_and_constructor() {
        let mut fx = Fixture::new();
        let fn_ty = fx.mgr.get(NodeKind::FunctionType {
            params: vec![fx.basic.int4],
            ret: fx.basic.int4,
            plain: false,
        });
        let info = fx.types.resolve(&mut fx.mgr, fn_ty).unwrap();
        let def = fx.types.fragments.get(info.declaration.unwrap());
        assert!(def.body.contains("(*call)("));

        let ctor = fx.types.fragments.get(info.definition.unwrap());
        assert!(ctor.body.contains("_ctor"));
    }

    #[test]
    fn test_recursive_type_two_pass_resolution() {
        // struct node { int32_t value; struct node* next; }
        let mut fx = Fixture::new();
        let var = lang::type_var(&mut fx.mgr, "node");
        let next_array = lang::array_type(&mut fx.mgr, var);
        let next_ptr = lang::ref_type(&mut fx.mgr, next_array);
        let body = fx.mgr.get(NodeKind::StructType {
            entries: vec![
                ("value".into(), fx.basic.int4),
                ("next".into(), next_ptr),
            ],
        });
        let definition = fx.mgr.get(NodeKind::RecTypeDefinition {
            bindings: vec![(var, body)],
        });
        let rec = fx.mgr.get(NodeKind::RecType { var, definition });
        fx.mgr.annotate(rec, Annotation::CName("node".into()));

        let info = fx.types.resolve(&mut fx.mgr, rec).unwrap();
        assert_eq!(info.l_value, "struct node");

        let decl = fx.types.fragments.get(info.declaration.unwrap());
        assert_eq!(decl.body, "struct node;");
        let def = fx.types.fragments.get(info.definition.unwrap());
        assert!(def.body.contains("struct node* next;"), "got {}", def.body);
        assert!(def.body.contains("int32_t value;"));

        // resolving again hands out the cached info with the same
        // declaration token
        let again = fx.types.resolve(&mut fx.mgr, rec).unwrap();
        assert_eq!(again.declaration, info.declaration);
    }

    #[test]
    fn test_type_handler_takes_precedence() {
        struct OpaqueBuffers;
        impl TypeHandler for OpaqueBuffers {
            fn resolve(
                &self,
                mgr: &NodeManager,
                fragments: &mut FragmentManager,
                ty: NodeId,
            ) -> Option<TypeInfo> {
                let NodeKind::GenericType { family, .. } = mgr.kind(ty) else {
                    return None;
                };
                if family != "irt_ocl_buffer" {
                    return None;
                }
                let fragment = fragments.create("irt_ocl_buffer_include", "");
                fragments.add_include(fragment, "irt_ocl.h");
                let mut info = TypeInfo::simple("irt_ocl_buffer*");
                info.declaration = Some(fragment);
                Some(info)
            }
        }

        let mut fx = Fixture::new();
        fx.types.register_handler(Box::new(OpaqueBuffers));
        let buffer = lang::generic_type(&mut fx.mgr, "irt_ocl_buffer");
        let info = fx.types.resolve(&mut fx.mgr, buffer).unwrap();
        assert_eq!(info.l_value, "irt_ocl_buffer*");
        let fragment = fx.types.fragments.get(info.declaration.unwrap());
        assert!(fragment.includes.contains("irt_ocl.h"));
    }

    #[test]
    fn test_unbound_variable_is_unsupported() {
        let mut fx = Fixture::new();
        let var = lang::type_var(&mut fx.mgr, "a");
        assert!(matches!(
            fx.types.resolve(&mut fx.mgr, var),
            Err(BackendError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_emitted_code_orders_dependencies() {
        let mut fx = Fixture::new();
        let inner = fx.mgr.get(NodeKind::StructType {
            entries: vec![("value".into(), fx.basic.int4)],
        });
        fx.mgr.annotate(inner, Annotation::CName("inner".into()));
        let outer = fx.mgr.get(NodeKind::StructType {
            entries: vec![("nested".into(), inner)],
        });
        fx.mgr.annotate(outer, Annotation::CName("outer".into()));

        let info = fx.types.resolve(&mut fx.mgr, outer).unwrap();
        let code = TargetCode::new(&fx.types.fragments, &[info.definition.unwrap()]);
        let emitted = code.emit(&fx.types.fragments);

        let inner_at = emitted.find("struct inner {").unwrap();
        let outer_at = emitted.find("struct outer {").unwrap();
        assert!(inner_at < outer_at);
        assert!(emitted.starts_with("// --- Generated Inspire Code ---"));
    }
}
