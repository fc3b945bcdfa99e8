//! Stable textual form of IR trees, for tests and debugging.
//!
//! Printing is a pure function of the tree, so repeated pretty-printing is
//! trivially idempotent. Because fresh variable ids are process-global, the
//! printed names of variables (`v1`, `v7`, ...) depend on construction
//! order; [`normalize`] renumbers the variables of a tree deterministically
//! so two structurally equivalent trees print identically.

use std::collections::HashMap;

use super::manager::NodeManager;
use super::replacer;
use super::visitor::{self, VisitOrder};
use super::{NodeId, NodeKind};

/// Render a node to its stable textual form.
pub fn print(mgr: &NodeManager, id: NodeId) -> String {
    let mut printer = Printer {
        mgr,
        out: String::new(),
        indent: 0,
    };
    printer.node(id);
    printer.out
}

/// Renumber all variables of the subtree in first-occurrence order. The
/// result is structurally equivalent and prints independently of the
/// process-global variable counter state.
pub fn normalize(mgr: &mut NodeManager, root: NodeId) -> NodeId {
    let mut order = vec![];
    visitor::visit_once(mgr, root, VisitOrder::Prefix, &mut |node| {
        if matches!(mgr.kind(node), NodeKind::Variable { .. }) {
            order.push(node);
        }
    });

    let mut replacements = HashMap::new();
    for (index, var) in order.iter().enumerate() {
        let NodeKind::Variable { ty, .. } = mgr.kind(*var) else {
            unreachable!("collected non-variable");
        };
        let normalized = mgr.get(NodeKind::Variable {
            ty: *ty,
            id: (index + 1) as u64,
        });
        replacements.insert(*var, normalized);
    }

    replacer::replace_all(mgr, root, &replacements)
}

struct Printer<'a> {
    mgr: &'a NodeManager,
    out: String,
    indent: usize,
}

impl Printer<'_> {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn list(&mut self, items: &[NodeId], separator: &str) {
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self.write(separator);
            }
            self.node(*item);
        }
    }

    fn node(&mut self, id: NodeId) {
        use NodeKind::*;
        match self.mgr.kind(id).clone() {
            TypeVariable { name } => self.write(&format!("'{name}")),
            VariableIntParam { symbol } => self.write(&format!("#{symbol}")),
            ConcreteIntParam { value } => self.write(&value.to_string()),
            GenericType {
                family,
                type_params,
                int_params,
                ..
            } => {
                self.write(&family);
                if !type_params.is_empty() || !int_params.is_empty() {
                    self.write("<");
                    let mut params = type_params;
                    params.extend(int_params);
                    self.list(&params, ",");
                    self.write(">");
                }
            }
            TupleType { elements } => {
                self.write("(");
                self.list(&elements, ",");
                self.write(")");
            }
            FunctionType { params, ret, plain } => {
                self.write("(");
                self.list(&params, ",");
                self.write(if plain { ")->" } else { ")=>" });
                self.node(ret);
            }
            StructType { entries } => self.composite("struct", &entries),
            UnionType { entries } => self.composite("union", &entries),
            ArrayType { element, dim } => {
                self.write("array<");
                self.node(element);
                self.write(",");
                self.node(dim);
                self.write(">");
            }
            VectorType { element, size } => {
                self.write("vector<");
                self.node(element);
                self.write(",");
                self.node(size);
                self.write(">");
            }
            RefType { element } => {
                self.write("ref<");
                self.node(element);
                self.write(">");
            }
            ChannelType { element, size } => {
                self.write("channel<");
                self.node(element);
                self.write(",");
                self.node(size);
                self.write(">");
            }
            RecType { var, definition } => {
                self.write("rec ");
                self.node(var);
                self.write(".");
                self.node(definition);
            }
            RecTypeDefinition { bindings } | LambdaDefinition { bindings } => {
                self.write("{");
                for (index, (var, value)) in bindings.iter().enumerate() {
                    if index > 0 {
                        self.write(", ");
                    }
                    self.node(*var);
                    self.write("=");
                    self.node(*value);
                }
                self.write("}");
            }
            Literal { value, .. } => self.write(&value),
            Variable { id: fresh, .. } => self.write(&format!("v{fresh}")),
            CallExpr { func, args, .. } => {
                self.node(func);
                self.write("(");
                self.list(&args, ", ");
                self.write(")");
            }
            CastExpr { ty, sub } => {
                self.write("CAST<");
                self.node(ty);
                self.write(">(");
                self.node(sub);
                self.write(")");
            }
            LambdaExpr {
                var, definition, ..
            } => {
                let NodeKind::LambdaDefinition { bindings } = self.mgr.kind(definition).clone()
                else {
                    unreachable!("lambda expr without definition");
                };
                let single = bindings.len() == 1 && bindings[0].0 == var;
                if single {
                    self.node(bindings[0].1);
                } else {
                    self.write("rec ");
                    self.node(var);
                    self.write(".");
                    self.node(definition);
                }
            }
            Lambda { params, body, .. } => {
                self.write("fun(");
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        self.write(", ");
                    }
                    self.node(*param);
                    self.write(":");
                    let ty = self
                        .mgr
                        .expr_type(*param)
                        .unwrap_or_else(|| unreachable!("untyped parameter"));
                    self.node(ty);
                }
                self.write(") ");
                self.node(body);
            }
            TupleExpr { elements, .. } => {
                self.write("(");
                self.list(&elements, ", ");
                self.write(")");
            }
            VectorExpr { elements, .. } => {
                self.write("[");
                self.list(&elements, ", ");
                self.write("]");
            }
            StructExpr { members, .. } => {
                self.write("struct{");
                for (index, (name, value)) in members.iter().enumerate() {
                    if index > 0 {
                        self.write(", ");
                    }
                    self.write(name);
                    self.write("=");
                    self.node(*value);
                }
                self.write("}");
            }
            UnionExpr { member, value, .. } => {
                self.write("union{");
                self.write(&member);
                self.write("=");
                self.node(value);
                self.write("}");
            }
            JobExpr {
                range,
                default_body,
                ..
            } => {
                self.write("job(");
                self.node(range);
                self.write(") ");
                self.node(default_body);
            }
            MarkerExpr { sub, .. } | MarkerStmt { sub, .. } => self.node(sub),
            CompoundStmt { stmts } => {
                self.write("{");
                self.indent += 1;
                for stmt in stmts {
                    self.newline();
                    self.node(stmt);
                    self.write(";");
                }
                self.indent -= 1;
                self.newline();
                self.write("}");
            }
            DeclarationStmt { var, init } => {
                self.write("decl ");
                self.node(var);
                self.write(" : ");
                let ty = self
                    .mgr
                    .expr_type(var)
                    .unwrap_or_else(|| unreachable!("untyped declaration variable"));
                self.node(ty);
                self.write(" = ");
                self.node(init);
            }
            IfStmt {
                condition,
                then_body,
                else_body,
            } => {
                self.write("if(");
                self.node(condition);
                self.write(") ");
                self.node(then_body);
                self.write(" else ");
                self.node(else_body);
            }
            WhileStmt { condition, body } => {
                self.write("while(");
                self.node(condition);
                self.write(") ");
                self.node(body);
            }
            ForStmt {
                decl,
                body,
                end,
                step,
            } => {
                self.write("for(");
                self.node(decl);
                self.write(" .. ");
                self.node(end);
                self.write(" : ");
                self.node(step);
                self.write(") ");
                self.node(body);
            }
            SwitchStmt {
                expr,
                cases,
                default,
            } => {
                self.write("switch(");
                self.node(expr);
                self.write(") {");
                self.indent += 1;
                for (guard, body) in cases {
                    self.newline();
                    self.write("case ");
                    self.node(guard);
                    self.write(": ");
                    self.node(body);
                }
                self.newline();
                self.write("default: ");
                self.node(default);
                self.indent -= 1;
                self.newline();
                self.write("}");
            }
            BreakStmt => self.write("break"),
            ContinueStmt => self.write("continue"),
            ReturnStmt { expr } => {
                self.write("return ");
                self.node(expr);
            }
            Program { entry_points, main } => {
                self.write(if main { "// main program" } else { "// program" });
                for entry in entry_points {
                    self.newline();
                    self.node(entry);
                }
            }
        }
    }

    fn composite(&mut self, tag: &str, entries: &[(String, NodeId)]) {
        self.write(tag);
        self.write("<");
        for (index, (name, ty)) in entries.iter().enumerate() {
            if index > 0 {
                self.write(",");
            }
            self.write(name);
            self.write(":");
            self.node(*ty);
        }
        self.write(">");
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::lang::{self, Basic};
    use crate::ir::manager::fresh_id;

    use super::*;

    #[test]
    fn test_print_types() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);
        assert_eq!(print(&mgr, basic.int4), "int<4>");

        let array = lang::array_type(&mut mgr, basic.int4);
        let referenced = lang::ref_type(&mut mgr, array);
        assert_eq!(print(&mgr, referenced), "ref<array<int<4>,1>>");

        let func = lang::function_type(&mut mgr, vec![basic.int4, basic.boolean], basic.unit);
        assert_eq!(print(&mgr, func), "(int<4>,bool)->unit");
    }

    #[test]
    fn test_print_is_idempotent() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);
        let first = print(&mgr, basic.ref_deref);
        let second = print(&mgr, basic.ref_deref);
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalize_renumbers_deterministically() {
        let mut mgr = NodeManager::new();
        let basic = Basic::new(&mut mgr);

        let make_tree = |mgr: &mut NodeManager, ty| {
            let a = mgr.get(NodeKind::Variable {
                ty,
                id: fresh_id(),
            });
            let b = mgr.get(NodeKind::Variable {
                ty,
                id: fresh_id(),
            });
            mgr.get(NodeKind::CompoundStmt { stmts: vec![a, b, a] })
        };

        let first = make_tree(&mut mgr, basic.int4);
        let second = make_tree(&mut mgr, basic.int4);
        assert_ne!(first, second);

        let first = normalize(&mut mgr, first);
        let second = normalize(&mut mgr, second);
        assert_eq!(print(&mgr, first), print(&mgr, second));
    }
}
