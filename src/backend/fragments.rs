//! Target code fragments.
//!
//! A fragment is one self-contained piece of target code (a declaration, a
//! definition, a helper function) with the set of fragments it textually
//! requires earlier in the emitted file and the external headers it needs.
//! Emission orders fragments topologically along the dependency graph.

use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(u32);

impl FragmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Default)]
pub struct CodeFragment {
    /// Identifier, unique within the manager.
    pub name: String,
    /// Human-readable header line emitted above the body.
    pub header: String,
    pub body: String,
    pub dependencies: BTreeSet<FragmentId>,
    pub includes: BTreeSet<String>,
}

#[derive(Default)]
pub struct FragmentManager {
    fragments: Vec<CodeFragment>,
}

impl FragmentManager {
    pub fn new() -> FragmentManager {
        FragmentManager::default()
    }

    pub fn create(&mut self, name: impl ToString, header: impl ToString) -> FragmentId {
        self.fragments.push(CodeFragment {
            name: name.to_string(),
            header: header.to_string(),
            ..Default::default()
        });
        FragmentId(self.fragments.len() as u32 - 1)
    }

    pub fn get(&self, id: FragmentId) -> &CodeFragment {
        &self.fragments[id.index()]
    }

    pub fn get_mut(&mut self, id: FragmentId) -> &mut CodeFragment {
        &mut self.fragments[id.index()]
    }

    pub fn set_body(&mut self, id: FragmentId, body: impl ToString) {
        self.get_mut(id).body = body.to_string();
    }

    pub fn add_dependency(&mut self, id: FragmentId, dependency: FragmentId) {
        if id != dependency {
            self.get_mut(id).dependencies.insert(dependency);
        }
    }

    pub fn add_include(&mut self, id: FragmentId, include: impl ToString) {
        self.get_mut(id).includes.insert(include.to_string());
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

/// An ordered selection of fragments ready for emission.
pub struct TargetCode {
    order: Vec<FragmentId>,
}

impl TargetCode {
    /// Resolve the dependency-topological order of `roots` and everything
    /// they require. Dependency cycles (recursive type definitions) are
    /// broken at the back edge.
    pub fn new(mgr: &FragmentManager, roots: &[FragmentId]) -> TargetCode {
        let mut order = vec![];
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        for root in roots {
            visit(mgr, *root, &mut visited, &mut in_progress, &mut order);
        }
        TargetCode { order }
    }

    pub fn fragments(&self) -> &[FragmentId] {
        &self.order
    }

    /// Emit the fixed banner, the collected includes, then the fragment
    /// bodies in dependency order.
    pub fn emit(&self, mgr: &FragmentManager) -> String {
        let mut includes: BTreeSet<String> = BTreeSet::new();
        for id in &self.order {
            includes.extend(mgr.get(*id).includes.iter().cloned());
        }

        let mut out = String::from("// --- Generated Inspire Code ---\n");
        for include in includes {
            out.push_str(&format!("#include <{include}>\n"));
        }
        for id in &self.order {
            let fragment = mgr.get(*id);
            if fragment.body.is_empty() {
                continue;
            }
            out.push('\n');
            if !fragment.header.is_empty() {
                out.push_str(&format!("// {}\n", fragment.header));
            }
            out.push_str(&fragment.body);
            if !fragment.body.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

fn visit(
    mgr: &FragmentManager,
    id: FragmentId,
    visited: &mut HashSet<FragmentId>,
    in_progress: &mut HashSet<FragmentId>,
    order: &mut Vec<FragmentId>,
) {
    if visited.contains(&id) || in_progress.contains(&id) {
        return;
    }
    in_progress.insert(id);
    for dependency in mgr.get(id).dependencies.clone() {
        visit(mgr, dependency, visited, in_progress, order);
    }
    in_progress.remove(&id);
    visited.insert(id);
    order.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topological_emission() {
        let mut mgr = FragmentManager::new();
        let decl = mgr.create("point_decl", "declaration of point");
        mgr.set_body(decl, "struct point;");
        let def = mgr.create("point_def", "definition of point");
        mgr.set_body(def, "struct point { int32_t x; int32_t y; };");
        mgr.add_dependency(def, decl);
        mgr.add_include(def, "stdint.h");

        let code = TargetCode::new(&mgr, &[def]);
        assert_eq!(code.fragments(), &[decl, def]);

        let emitted = code.emit(&mgr);
        assert!(emitted.starts_with("// --- Generated Inspire Code ---\n"));
        assert!(emitted.contains("#include <stdint.h>"));
        let decl_at = emitted.find("struct point;").unwrap();
        let def_at = emitted.find("struct point {").unwrap();
        assert!(decl_at < def_at);
    }

    #[test]
    fn test_dependency_cycles_are_broken() {
        let mut mgr = FragmentManager::new();
        let a = mgr.create("a", "");
        mgr.set_body(a, "// a");
        let b = mgr.create("b", "");
        mgr.set_body(b, "// b");
        mgr.add_dependency(a, b);
        mgr.add_dependency(b, a);

        let code = TargetCode::new(&mgr, &[a]);
        assert_eq!(code.fragments().len(), 2);
    }

    #[test]
    fn test_shared_dependency_emitted_once() {
        let mut mgr = FragmentManager::new();
        let common = mgr.create("common", "");
        mgr.set_body(common, "// common");
        let left = mgr.create("left", "");
        mgr.set_body(left, "// left");
        let right = mgr.create("right", "");
        mgr.set_body(right, "// right");
        mgr.add_dependency(left, common);
        mgr.add_dependency(right, common);

        let code = TargetCode::new(&mgr, &[left, right]);
        assert_eq!(
            code.fragments()
                .iter()
                .filter(|id| **id == common)
                .count(),
            1
        );
    }
}
