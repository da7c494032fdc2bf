//! Class hierarchy graph
//!
//! Edges run from a subclass to each of its bases. Attribute lookup uses a
//! left-to-right depth-first MRO; the inheritance-aware merge uses every
//! class reachable in either direction.

use crate::program::ClassId;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    graph: DiGraph<ClassId, ()>,
    index: HashMap<ClassId, NodeIndex>,
    bases: HashMap<ClassId, Vec<ClassId>>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, class: ClassId) {
        if !self.index.contains_key(&class) {
            let idx = self.graph.add_node(class);
            self.index.insert(class, idx);
        }
    }

    pub fn add_base(&mut self, class: ClassId, base: ClassId) {
        self.add_class(class);
        self.add_class(base);
        let bases = self.bases.entry(class).or_default();
        if class == base || bases.contains(&base) {
            return;
        }
        bases.push(base);
        self.graph.add_edge(self.index[&class], self.index[&base], ());
    }

    pub fn bases(&self, class: ClassId) -> &[ClassId] {
        self.bases.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Method resolution order: the class itself, then its bases depth
    /// first, left to right, each class once.
    pub fn mro(&self, class: ClassId) -> Vec<ClassId> {
        let mut order = Vec::new();
        self.mro_visit(class, &mut order);
        order
    }

    fn mro_visit(&self, class: ClassId, order: &mut Vec<ClassId>) {
        if order.contains(&class) {
            return;
        }
        order.push(class);
        for &base in self.bases(class) {
            self.mro_visit(base, order);
        }
    }

    pub fn ancestors(&self, class: ClassId) -> BTreeSet<ClassId> {
        let Some(&start) = self.index.get(&class) else {
            return BTreeSet::from([class]);
        };
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            found.insert(self.graph[idx]);
        }
        found
    }

    pub fn descendants(&self, class: ClassId) -> BTreeSet<ClassId> {
        let Some(&start) = self.index.get(&class) else {
            return BTreeSet::from([class]);
        };
        let reversed = Reversed(&self.graph);
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(idx) = dfs.next(reversed) {
            found.insert(self.graph[idx]);
        }
        found
    }

    /// Every class on the subclass/superclass chain of `class`, itself
    /// included.
    pub fn related(&self, class: ClassId) -> BTreeSet<ClassId> {
        let mut all = self.ancestors(class);
        all.extend(self.descendants(class));
        all
    }

    pub fn is_subclass(&self, class: ClassId, base: ClassId) -> bool {
        self.ancestors(class).contains(&base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mro_depth_first() {
        // D(B, C), B(A), C(A)
        let (a, b, c, d) = (ClassId(0), ClassId(1), ClassId(2), ClassId(3));
        let mut h = ClassHierarchy::new();
        h.add_base(b, a);
        h.add_base(c, a);
        h.add_base(d, b);
        h.add_base(d, c);
        assert_eq!(h.mro(d), vec![d, b, a, c]);
        assert!(h.is_subclass(d, a));
        assert!(!h.is_subclass(a, d));
    }

    #[test]
    fn test_related_covers_both_directions() {
        let (a, b, c, other) = (ClassId(0), ClassId(1), ClassId(2), ClassId(9));
        let mut h = ClassHierarchy::new();
        h.add_base(b, a);
        h.add_base(c, b);
        h.add_class(other);
        assert_eq!(h.related(b), BTreeSet::from([a, b, c]));
        assert_eq!(h.related(other), BTreeSet::from([other]));
    }

    #[test]
    fn test_self_base_ignored() {
        let a = ClassId(0);
        let mut h = ClassHierarchy::new();
        h.add_base(a, a);
        assert!(h.bases(a).is_empty());
        assert_eq!(h.mro(a), vec![a]);
    }
}
