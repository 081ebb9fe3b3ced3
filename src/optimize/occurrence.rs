use std::collections::BTreeMap;

use crate::foundation::core::ElementId;
use crate::scene::graph::{ChildInstance, Graph};

/// How many times each element is referenced, per owning symbol.
///
/// Zero counts are never stored, so an element with no entry is unreferenced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Occurrences {
    by_element: BTreeMap<ElementId, BTreeMap<ElementId, u32>>,
}

impl Occurrences {
    pub(crate) fn from_graph(graph: &Graph) -> Self {
        let mut out = Self::default();
        for owner in graph.symbol_ids() {
            out.recount(graph, owner);
        }
        out
    }

    pub(crate) fn add(&mut self, element: ElementId, owner: ElementId, n: u32) {
        if n == 0 {
            return;
        }
        *self
            .by_element
            .entry(element)
            .or_default()
            .entry(owner)
            .or_default() += n;
    }

    pub(crate) fn remove(&mut self, element: ElementId, owner: ElementId, n: u32) {
        let Some(owners) = self.by_element.get_mut(&element) else {
            return;
        };
        if let Some(count) = owners.get_mut(&owner) {
            *count = count.saturating_sub(n);
            if *count == 0 {
                owners.remove(&owner);
            }
        }
        if owners.is_empty() {
            self.by_element.remove(&element);
        }
    }

    /// References to `element` held by `owner`.
    pub(crate) fn count(&self, element: ElementId, owner: ElementId) -> u32 {
        self.by_element
            .get(&element)
            .and_then(|o| o.get(&owner))
            .copied()
            .unwrap_or(0)
    }

    /// References to `element` across every owner.
    pub(crate) fn total(&self, element: ElementId) -> u32 {
        self.by_element
            .get(&element)
            .map(|o| o.values().sum())
            .unwrap_or(0)
    }

    /// Symbols referencing `element`, ascending.
    pub(crate) fn owners(&self, element: ElementId) -> Vec<ElementId> {
        self.by_element
            .get(&element)
            .map(|o| o.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn owner_count(&self, element: ElementId) -> usize {
        self.by_element.get(&element).map_or(0, |o| o.len())
    }

    /// Replace every count held by `owner` with what its current child list references.
    ///
    /// Owners that are no longer symbols end up holding nothing.
    pub(crate) fn recount(&mut self, graph: &Graph, owner: ElementId) {
        let children = graph.symbol(owner).map(|s| s.children()).unwrap_or(&[]);
        self.recount_children(owner, children);
    }

    /// Replace every count held by `owner` with the references of `children`.
    pub(crate) fn recount_children(&mut self, owner: ElementId, children: &[ChildInstance]) {
        let stale: Vec<ElementId> = self
            .by_element
            .iter()
            .filter(|(_, o)| o.contains_key(&owner))
            .map(|(&e, _)| e)
            .collect();
        for element in stale {
            let n = self.count(element, owner);
            self.remove(element, owner, n);
        }
        for child in children {
            self.add(child.target, owner, 1);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/occurrence.rs"]
mod tests;
