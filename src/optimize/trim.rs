use crate::foundation::core::ElementId;
use crate::scene::graph::Graph;

use super::Optimizer;
use super::occurrence::Occurrences;

/// Elements nothing references, excluding the root and named elements. Symbols come first.
pub(crate) fn unreferenced(graph: &Graph, occurrences: &Occurrences) -> Vec<ElementId> {
    let dead = |id: &ElementId| {
        *id != ElementId::ROOT
            && occurrences.total(*id) == 0
            && graph.get(*id).is_some_and(|e| e.stable_name().is_none())
    };
    let mut out: Vec<ElementId> = graph.symbol_ids().into_iter().filter(dead).collect();
    out.extend(graph.sprite_ids().into_iter().filter(dead));
    out
}

impl Optimizer<'_> {
    /// Delete unreferenced elements until none are left.
    pub(super) fn trim(&mut self) {
        loop {
            let dead = unreferenced(self.graph, &self.occurrences);
            if dead.is_empty() {
                break;
            }
            tracing::debug!(count = dead.len(), "trimming unreferenced elements");
            for id in dead {
                self.graph.remove(id);
                self.occurrences.recount(self.graph, id);
                self.bounds.forget(id);
                self.atlas.remove(&id);
                self.stats.elements_trimmed += 1;
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/trim.rs"]
mod tests;
