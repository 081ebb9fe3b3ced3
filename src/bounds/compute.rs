use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::foundation::core::{ElementId, Rect};
use crate::geometry::algebra::transform_bound;
use crate::scene::graph::{ChildInstance, Element, Graph, MaskEdge, Symbol};
use crate::scene::model::Filter;

/// Memoized per-(symbol, frame) bounds.
///
/// Entries never change once written. While the optimizer rewrites the graph it drops the
/// frames of each symbol it replaces through [`BoundsCache::forget`]; the session discards the
/// whole cache once rewriting ends.
#[derive(Debug, Default)]
pub struct BoundsCache {
    frames: HashMap<(ElementId, u32), Option<Rect>>,
    in_progress: HashSet<ElementId>,
}

/// Min/max accumulator; `None` until something is added.
#[derive(Clone, Copy, Debug, Default)]
struct Accum(Option<Rect>);

impl Accum {
    fn add(&mut self, r: Option<Rect>) {
        let Some(r) = r else { return };
        self.0 = Some(match self.0 {
            Some(acc) => acc.union(r),
            None => r,
        });
    }
}

/// Open mask group: the clip box plus what its masked children accumulated so far.
struct MaskScope {
    clip: Option<Rect>,
    acc: Accum,
}

impl MaskScope {
    fn resolve(self) -> Option<Rect> {
        let (Some(clip), Some(content)) = (self.clip, self.acc.0) else {
            return None;
        };
        let r = clip.intersect(content);
        (r.x0 < r.x1 && r.y0 < r.y1).then_some(r)
    }
}

impl BoundsCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of memoized symbol frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Return `true` when nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bounds of `id` at `frame` in its own coordinate space.
    ///
    /// Sprites return their static bounds. Symbols normalize `frame` modulo their frame count and
    /// fold the active children back to front. Missing elements and self-referencing symbols
    /// yield `None` with a warning.
    pub fn bounds_at_frame(&mut self, graph: &Graph, id: ElementId, frame: u32) -> Option<Rect> {
        let sym = match graph.get(id) {
            Some(Element::Sprite(s)) => return Some(s.bounds),
            Some(Element::Symbol(s)) => s,
            None => {
                tracing::warn!(%id, "bounds requested for a missing element");
                return None;
            }
        };
        let frame = frame % sym.frame_count();
        if let Some(&cached) = self.frames.get(&(id, frame)) {
            return cached;
        }
        if !self.in_progress.insert(id) {
            tracing::warn!(%id, frame, "symbol contains itself; ignoring recursive reference");
            return None;
        }

        let out = self.fold_children(graph, sym, frame);
        self.in_progress.remove(&id);
        self.frames.entry((id, frame)).or_insert(out);
        out
    }

    /// Uncached fold of the children of `sym` active at `frame`, honoring mask groups.
    ///
    /// Works for symbols that are not stored in `graph`, such as a run being prerendered.
    pub(crate) fn fold_children(&mut self, graph: &Graph, sym: &Symbol, frame: u32) -> Option<Rect> {
        let frame = frame % sym.frame_count();
        let children = sym.children();
        let mut top = Accum::default();
        let mut scopes: SmallVec<[MaskScope; 4]> = SmallVec::new();
        for &i in sym.active_at(frame).iter().rev() {
            let child = &children[i as usize];
            match child.mask {
                Some(MaskEdge::Start) => scopes.push(MaskScope {
                    clip: self.instance_bounds(graph, child, frame),
                    acc: Accum::default(),
                }),
                Some(MaskEdge::End) => {
                    if let Some(scope) = scopes.pop() {
                        let r = scope.resolve();
                        scopes.last_mut().map_or(&mut top, |s| &mut s.acc).add(r);
                    }
                }
                None => {
                    let r = self.instance_bounds(graph, child, frame);
                    scopes.last_mut().map_or(&mut top, |s| &mut s.acc).add(r);
                }
            }
        }
        // Unbalanced groups close at the end of the list.
        while let Some(scope) = scopes.pop() {
            let r = scope.resolve();
            scopes.last_mut().map_or(&mut top, |s| &mut s.acc).add(r);
        }
        top.0.filter(|r| r.x0 <= r.x1 && r.y0 <= r.y1)
    }

    /// Drop every memoized frame of `id` so the next query recomputes it from the current graph.
    ///
    /// Only the optimizer calls this, between rewrites. Ancestors keep frames derived from the
    /// old content until the session rebuilds the cache after the last pass.
    pub(crate) fn forget(&mut self, id: ElementId) {
        self.frames.retain(|&(k, _), _| k != id);
    }

    /// Bounds of a child instance at parent `frame`, in parent space.
    pub(crate) fn instance_bounds(
        &mut self,
        graph: &Graph,
        child: &ChildInstance,
        frame: u32,
    ) -> Option<Rect> {
        let local = child.span.local(frame)?;
        let inner = self.bounds_at_frame(graph, child.target, local as u32)?;
        let r = transform_bound(child.transform_at(local), inner);
        Some(pad_for_filters(r, child.filters_at(local)))
    }
}

/// Grow `r` by the padding of every filter in `filters`.
pub fn pad_for_filters(r: Rect, filters: &[Filter]) -> Rect {
    filters.iter().fold(r, |acc, f| {
        let (px, py) = f.padding();
        acc.inflate(px, py)
    })
}

#[cfg(test)]
#[path = "../../tests/unit/bounds/compute.rs"]
mod tests;
