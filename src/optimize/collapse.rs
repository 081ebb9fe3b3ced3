use crate::foundation::core::{ElementId, FrameSpan};
use crate::geometry::algebra::{multiply_colors, multiply_transforms};
use crate::scene::graph::{ChildInstance, FilterList, Graph, Symbol};
use crate::scene::model::BlendMode;

use super::Optimizer;

/// What to do with one child of a symbol being collapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Keep,
    Inline,
    PrerenderFiltered,
}

pub(crate) fn decide(graph: &Graph, owner: ElementId, child: &ChildInstance, prerender_blendings: bool) -> Decision {
    let Some(inner) = graph.symbol(child.target) else {
        return Decision::Keep;
    };
    if inner.stable_name.is_some() || child.name.is_some() || child.target == owner || child.mask.is_some() {
        return Decision::Keep;
    }
    if child.has_filters() {
        return Decision::PrerenderFiltered;
    }
    if child.has_blend()
        && (!prerender_blendings
            || inner.children().len() > 1
            || inner.children().iter().any(|gc| gc.has_blend()))
    {
        return Decision::Keep;
    }
    if inner.frame_count() as usize > child.len_frames() {
        return Decision::Keep;
    }
    Decision::Inline
}

/// The children of `inner` as seen through `inst`, placed on the owner's timeline.
///
/// A grandchild that leaves and re-enters while `inst` loops over `inner` yields one instance per
/// contiguous stretch. Storage order of `inner` is kept.
pub(crate) fn collapse_instance(inner: &Symbol, inst: &ChildInstance) -> Vec<ChildInstance> {
    let fc = inner.frame_count() as usize;
    let mut out = Vec::new();
    for gc in inner.children() {
        let mut current: Option<ChildInstance> = None;
        for i in 0..inst.len_frames() {
            let Some(local) = gc.span.local((i % fc) as u32) else {
                out.extend(current.take());
                continue;
            };
            let frame = inst.span.first + i as u32;
            let seg = current.get_or_insert_with(|| ChildInstance {
                target: gc.target,
                span: FrameSpan::single(frame),
                transforms: Vec::new(),
                colors: Vec::new(),
                filters: None,
                blend_modes: None,
                mask: gc.mask,
                name: gc.name.clone(),
            });
            push_frame(seg, inst, i, gc, local);
        }
        out.extend(current);
    }
    out
}

fn push_frame(seg: &mut ChildInstance, inst: &ChildInstance, i: usize, gc: &ChildInstance, local: usize) {
    let n = seg.transforms.len();
    seg.transforms
        .push(multiply_transforms(inst.transform_at(i), gc.transform_at(local)));
    seg.colors
        .push(multiply_colors(&inst.color_at(i), &gc.color_at(local)));

    let filters = gc.filters_at(local);
    if !filters.is_empty() || seg.filters.is_some() {
        seg.filters
            .get_or_insert_with(|| vec![FilterList::new(); n])
            .push(filters.iter().cloned().collect());
    }
    let outer = inst.blend_at(i);
    let blend = if outer.needs_isolation() { outer } else { gc.blend_at(local) };
    if blend != BlendMode::Normal || seg.blend_modes.is_some() {
        seg.blend_modes
            .get_or_insert_with(|| vec![BlendMode::Normal; n])
            .push(blend);
    }
    seg.span.last = seg.span.first + n as u32;
}

impl Optimizer<'_> {
    /// Inline child symbols of `id` where the result renders the same.
    pub(super) fn collapse_symbol(&mut self, id: ElementId) {
        let Some(sym) = self.graph.symbol(id) else {
            return;
        };
        let children = sym.children().to_vec();
        let mut out = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            match decide(self.graph, id, &child, self.settings.prerender_blendings) {
                Decision::Keep => out.push(child),
                Decision::PrerenderFiltered => match self.prerender_filtered_child(&child) {
                    Some(baked) => {
                        changed = true;
                        out.push(baked);
                    }
                    None => out.push(child),
                },
                Decision::Inline => {
                    let Some(inner) = self.graph.symbol(child.target) else {
                        out.push(child);
                        continue;
                    };
                    tracing::trace!(%id, inner = %child.target, "inlining child symbol");
                    out.extend(collapse_instance(inner, &child));
                    self.stats.instances_inlined += 1;
                    changed = true;
                }
            }
        }
        if changed {
            self.replace_children(id, out);
            self.bounds.forget(id);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/collapse.rs"]
mod tests;
