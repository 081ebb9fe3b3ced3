use crate::foundation::core::{Affine, ElementId, FrameSpan};
use crate::foundation::error::FlattenResult;
use crate::foundation::math::fingerprint_bytes;
use crate::geometry::algebra::ColorTransform;
use crate::scene::graph::{ChildInstance, Graph, Symbol};
use crate::scene::model::{BlendMode, Filter};

use super::{Optimizer, effects_constant};

/// Identity of a baked filter prerender, shared by every child asking for the same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FilteredKey {
    pub(crate) target: ElementId,
    pub(crate) blend: Option<BlendMode>,
    pub(crate) filters: u64,
}

impl FilteredKey {
    pub(crate) fn new(target: ElementId, filters: &[Filter], blend: Option<BlendMode>) -> FlattenResult<Self> {
        let bytes = serde_json::to_vec(filters)?;
        Ok(Self {
            target,
            blend,
            filters: fingerprint_bytes(&bytes),
        })
    }
}

/// Whether the effects of `child` can be baked into a sprite.
///
/// Returns the blend mode to bake along with the filters, or `None` when the child does not
/// qualify.
pub(crate) fn bakeable(graph: &Graph, child: &ChildInstance, prerender_blendings: bool) -> Option<Option<BlendMode>> {
    if !child.has_filters() || !effects_constant(child) {
        return None;
    }
    let single_frame = graph.sprite(child.target).is_some()
        || graph.symbol(child.target).is_some_and(|s| s.frame_count() == 1);
    if !single_frame {
        return None;
    }
    let blend = (prerender_blendings && child.has_blend()).then(|| child.blend_at(0));
    Some(blend)
}

impl Optimizer<'_> {
    /// Point `child` at a sprite holding its target with the filters applied.
    ///
    /// Returns `None` when the child does not qualify or nothing could be rendered.
    pub(super) fn prerender_filtered_child(&mut self, child: &ChildInstance) -> Option<ChildInstance> {
        let blend = bakeable(self.graph, child, self.settings.prerender_blendings)?;
        let filters = child.filters_at(0);
        let key = match FilteredKey::new(child.target, filters, blend) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(target_id = %child.target, error = %err, "cannot key filter prerender");
                return None;
            }
        };

        let sprite = match self.filtered.get(&key) {
            Some(&sprite) => sprite,
            None => {
                let mut staged = ChildInstance::still(
                    child.target,
                    FrameSpan::single(0),
                    Affine::IDENTITY,
                    ColorTransform::IDENTITY,
                );
                staged.filters = Some(vec![filters.iter().cloned().collect()]);
                staged.blend_modes = blend.map(|b| vec![b]);
                let temp = Symbol::new(self.next_id, 1, vec![staged]);
                let img = match self.render_detached(&temp, 0) {
                    Ok(Some(img)) => img,
                    Ok(None) => return None,
                    Err(err) => {
                        tracing::warn!(target_id = %child.target, error = %err, "filter prerender failed; keeping it live");
                        return None;
                    }
                };
                let sprite = self.alloc_id();
                tracing::debug!(target_id = %child.target, %sprite, filters = filters.len(), "baking filters");
                self.install_sprite(sprite, img, None);
                self.filtered.insert(key, sprite);
                sprite
            }
        };

        let mut out = child.clone();
        out.target = sprite;
        out.filters = None;
        if blend.is_some() {
            out.blend_modes = None;
        }
        self.stats.filtered_prerendered += 1;
        Some(out)
    }

    /// Bake every remaining qualifying filtered child of every symbol.
    pub(super) fn prerender_filtered_children(&mut self) {
        for id in self.graph.symbol_ids() {
            let Some(sym) = self.graph.symbol(id) else {
                continue;
            };
            if !sym.children().iter().any(|c| c.has_filters()) {
                continue;
            }
            let mut children = sym.children().to_vec();
            let mut changed = false;
            for child in &mut children {
                if !child.has_filters() {
                    continue;
                }
                if let Some(baked) = self.prerender_filtered_child(child) {
                    *child = baked;
                    changed = true;
                }
            }
            if changed {
                self.replace_children(id, children);
                self.bounds.forget(id);
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/filtered.rs"]
mod tests;
