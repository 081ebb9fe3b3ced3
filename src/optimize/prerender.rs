use crate::foundation::core::{ElementId, FrameSpan, Vec2};
use crate::geometry::algebra::{ColorTransform, is_translation_only};
use crate::scene::graph::{ChildInstance, Element, Graph, Symbol};

use super::occurrence::Occurrences;
use super::{Optimizer, first_different_frame};

/// Verdict of the whole-symbol checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Assessment {
    /// The symbol can be replaced by a raster of its first frame.
    pub(crate) prerenderable: bool,
    /// Every child is a sprite spanning the whole timeline with unchanging placement.
    pub(crate) is_static: bool,
}

/// A single-frame wrapper around one untouched sprite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SpriteAlias {
    pub(crate) target: ElementId,
    pub(crate) offset: Vec2,
}

pub(crate) fn assess(
    graph: &Graph,
    occurrences: &Occurrences,
    sym: &Symbol,
    prerender_blendings: bool,
) -> Assessment {
    let frame_count = sym.frame_count() as usize;
    let mut out = Assessment {
        prerenderable: true,
        is_static: true,
    };
    for child in sym.children() {
        let Some(sprite) = graph.sprite(child.target) else {
            return Assessment::default();
        };
        if child.span.first != 0 || child.len_frames() != frame_count {
            return Assessment::default();
        }
        if frame_count > 1 && first_different_frame(child, 0) != frame_count {
            return Assessment::default();
        }

        // A filtered child counts as unique: its prerender differs from every other use.
        let shared = occurrences.owner_count(child.target) > 1 && !child.has_filters();
        if child.name.is_some()
            || (child.has_blend() && !prerender_blendings)
            || sprite.stable_name.is_some()
            || shared
        {
            out.prerenderable = false;
        }
    }
    out
}

/// First frame of every child, on a one-frame timeline.
pub(crate) fn collapse_frames(sym: &Symbol) -> Vec<ChildInstance> {
    sym.children()
        .iter()
        .map(|child| {
            let mut first = child.slice(0..1);
            first.span = FrameSpan::single(0);
            first
        })
        .collect()
}

pub(crate) fn sprite_alias(graph: &Graph, sym: &Symbol, assessment: Assessment) -> Option<SpriteAlias> {
    let [child] = sym.children() else {
        return None;
    };
    let eligible = assessment.prerenderable
        && sym.frame_count() == 1
        && child.mask.is_none()
        && !child.has_filters()
        && !child.has_blend()
        && graph.sprite(child.target).is_some()
        && is_translation_only(child.transform_at(0))
        && child.color_at(0) == ColorTransform::IDENTITY;
    if !eligible {
        return None;
    }
    Some(SpriteAlias {
        target: child.target,
        offset: child.transform_at(0).translation(),
    })
}

impl Optimizer<'_> {
    pub(super) fn collapse_frames(&mut self, id: ElementId) {
        let Some(sym) = self.graph.symbol(id) else {
            return;
        };
        let children = collapse_frames(sym);
        tracing::debug!(%id, frames = sym.frame_count(), "collapsing identical frames");
        if let Some(sym) = self.graph.symbol_mut(id) {
            sym.set_timeline(1, children);
        }
        self.bounds.forget(id);
        self.stats.frames_collapsed += 1;
    }

    /// Replace the symbol `id` by a raster of its first frame. Returns `false` when nothing was
    /// rendered.
    pub(super) fn prerender_symbol(&mut self, id: ElementId) -> bool {
        let Some(sym) = self.graph.symbol(id) else {
            return false;
        };
        let stable_name = sym.stable_name.clone();
        let area = sym.container_bounds;
        match self.render_element(id, area) {
            Ok(Some(img)) => {
                tracing::debug!(%id, "prerendering symbol");
                self.install_sprite(id, img, stable_name);
                self.stats.symbols_prerendered += 1;
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(%id, error = %err, "symbol prerender failed; keeping it as is");
                false
            }
        }
    }

    pub(super) fn alias_sprite(&mut self, id: ElementId, alias: SpriteAlias) {
        let Some(sym) = self.graph.symbol(id) else {
            return;
        };
        let stable_name = sym.stable_name.clone();
        let Some(source) = self.graph.sprite(alias.target) else {
            return;
        };
        let mut sprite = source.translated(id, alias.offset.x, alias.offset.y);
        sprite.stable_name = stable_name;
        let atlas = self.atlas.get(&alias.target).map(|img| {
            let mut img = img.clone();
            img.placement.x += alias.offset.x;
            img.placement.y += alias.offset.y;
            img
        });

        tracing::debug!(%id, target = %alias.target, "aliasing wrapper symbol to its sprite");
        self.graph.insert(Element::Sprite(sprite));
        self.bounds.forget(id);
        self.occurrences.recount(self.graph, id);
        if let Some(img) = atlas {
            self.atlas.insert(id, img);
        }
        self.stats.symbols_aliased += 1;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/prerender.rs"]
mod tests;
