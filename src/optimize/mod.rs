//! Graph rewriting that trades symbol trees for fewer, prerendered sprites.
//!
//! Symbols are visited once each in ascending id order, the root timeline last. For every symbol
//! the passes run in a fixed order:
//!
//! 1. static-frame collapse
//! 2. whole-symbol prerender, or sprite aliasing for trivial wrappers
//! 3. factoring of sibling runs shared across symbols
//! 4. instance collapse (inlining of child symbols)
//! 5. masked-subtree extraction
//!
//! Filtered children left over are prerendered at the end, then unreferenced elements are
//! trimmed.

pub(crate) mod collapse;
pub(crate) mod factor;
pub(crate) mod filtered;
pub(crate) mod masked;
pub(crate) mod occurrence;
pub(crate) mod prerender;
pub(crate) mod trim;

use std::collections::{BTreeMap, HashMap};

use crate::bounds::compute::BoundsCache;
use crate::foundation::core::{ElementId, Rect};
use crate::foundation::error::FlattenResult;
use crate::render::rasterizer::{AtlasImage, Rasterizer, RenderEnv};
use crate::render::surface_pool::SurfaceFactory;
use crate::scene::graph::{ChildInstance, Drawable, Element, Graph, Sprite, Symbol};

use self::filtered::FilteredKey;
use self::occurrence::Occurrences;

/// What the optimizer rewrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OptimizeStats {
    /// Symbols whose frames were all identical and got reduced to one.
    pub frames_collapsed: u32,
    /// Symbols replaced by a single raster.
    pub symbols_prerendered: u32,
    /// Single-child wrappers replaced by a translated copy of their sprite.
    pub symbols_aliased: u32,
    /// Sibling runs merged into a shared element.
    pub runs_factored: u32,
    /// Child instances replaced by the children of their symbol.
    pub instances_inlined: u32,
    /// Mask groups replaced by prerendered frames.
    pub mask_groups_prerendered: u32,
    /// Filtered children redirected to a sprite with the filter baked in.
    pub filtered_prerendered: u32,
    /// Elements removed because nothing referenced them.
    pub elements_trimmed: u32,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct OptimizeSettings {
    pub(crate) prerender_blendings: bool,
    pub(crate) ratio: f64,
}

/// One optimization run over a graph, with the rendering state it borrows from the session.
pub(crate) struct Optimizer<'a> {
    graph: &'a mut Graph,
    bounds: &'a mut BoundsCache,
    surfaces: &'a mut dyn SurfaceFactory,
    raster: &'a mut Rasterizer,
    atlas: &'a mut BTreeMap<ElementId, AtlasImage>,
    settings: OptimizeSettings,
    occurrences: Occurrences,
    filtered: HashMap<FilteredKey, ElementId>,
    next_id: ElementId,
    pending: Vec<ElementId>,
    stats: OptimizeStats,
}

impl<'a> Optimizer<'a> {
    pub(crate) fn new(
        graph: &'a mut Graph,
        bounds: &'a mut BoundsCache,
        surfaces: &'a mut dyn SurfaceFactory,
        raster: &'a mut Rasterizer,
        atlas: &'a mut BTreeMap<ElementId, AtlasImage>,
        settings: OptimizeSettings,
    ) -> Self {
        let occurrences = Occurrences::from_graph(graph);
        let next_id = graph.next_id();
        Self {
            graph,
            bounds,
            surfaces,
            raster,
            atlas,
            settings,
            occurrences,
            filtered: HashMap::new(),
            next_id,
            pending: Vec::new(),
            stats: OptimizeStats::default(),
        }
    }

    /// Run every pass to completion.
    #[tracing::instrument(level = "debug", skip_all)]
    pub(crate) fn run(mut self) -> OptimizeStats {
        let mut queue = self.graph.symbol_ids();
        if queue.first() == Some(&ElementId::ROOT) {
            queue.rotate_left(1);
        }
        let mut i = 0;
        while i < queue.len() {
            self.optimize_symbol(queue[i]);
            queue.append(&mut self.pending);
            i += 1;
        }

        self.prerender_filtered_children();
        self.trim();
        tracing::debug!(stats = ?self.stats, "optimizer finished");
        self.stats
    }

    fn optimize_symbol(&mut self, id: ElementId) {
        let Some(sym) = self.graph.symbol(id) else {
            return;
        };
        let assessment = prerender::assess(
            self.graph,
            &self.occurrences,
            sym,
            self.settings.prerender_blendings,
        );
        if assessment.is_static && sym.frame_count() > 1 {
            self.collapse_frames(id);
        }

        let graph = &*self.graph;
        let alias = graph
            .symbol(id)
            .and_then(|sym| prerender::sprite_alias(graph, sym, assessment));
        if let Some(alias) = alias {
            self.alias_sprite(id, alias);
            return;
        }
        if assessment.prerenderable && self.prerender_symbol(id) {
            return;
        }

        if self.graph.symbol(id).is_some_and(|s| s.children().len() > 1) {
            self.factor_children(id);
        }
        self.collapse_symbol(id);
        self.prerender_masked_children(id);
    }

    fn alloc_id(&mut self) -> ElementId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    /// Rasterize `id` at frame 0, cropped to `area` when given.
    fn render_element(&mut self, id: ElementId, area: Option<Rect>) -> FlattenResult<Option<AtlasImage>> {
        let ratio = self.settings.ratio;
        let mut env = RenderEnv {
            graph: &*self.graph,
            bounds: &mut *self.bounds,
            surfaces: &mut *self.surfaces,
        };
        match area {
            Some(area) => self.raster.render_frame_within(&mut env, id, 0, ratio, area),
            None => self.raster.render_frame(&mut env, id, 0, ratio),
        }
    }

    /// Rasterize a symbol that is not stored in the graph.
    fn render_detached(&mut self, sym: &Symbol, frame: u32) -> FlattenResult<Option<AtlasImage>> {
        let ratio = self.settings.ratio;
        let mut env = RenderEnv {
            graph: &*self.graph,
            bounds: &mut *self.bounds,
            surfaces: &mut *self.surfaces,
        };
        self.raster.render_detached(&mut env, sym, frame, ratio)
    }

    /// Store `img` as the sprite `id`, replacing whatever element held that id.
    fn install_sprite(&mut self, id: ElementId, img: AtlasImage, stable_name: Option<String>) {
        let p = img.placement;
        self.graph.insert(Element::Sprite(Sprite {
            id,
            drawable: Drawable::Image(img.image.clone()),
            bounds: Rect::new(p.x, p.y, p.x + p.width, p.y + p.height),
            stable_name,
        }));
        self.bounds.forget(id);
        self.occurrences.recount(self.graph, id);
        self.atlas.insert(id, img);
    }

    /// Swap in a rewritten child list for `id`.
    fn replace_children(&mut self, id: ElementId, children: Vec<ChildInstance>) {
        if let Some(sym) = self.graph.symbol_mut(id) {
            sym.set_children(children);
        }
        self.occurrences.recount(self.graph, id);
    }
}

/// First local frame after `first` whose placement differs from frame `first`.
///
/// Returns the child length when every later frame matches.
pub(crate) fn first_different_frame(child: &ChildInstance, first: usize) -> usize {
    let n = child.len_frames();
    ((first + 1)..n)
        .find(|&f| {
            child.transform_at(f) != child.transform_at(first)
                || child.color_at(f) != child.color_at(first)
                || child.blend_at(f) != child.blend_at(first)
                || child.filters_at(f) != child.filters_at(first)
        })
        .unwrap_or(n)
}

/// Return `true` when filters and blend mode do not change over the child's frames.
pub(crate) fn effects_constant(child: &ChildInstance) -> bool {
    (1..child.len_frames()).all(|f| {
        child.blend_at(f) == child.blend_at(0) && child.filters_at(f) == child.filters_at(0)
    })
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/mod.rs"]
mod tests;
