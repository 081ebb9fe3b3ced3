use std::collections::BTreeMap;

use crate::bounds::compute::BoundsCache;
use crate::foundation::core::{ElementId, Rect};
use crate::foundation::error::{FlattenError, FlattenResult};
use crate::optimize::{OptimizeSettings, OptimizeStats, Optimizer};
use crate::render::rasterizer::{AtlasImage, Rasterizer, RenderEnv};
use crate::render::surface_pool::{SurfaceFactory, SurfacePool, SurfacePoolOpts};
use crate::scene::graph::Graph;
use crate::scene::model::SceneDef;
use crate::timeline::reconstruct::build_graph;

/// Options controlling a [`Flattener`] run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FlattenOpts {
    /// Allow prerendering children that use a non-normal blend mode. The blend is then applied
    /// against transparency instead of the live backdrop.
    pub prerender_blendings: bool,
    /// Run the optimizer. When disabled, only bounds and sprite rasterization run.
    pub collapse: bool,
    /// Uniform pixel scale applied to every rasterization. Must be finite and > 0.
    pub ratio: f64,
    /// Limits of the default surface pool.
    pub pool: SurfacePoolOpts,
}

impl Default for FlattenOpts {
    fn default() -> Self {
        Self {
            prerender_blendings: false,
            collapse: true,
            ratio: 1.0,
            pool: SurfacePoolOpts::default(),
        }
    }
}

impl FlattenOpts {
    /// Set [`FlattenOpts::prerender_blendings`].
    pub fn with_prerender_blendings(mut self, on: bool) -> Self {
        self.prerender_blendings = on;
        self
    }

    /// Set [`FlattenOpts::collapse`].
    pub fn with_collapse(mut self, on: bool) -> Self {
        self.collapse = on;
        self
    }

    /// Set [`FlattenOpts::ratio`].
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Set [`FlattenOpts::pool`].
    pub fn with_pool(mut self, pool: SurfacePoolOpts) -> Self {
        self.pool = pool;
        self
    }

    /// Reject options no run can honor.
    pub fn validate(&self) -> FlattenResult<()> {
        if !self.ratio.is_finite() || self.ratio <= 0.0 {
            return Err(FlattenError::validation(format!(
                "ratio must be finite and > 0, got {}",
                self.ratio
            )));
        }
        Ok(())
    }
}

/// Counters of a [`Flattener::flatten`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlattenStats {
    /// Graph rewrites.
    pub optimize: OptimizeStats,
    /// Sprites rasterized after optimization.
    pub sprites_rasterized: u32,
    /// Sprites with nothing to draw.
    pub sprites_empty: u32,
}

/// Everything the exporter needs from a finished run.
#[derive(Debug)]
pub struct FlattenOutput {
    /// Reduced graph. Surviving elements keep their ids.
    pub graph: Graph,
    /// Premultiplied pixels of every sprite with visible content.
    pub atlas: BTreeMap<ElementId, AtlasImage>,
    /// Bounds of every remaining symbol, per frame.
    pub frame_bounds: BTreeMap<ElementId, Vec<Option<Rect>>>,
    /// What the run did.
    pub stats: FlattenStats,
}

/// Session owning a scene graph and the state needed to bound, render and flatten it.
///
/// Bounds are memoized across calls; surfaces come from a [`SurfaceFactory`], a bounded
/// [`SurfacePool`] unless replaced with [`Flattener::with_surfaces`].
pub struct Flattener {
    graph: Graph,
    bounds: BoundsCache,
    surfaces: Box<dyn SurfaceFactory>,
    raster: Rasterizer,
    atlas: BTreeMap<ElementId, AtlasImage>,
    opts: FlattenOpts,
}

impl std::fmt::Debug for Flattener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flattener")
            .field("elements", &self.graph.len())
            .field("cached_bounds", &self.bounds.len())
            .field("atlas", &self.atlas.len())
            .field("opts", &self.opts)
            .finish()
    }
}

impl Flattener {
    /// Reconstruct the graph of `scene` and open a session over it.
    pub fn new(scene: &SceneDef, opts: FlattenOpts) -> FlattenResult<Self> {
        opts.validate()?;
        let graph = build_graph(scene)?;
        Self::from_graph(graph, opts)
    }

    /// Open a session over an already built graph.
    pub fn from_graph(graph: Graph, opts: FlattenOpts) -> FlattenResult<Self> {
        opts.validate()?;
        graph.validate()?;
        Ok(Self {
            graph,
            bounds: BoundsCache::new(),
            surfaces: Box::new(SurfacePool::new(opts.pool)),
            raster: Rasterizer::new(),
            atlas: BTreeMap::new(),
            opts,
        })
    }

    /// Use `surfaces` for every buffer this session needs.
    pub fn with_surfaces(mut self, surfaces: Box<dyn SurfaceFactory>) -> Self {
        self.surfaces = surfaces;
        self
    }

    /// Current graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Options of this session.
    pub fn opts(&self) -> &FlattenOpts {
        &self.opts
    }

    /// Bounds of `id` at `frame` (wrapped to its timeline), or `None` when nothing is visible.
    pub fn bounds_at_frame(&mut self, id: ElementId, frame: u32) -> Option<Rect> {
        self.bounds.bounds_at_frame(&self.graph, id, frame)
    }

    /// Rasterize `id` at `frame` with the session ratio.
    pub fn render_frame(&mut self, id: ElementId, frame: u32) -> FlattenResult<Option<AtlasImage>> {
        let ratio = self.opts.ratio;
        let mut env = RenderEnv {
            graph: &self.graph,
            bounds: &mut self.bounds,
            surfaces: &mut *self.surfaces,
        };
        self.raster.render_frame(&mut env, id, frame, ratio)
    }

    /// Optimize the graph, rasterize every sprite and collect per-frame symbol bounds.
    #[tracing::instrument(skip_all, fields(elements = self.graph.len(), collapse = self.opts.collapse))]
    pub fn flatten(mut self) -> FlattenResult<FlattenOutput> {
        let optimize = if self.opts.collapse {
            let settings = OptimizeSettings {
                prerender_blendings: self.opts.prerender_blendings,
                ratio: self.opts.ratio,
            };
            Optimizer::new(
                &mut self.graph,
                &mut self.bounds,
                &mut *self.surfaces,
                &mut self.raster,
                &mut self.atlas,
                settings,
            )
            .run()
        } else {
            OptimizeStats::default()
        };

        // Rewrites only forget the symbols they touch; ancestors may hold stale frames.
        self.bounds = BoundsCache::new();
        let mut stats = FlattenStats {
            optimize,
            ..FlattenStats::default()
        };
        self.rasterize_sprites(&mut stats)?;
        let frame_bounds = self.frame_bounds();
        tracing::info!(
            elements = self.graph.len(),
            atlas = self.atlas.len(),
            ?stats,
            "flatten finished"
        );

        Ok(FlattenOutput {
            graph: self.graph,
            atlas: self.atlas,
            frame_bounds,
            stats,
        })
    }

    /// Render every sprite the optimizer did not already rasterize.
    fn rasterize_sprites(&mut self, stats: &mut FlattenStats) -> FlattenResult<()> {
        for id in self.graph.sprite_ids() {
            if self.atlas.contains_key(&id) {
                continue;
            }
            match self.render_frame(id, 0)? {
                Some(img) => {
                    self.atlas.insert(id, img);
                    stats.sprites_rasterized += 1;
                }
                None => {
                    tracing::debug!(%id, "sprite has no visible content");
                    stats.sprites_empty += 1;
                }
            }
        }
        Ok(())
    }

    fn frame_bounds(&mut self) -> BTreeMap<ElementId, Vec<Option<Rect>>> {
        let mut out = BTreeMap::new();
        for id in self.graph.symbol_ids() {
            let frames = self
                .graph
                .symbol(id)
                .map_or(0, |s| s.frame_count());
            let bounds = (0..frames)
                .map(|f| self.bounds.bounds_at_frame(&self.graph, id, f))
                .collect();
            out.insert(id, bounds);
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/flattener.rs"]
mod tests;
