//! spriteflat turns vector-animation symbol graphs into a small set of rasterized sprites.
//!
//! The pipeline is session-oriented:
//!
//! - Parse a [`SceneDef`] (the serde form of the parser output)
//! - Open a [`Flattener`] over it, which rebuilds per-symbol timelines into a [`Graph`]
//! - Call [`Flattener::flatten`] to prerender static subtrees, factor repeated structure,
//!   collapse wrappers, trim what is left unreferenced and rasterize every sprite
//!
//! The result is a [`FlattenOutput`]: the reduced graph, premultiplied pixel buffers keyed by
//! sprite id and per-frame bounds of every remaining symbol.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod foundation;

pub(crate) mod bounds;
pub(crate) mod effects;
pub(crate) mod geometry;
pub(crate) mod optimize;
pub(crate) mod render;
pub(crate) mod scene;
/// Session-oriented flattening API.
pub mod session;
pub(crate) mod timeline;

pub use crate::foundation::core::{Affine, BezPath, ElementId, FrameSpan, PixelRect, Point, Rect, Vec2};
pub use crate::foundation::error::{FlattenError, FlattenResult};

pub use crate::bounds::compute::{BoundsCache, pad_for_filters};
pub use crate::geometry::algebra::{
    ColorTransform, colors_equivalent, invert_color, invert_transform, multiply_colors,
    multiply_transforms, transform_bound, transforms_equivalent,
};
pub use crate::optimize::OptimizeStats;
pub use crate::render::rasterizer::{AtlasImage, Placement};
pub use crate::render::surface_pool::{SurfaceFactory, SurfacePool, SurfacePoolOpts, SurfacePoolStats};
pub use crate::scene::graph::{
    ChildInstance, Drawable, Element, FilterList, Graph, MaskEdge, RasterImage, Shape, Sprite, Symbol,
};
pub use crate::scene::model::{
    BevelFilter, BlendMode, BlurFilter, ElementDef, Filter, GlowFilter, GradientGlowFilter,
    ImageDef, MorphDef, PlacementDef, Rgba8, SceneDef, ShapeDef, SpriteDef, SymbolDef,
};
pub use crate::session::flattener::{FlattenOpts, FlattenOutput, FlattenStats, Flattener};
pub use crate::timeline::reconstruct::build_graph;
