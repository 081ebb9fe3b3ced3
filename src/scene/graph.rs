use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::foundation::core::{Affine, BezPath, ElementId, FrameSpan, Rect};
use crate::foundation::error::{FlattenError, FlattenResult};
use crate::geometry::algebra::ColorTransform;
use crate::scene::model::{BlendMode, Filter, Rgba8};

/// Filters active on one instance frame.
pub type FilterList = SmallVec<[Filter; 1]>;

/// Role of a child in mask bracketing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaskEdge {
    /// Clip shape; opens a mask group.
    Start,
    /// Closes the innermost open mask group.
    End,
}

/// Time-ranged placement of an element inside a symbol.
///
/// Every per-frame array has exactly `span.len_frames()` entries.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildInstance {
    /// Referenced element.
    pub target: ElementId,
    /// Frames of the parent during which the instance is present.
    pub span: FrameSpan,
    /// Per-frame transform.
    pub transforms: Vec<Affine>,
    /// Per-frame color transform.
    pub colors: Vec<ColorTransform>,
    /// Per-frame filters, when any frame has some.
    pub filters: Option<Vec<FilterList>>,
    /// Per-frame blend modes, when any frame uses one.
    pub blend_modes: Option<Vec<BlendMode>>,
    /// Mask bracketing role.
    pub mask: Option<MaskEdge>,
    /// Instance name. Named instances are never flattened.
    pub name: Option<String>,
}

impl ChildInstance {
    /// Instance holding the same transform and color on every frame of `span`.
    pub fn still(target: ElementId, span: FrameSpan, transform: Affine, color: ColorTransform) -> Self {
        let n = span.len_frames();
        Self {
            target,
            span,
            transforms: vec![transform; n],
            colors: vec![color; n],
            filters: None,
            blend_modes: None,
            mask: None,
            name: None,
        }
    }

    /// Number of frames covered.
    pub fn len_frames(&self) -> usize {
        self.span.len_frames()
    }

    /// Transform at local index `i`.
    pub fn transform_at(&self, i: usize) -> Affine {
        self.transforms.get(i).copied().unwrap_or(Affine::IDENTITY)
    }

    /// Color transform at local index `i`.
    pub fn color_at(&self, i: usize) -> ColorTransform {
        self.colors.get(i).copied().unwrap_or_default()
    }

    /// Filters at local index `i`.
    pub fn filters_at(&self, i: usize) -> &[Filter] {
        self.filters
            .as_ref()
            .and_then(|f| f.get(i))
            .map(|f| f.as_slice())
            .unwrap_or(&[])
    }

    /// Blend mode at local index `i`.
    pub fn blend_at(&self, i: usize) -> BlendMode {
        self.blend_modes
            .as_ref()
            .and_then(|b| b.get(i))
            .copied()
            .unwrap_or_default()
    }

    /// Return `true` when some frame carries a filter.
    pub fn has_filters(&self) -> bool {
        self.filters
            .as_ref()
            .is_some_and(|f| f.iter().any(|l| !l.is_empty()))
    }

    /// Return `true` when some frame uses a non-normal blend mode.
    pub fn has_blend(&self) -> bool {
        self.blend_modes
            .as_ref()
            .is_some_and(|b| b.iter().any(|m| m.needs_isolation()))
    }

    /// Copy of the frames `range` (local indices), placed at the matching parent frames.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        let first = self.span.first + range.start as u32;
        let last = self.span.first + range.end as u32 - 1;
        Self {
            target: self.target,
            span: FrameSpan { first, last },
            transforms: self.transforms[range.clone()].to_vec(),
            colors: self.colors[range.clone()].to_vec(),
            filters: self.filters.as_ref().map(|f| f[range.clone()].to_vec()),
            blend_modes: self.blend_modes.as_ref().map(|b| b[range].to_vec()),
            mask: self.mask,
            name: self.name.clone(),
        }
    }

    fn check_lengths(&self) -> bool {
        let n = self.len_frames();
        self.transforms.len() == n
            && self.colors.len() == n
            && self.filters.as_ref().is_none_or(|f| f.len() == n)
            && self.blend_modes.as_ref().is_none_or(|b| b.len() == n)
    }
}

/// Animated container of child instances.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    /// Element id.
    pub id: ElementId,
    /// Stable export name.
    pub stable_name: Option<String>,
    /// Authored container bounds.
    pub container_bounds: Option<Rect>,
    frame_count: u32,
    children: Vec<ChildInstance>,
    frame_index: Vec<SmallVec<[u32; 8]>>,
}

impl Symbol {
    /// Create a symbol and build its per-frame index.
    pub fn new(id: ElementId, frame_count: u32, children: Vec<ChildInstance>) -> Self {
        let mut out = Self {
            id,
            stable_name: None,
            container_bounds: None,
            frame_count: frame_count.max(1),
            children: Vec::new(),
            frame_index: Vec::new(),
        };
        out.set_children(children);
        out
    }

    /// Number of frames in the timeline (at least 1).
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Children in storage order; paint order is the reverse.
    pub fn children(&self) -> &[ChildInstance] {
        &self.children
    }

    /// Indices of children present at `frame` (normalized modulo the frame count), ascending.
    pub fn active_at(&self, frame: u32) -> &[u32] {
        let f = (frame % self.frame_count) as usize;
        self.frame_index.get(f).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Swap in a new child list and rebuild the per-frame index.
    pub fn set_children(&mut self, children: Vec<ChildInstance>) {
        self.children = children;
        self.rebuild_index();
    }

    /// Swap in a new timeline length and child list.
    pub fn set_timeline(&mut self, frame_count: u32, children: Vec<ChildInstance>) {
        self.frame_count = frame_count.max(1);
        self.set_children(children);
    }

    fn rebuild_index(&mut self) {
        let mut index = vec![SmallVec::new(); self.frame_count as usize];
        for (i, child) in self.children.iter().enumerate() {
            let last = child.span.last.min(self.frame_count.saturating_sub(1));
            for f in child.span.first..=last {
                index[f as usize].push(i as u32);
            }
        }
        self.frame_index = index;
    }
}

/// Premultiplied RGBA8 raster.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major premultiplied RGBA8 bytes.
    pub data: Arc<[u8]>,
}

impl RasterImage {
    /// Wrap premultiplied bytes, checking the length.
    pub fn from_premul(width: u32, height: u32, data: Vec<u8>) -> FlattenResult<Self> {
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if data.len() != expected {
            return Err(FlattenError::validation(format!(
                "raster byte length {} does not match {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data: data.into(),
        })
    }

    /// Premultiply straight RGBA8 bytes.
    pub fn from_straight(width: u32, height: u32, mut rgba: Vec<u8>) -> FlattenResult<Self> {
        for px in rgba.chunks_exact_mut(4) {
            let p = crate::foundation::math::premul_rgba8([px[0], px[1], px[2], px[3]]);
            px.copy_from_slice(&p);
        }
        Self::from_premul(width, height, rgba)
    }
}

/// Solid-filled vector path.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    /// Path in sprite-local coordinates.
    pub path: BezPath,
    /// Straight RGBA fill.
    pub color: Rgba8,
}

/// Leaf appearance.
#[derive(Clone, Debug, PartialEq)]
pub enum Drawable {
    /// Vector shapes drawn through the instance transform.
    Shapes(Vec<Shape>),
    /// Raster drawn scaled into the sprite bounds.
    Image(RasterImage),
}

/// Static leaf element.
#[derive(Clone, Debug, PartialEq)]
pub struct Sprite {
    /// Element id.
    pub id: ElementId,
    /// Appearance.
    pub drawable: Drawable,
    /// Local bounds.
    pub bounds: Rect,
    /// Stable export name.
    pub stable_name: Option<String>,
}

impl Sprite {
    /// Copy of the sprite moved by `(dx, dy)` under a new id.
    pub fn translated(&self, id: ElementId, dx: f64, dy: f64) -> Self {
        let shift = Affine::translate((dx, dy));
        let drawable = match &self.drawable {
            Drawable::Shapes(shapes) => Drawable::Shapes(
                shapes
                    .iter()
                    .map(|s| Shape {
                        path: shift * s.path.clone(),
                        color: s.color,
                    })
                    .collect(),
            ),
            Drawable::Image(img) => Drawable::Image(img.clone()),
        };
        Self {
            id,
            drawable,
            bounds: self.bounds + kurbo::Vec2::new(dx, dy),
            stable_name: None,
        }
    }
}

/// Graph node.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    /// Container.
    Symbol(Symbol),
    /// Leaf.
    Sprite(Sprite),
}

impl Element {
    /// Element id.
    pub fn id(&self) -> ElementId {
        match self {
            Self::Symbol(s) => s.id,
            Self::Sprite(s) => s.id,
        }
    }

    /// Stable export name.
    pub fn stable_name(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => s.stable_name.as_deref(),
            Self::Sprite(s) => s.stable_name.as_deref(),
        }
    }
}

/// Scene graph: Symbols and Sprites keyed by id, iterated in id order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    elements: BTreeMap<ElementId, Element>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an element under its own id.
    pub fn insert(&mut self, element: Element) {
        self.elements.insert(element.id(), element);
    }

    /// Remove an element.
    pub fn remove(&mut self, id: ElementId) -> Option<Element> {
        self.elements.remove(&id)
    }

    /// Look up an element.
    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Look up a symbol.
    pub fn symbol(&self, id: ElementId) -> Option<&Symbol> {
        match self.elements.get(&id) {
            Some(Element::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a symbol mutably.
    pub fn symbol_mut(&mut self, id: ElementId) -> Option<&mut Symbol> {
        match self.elements.get_mut(&id) {
            Some(Element::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a sprite.
    pub fn sprite(&self, id: ElementId) -> Option<&Sprite> {
        match self.elements.get(&id) {
            Some(Element::Sprite(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a sprite mutably.
    pub fn sprite_mut(&mut self, id: ElementId) -> Option<&mut Sprite> {
        match self.elements.get_mut(&id) {
            Some(Element::Sprite(s)) => Some(s),
            _ => None,
        }
    }

    /// Return `true` when the element exists.
    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Return `true` when the graph holds no element.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Symbol ids in ascending order.
    pub fn symbol_ids(&self) -> Vec<ElementId> {
        self.elements
            .values()
            .filter_map(|e| match e {
                Element::Symbol(s) => Some(s.id),
                Element::Sprite(_) => None,
            })
            .collect()
    }

    /// Sprite ids in ascending order.
    pub fn sprite_ids(&self) -> Vec<ElementId> {
        self.elements
            .values()
            .filter_map(|e| match e {
                Element::Sprite(s) => Some(s.id),
                Element::Symbol(_) => None,
            })
            .collect()
    }

    /// First id past the current maximum.
    pub fn next_id(&self) -> ElementId {
        self.elements
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(ElementId(0))
    }

    /// Check structural invariants: per-frame array lengths, mask balance, and that every child
    /// target exists.
    pub fn validate(&self) -> FlattenResult<()> {
        for sym in self.elements.values().filter_map(|e| match e {
            Element::Symbol(s) => Some(s),
            Element::Sprite(_) => None,
        }) {
            let mut depth: i64 = 0;
            for (i, child) in sym.children().iter().enumerate() {
                if !child.check_lengths() {
                    return Err(FlattenError::validation(format!(
                        "symbol {}: child {i} per-frame arrays do not match its span",
                        sym.id
                    )));
                }
                if !self.contains(child.target) {
                    return Err(FlattenError::validation(format!(
                        "symbol {}: child {i} references missing element {}",
                        sym.id, child.target
                    )));
                }
                match child.mask {
                    Some(MaskEdge::Start) => depth += 1,
                    Some(MaskEdge::End) => depth -= 1,
                    None => {}
                }
            }
            if depth != 0 {
                return Err(FlattenError::validation(format!(
                    "symbol {}: unbalanced mask bracketing",
                    sym.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scene/graph.rs"]
mod tests;
