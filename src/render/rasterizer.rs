use std::collections::HashMap;
use std::sync::Arc;

use crate::bounds::compute::BoundsCache;
use crate::effects::composite::{
    composite_blend, destination_in, premul_over_in_place_opacity, replace_under_mask, tint_region,
};
use crate::effects::filters::apply_filter;
use crate::foundation::core::{Affine, BezPath, ElementId, PixelRect, Rect};
use crate::foundation::error::{FlattenError, FlattenResult};
use crate::foundation::math::{fingerprint_bytes, unit255_to_u8, unpremultiply};
use crate::geometry::algebra::{
    ColorTransform, multiply_colors, multiply_transforms, transform_bound,
};
use crate::render::surface_pool::{SurfaceFactory, surface_size};
use crate::scene::graph::{ChildInstance, Drawable, Element, Graph, MaskEdge, RasterImage, Sprite, Symbol};
use crate::scene::model::{BlendMode, Filter};

/// Where a rendered buffer sits, in element units and in buffer pixels.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Placement {
    /// Left edge in element space.
    pub x: f64,
    /// Top edge in element space.
    pub y: f64,
    /// Width in element space.
    pub width: f64,
    /// Height in element space.
    pub height: f64,
    /// Left edge of the pixels inside the buffer.
    pub source_x: u32,
    /// Top edge of the pixels inside the buffer.
    pub source_y: u32,
    /// Pixel width.
    pub source_width: u32,
    /// Pixel height.
    pub source_height: u32,
}

/// A rasterized element frame with its placement.
#[derive(Clone, Debug, PartialEq)]
pub struct AtlasImage {
    /// Premultiplied pixels.
    pub image: RasterImage,
    /// Position of the pixels in element space.
    pub placement: Placement,
}

impl AtlasImage {
    /// Straight-alpha copy for image encoders.
    pub fn to_rgba_image(&self) -> FlattenResult<image::RgbaImage> {
        let mut out = Vec::with_capacity(self.image.data.len());
        for px in self.image.data.chunks_exact(4) {
            let s = unpremultiply([px[0], px[1], px[2], px[3]]);
            out.extend(s.iter().map(|&c| unit255_to_u8(c)));
        }
        image::RgbaImage::from_raw(self.image.width, self.image.height, out)
            .ok_or_else(|| FlattenError::render("atlas image byte length mismatch"))
    }

    /// xxh3 fingerprint of the pixels and their size.
    pub fn fingerprint(&self) -> u64 {
        let mut bytes = Vec::with_capacity(self.image.data.len() + 8);
        bytes.extend_from_slice(&self.image.width.to_le_bytes());
        bytes.extend_from_slice(&self.image.height.to_le_bytes());
        bytes.extend_from_slice(&self.image.data);
        fingerprint_bytes(&bytes)
    }
}

/// State a render call reads and fills.
pub(crate) struct RenderEnv<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) bounds: &'a mut BoundsCache,
    pub(crate) surfaces: &'a mut dyn SurfaceFactory,
}

/// Children walk state shared by a symbol and its mask groups.
struct GroupCx<'s> {
    sym: &'s Symbol,
    active: &'s [u32],
    matrix: Affine,
    color: &'s ColorTransform,
    frame: u32,
    is_mask: bool,
}

impl<'s> GroupCx<'s> {
    fn child(&self, pos: usize) -> &'s ChildInstance {
        &self.sym.children()[self.active[pos] as usize]
    }
}

/// Pixel post-processing owed by an isolated instance before it lands in its parent.
struct Deferred<'c> {
    tint: ColorTransform,
    filters: &'c [Filter],
    blend: BlendMode,
    alpha: f64,
}

/// CPU rasterizer for symbol subtrees.
///
/// Vector and image leaves go through `vello_cpu`; masks, tints, filters and blends run as
/// kernels over premultiplied RGBA8 buffers obtained from a [`SurfaceFactory`].
#[derive(Default)]
pub(crate) struct Rasterizer {
    ctx: Option<vello_cpu::RenderContext>,
    images: HashMap<ElementId, vello_cpu::Image>,
}

impl std::fmt::Debug for Rasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rasterizer")
            .field("has_ctx", &self.ctx.is_some())
            .field("images", &self.images.len())
            .finish()
    }
}

impl Rasterizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rasterize `id` at `frame`, scaled by `ratio`, into a pixel-aligned buffer.
    ///
    /// Returns `None` when the element has no bounds at that frame.
    #[tracing::instrument(level = "debug", skip(self, env))]
    pub(crate) fn render_frame(
        &mut self,
        env: &mut RenderEnv<'_>,
        id: ElementId,
        frame: u32,
        ratio: f64,
    ) -> FlattenResult<Option<AtlasImage>> {
        let Some(area) = env.bounds.bounds_at_frame(env.graph, id, frame) else {
            return Ok(None);
        };
        self.render_frame_within(env, id, frame, ratio, area)
    }

    /// Same as [`Rasterizer::render_frame`], cropped to `area` (element space).
    pub(crate) fn render_frame_within(
        &mut self,
        env: &mut RenderEnv<'_>,
        id: ElementId,
        frame: u32,
        ratio: f64,
        area: Rect,
    ) -> FlattenResult<Option<AtlasImage>> {
        let graph = env.graph;
        let Some(element) = graph.get(id) else {
            tracing::warn!(%id, "render requested for a missing element");
            return Ok(None);
        };
        self.render_area(env, area, ratio, |this, env, target, base| {
            this.draw_element(env, target, element, base, &ColorTransform::IDENTITY, frame, false)
        })
    }

    /// Rasterize a symbol that is not part of the graph, such as a run of children being merged.
    pub(crate) fn render_detached(
        &mut self,
        env: &mut RenderEnv<'_>,
        sym: &Symbol,
        frame: u32,
        ratio: f64,
    ) -> FlattenResult<Option<AtlasImage>> {
        let Some(area) = env.bounds.fold_children(env.graph, sym, frame) else {
            return Ok(None);
        };
        self.render_area(env, area, ratio, |this, env, target, base| {
            this.draw_symbol(env, target, sym, base, &ColorTransform::IDENTITY, frame, false)
        })
    }

    fn render_area(
        &mut self,
        env: &mut RenderEnv<'_>,
        area: Rect,
        ratio: f64,
        draw: impl FnOnce(&mut Self, &mut RenderEnv<'_>, &mut vello_cpu::Pixmap, Affine) -> FlattenResult<()>,
    ) -> FlattenResult<Option<AtlasImage>> {
        let scaled = Rect::new(area.x0 * ratio, area.y0 * ratio, area.x1 * ratio, area.y1 * ratio);
        let px = PixelRect::enclosing(scaled);
        if px.is_empty() {
            return Ok(None);
        }
        let (w, h) = surface_size(px.width(), px.height())?;
        let base = Affine::translate((-f64::from(px.left), -f64::from(px.top))) * Affine::scale(ratio);

        self.images.clear();
        let mut target = env.surfaces.acquire(w, h);
        let drawn = draw(self, env, &mut target, base);
        let data = target.data_as_u8_slice().to_vec();
        env.surfaces.release(target);
        drawn?;

        let image = RasterImage::from_premul(u32::from(w), u32::from(h), data)?;
        Ok(Some(AtlasImage {
            image,
            placement: Placement {
                x: f64::from(px.left) / ratio,
                y: f64::from(px.top) / ratio,
                width: f64::from(w) / ratio,
                height: f64::from(h) / ratio,
                source_x: 0,
                source_y: 0,
                source_width: u32::from(w),
                source_height: u32::from(h),
            },
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_element(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        element: &Element,
        matrix: Affine,
        color: &ColorTransform,
        frame: u32,
        is_mask: bool,
    ) -> FlattenResult<()> {
        match element {
            Element::Sprite(s) => self.draw_sprite(env, target, s, matrix, color.alpha_scale(), is_mask),
            Element::Symbol(s) => self.draw_symbol(env, target, s, matrix, color, frame, is_mask),
        }
    }

    /// Paint the children of `sym` active at `frame`, last-declared first.
    #[allow(clippy::too_many_arguments)]
    fn draw_symbol(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        sym: &Symbol,
        matrix: Affine,
        color: &ColorTransform,
        frame: u32,
        is_mask: bool,
    ) -> FlattenResult<()> {
        let frame = frame % sym.frame_count();
        let cx = GroupCx {
            sym,
            active: sym.active_at(frame),
            matrix,
            color,
            frame,
            is_mask,
        };
        let mut pos = cx.active.len();
        while pos > 0 {
            pos -= 1;
            let child = cx.child(pos);
            match child.mask {
                Some(MaskEdge::End) => {}
                Some(MaskEdge::Start) => pos = self.render_mask_group(env, target, &cx, pos)?,
                None => self.render_child(env, target, &cx, child, cx.is_mask)?,
            }
        }
        Ok(())
    }

    fn render_child(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        cx: &GroupCx<'_>,
        child: &ChildInstance,
        is_mask: bool,
    ) -> FlattenResult<()> {
        match child.span.local(cx.frame) {
            Some(local) => self.render_instance(env, target, cx.matrix, cx.color, child, local, is_mask),
            None => Ok(()),
        }
    }

    /// Render the group opened at `start` and return the position of its closing edge.
    fn render_mask_group(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        cx: &GroupCx<'_>,
        start: usize,
    ) -> FlattenResult<usize> {
        let (w, h) = (target.width(), target.height());
        let mut mask = env.surfaces.acquire(w, h);
        let mut clip = env.surfaces.acquire(w, h);
        let out = self.mask_group_into(env, target, &mut mask, &mut clip, cx, start);
        env.surfaces.release(mask);
        env.surfaces.release(clip);
        out
    }

    fn mask_group_into(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        mask: &mut vello_cpu::Pixmap,
        clip: &mut vello_cpu::Pixmap,
        cx: &GroupCx<'_>,
        start: usize,
    ) -> FlattenResult<usize> {
        self.render_child(env, mask, cx, cx.child(start), true)?;

        // The masked layer starts from the parent backdrop so blends inside the group see it.
        clip.data_as_u8_slice_mut()
            .copy_from_slice(target.data_as_u8_slice());
        let mut pos = start;
        while pos > 0 {
            pos -= 1;
            let child = cx.child(pos);
            match child.mask {
                Some(MaskEdge::End) => break,
                Some(MaskEdge::Start) => pos = self.render_mask_group(env, clip, cx, pos)?,
                None => self.render_child(env, clip, cx, child, cx.is_mask)?,
            }
        }

        destination_in(clip.data_as_u8_slice_mut(), mask.data_as_u8_slice())?;
        replace_under_mask(
            target.data_as_u8_slice_mut(),
            clip.data_as_u8_slice(),
            mask.data_as_u8_slice(),
        )?;
        Ok(pos)
    }

    /// Render one child instance at its local frame index `local`.
    #[allow(clippy::too_many_arguments)]
    fn render_instance(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        parent_transform: Affine,
        parent_color: &ColorTransform,
        child: &ChildInstance,
        local: usize,
        is_mask: bool,
    ) -> FlattenResult<()> {
        let graph = env.graph;
        let Some(element) = graph.get(child.target) else {
            tracing::warn!(target_id = %child.target, "child references a missing element");
            return Ok(());
        };
        let own = child.color_at(local);
        let filters = child.filters_at(local);
        let blend = child.blend_at(local);
        let matrix = multiply_transforms(parent_transform, child.transform_at(local));
        let color = multiply_colors(parent_color, &own);
        let frame = local as u32;

        if !own.has_tint() && filters.is_empty() && !blend.needs_isolation() {
            return self.draw_element(env, target, element, matrix, &color, frame, is_mask);
        }

        // Alpha is lifted out and applied when the isolated layer is composited.
        let deferred = Deferred {
            tint: own,
            filters,
            blend,
            alpha: color.alpha_scale(),
        };
        let (w, h) = (target.width(), target.height());
        let mut layer = env.surfaces.acquire(w, h);
        let out = self
            .draw_element(env, &mut layer, element, matrix, &color.without_alpha(), frame, is_mask)
            .and_then(|()| {
                match env.bounds.bounds_at_frame(graph, child.target, frame) {
                    Some(bounds) => post_process(
                        target,
                        &mut layer,
                        PixelRect::enclosing(transform_bound(matrix, bounds)),
                        &deferred,
                    ),
                    None => Ok(()),
                }
            });
        env.surfaces.release(layer);
        out
    }

    fn draw_sprite(
        &mut self,
        env: &mut RenderEnv<'_>,
        target: &mut vello_cpu::Pixmap,
        sprite: &Sprite,
        matrix: Affine,
        alpha: f64,
        is_mask: bool,
    ) -> FlattenResult<()> {
        let alpha = if is_mask { 1.0 } else { alpha.clamp(0.0, 1.0) };
        if alpha <= 0.0 {
            return Ok(());
        }
        let paint = match &sprite.drawable {
            Drawable::Image(img) if !is_mask => Some(self.image_paint_for(sprite.id, img)?),
            _ => None,
        };

        let (w, h) = (target.width(), target.height());
        let mut tmp = env.surfaces.acquire(w, h);
        self.with_ctx_mut(w, h, |ctx| {
            ctx.set_blend_mode(vello_cpu::peniko::BlendMode::default());
            ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
            ctx.set_transform(affine_to_cpu(matrix));
            match (&sprite.drawable, paint) {
                (Drawable::Shapes(shapes), _) => {
                    for shape in shapes {
                        let [r, g, b, a] = if is_mask { [255; 4] } else { shape.color };
                        let a = (f64::from(a) * alpha).round().clamp(0.0, 255.0) as u8;
                        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
                        ctx.fill_path(&bezpath_to_cpu(&shape.path));
                    }
                }
                (Drawable::Image(img), Some(paint)) => {
                    let b = sprite.bounds;
                    let fit = Affine::translate((b.x0, b.y0))
                        * Affine::scale_non_uniform(
                            b.width() / f64::from(img.width.max(1)),
                            b.height() / f64::from(img.height.max(1)),
                        );
                    ctx.set_transform(affine_to_cpu(matrix * fit));
                    ctx.set_paint(paint);
                    if alpha < 1.0 {
                        ctx.push_opacity_layer(alpha as f32);
                    }
                    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
                        0.0,
                        0.0,
                        f64::from(img.width),
                        f64::from(img.height),
                    ));
                    if alpha < 1.0 {
                        ctx.pop_layer();
                    }
                }
                (Drawable::Image(_), None) => {
                    // Masks only need coverage: an opaque rectangle over the image bounds.
                    let b = sprite.bounds;
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 255));
                    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(b.x0, b.y0, b.x1, b.y1));
                }
            }
            ctx.flush();
            ctx.render_to_pixmap(&mut tmp);
        });
        let out = premul_over_in_place_opacity(target.data_as_u8_slice_mut(), tmp.data_as_u8_slice(), 1.0);
        env.surfaces.release(tmp);
        out
    }

    fn with_ctx_mut<R>(
        &mut self,
        width: u16,
        height: u16,
        f: impl FnOnce(&mut vello_cpu::RenderContext) -> R,
    ) -> R {
        let mut ctx = match self.ctx.take() {
            Some(ctx) if ctx.width() == width && ctx.height() == height => ctx,
            _ => vello_cpu::RenderContext::new(width, height),
        };
        ctx.reset();
        let out = f(&mut ctx);
        self.ctx = Some(ctx);
        out
    }

    fn image_paint_for(&mut self, id: ElementId, img: &RasterImage) -> FlattenResult<vello_cpu::Image> {
        if let Some(p) = self.images.get(&id) {
            return Ok(p.clone());
        }
        let pixmap = pixmap_from_premul_bytes(&img.data, img.width, img.height)?;
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };
        self.images.insert(id, paint.clone());
        Ok(paint)
    }
}

/// Filters, then tint, then composite of an isolated layer into `target`.
fn post_process(
    target: &mut vello_cpu::Pixmap,
    layer: &mut vello_cpu::Pixmap,
    dim: PixelRect,
    deferred: &Deferred<'_>,
) -> FlattenResult<()> {
    let (w, h) = (u32::from(layer.width()), u32::from(layer.height()));
    let mut dim = dim;
    for filter in deferred.filters {
        dim = apply_filter(layer.data_as_u8_slice_mut(), w, h, dim, filter);
    }
    if deferred.tint.has_tint() {
        tint_region(layer.data_as_u8_slice_mut(), w, dim.clip_to(w, h), &deferred.tint);
    }
    let region = if deferred.blend.needs_isolation() && deferred.blend != BlendMode::Layer {
        dim.clip_to(w, h)
    } else {
        PixelRect {
            left: 0,
            top: 0,
            right: w as i32,
            bottom: h as i32,
        }
    };
    composite_blend(
        target.data_as_u8_slice_mut(),
        layer.data_as_u8_slice(),
        w,
        region,
        deferred.alpha as f32,
        deferred.blend,
    )
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let pt = |p: kurbo::Point| vello_cpu::kurbo::Point::new(p.x, p.y);
    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(pt(p)),
            PathEl::LineTo(p) => out.line_to(pt(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(pt(p1), pt(p2)),
            PathEl::CurveTo(p1, p2, p3) => out.curve_to(pt(p1), pt(p2), pt(p3)),
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn pixmap_from_premul_bytes(bytes: &[u8], width: u32, height: u32) -> FlattenResult<vello_cpu::Pixmap> {
    let (w, h) = surface_size(width, height)?;
    if bytes.len() != (width as usize).saturating_mul(height as usize).saturating_mul(4) {
        return Err(FlattenError::render("image byte length mismatch"));
    }
    let pixels = bytes
        .chunks_exact(4)
        .map(|px| vello_cpu::peniko::color::PremulRgba8::from_u8_array([px[0], px[1], px[2], px[3]]))
        .collect();
    Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, true))
}

#[cfg(test)]
#[path = "../../tests/unit/render/rasterizer.rs"]
mod tests;
