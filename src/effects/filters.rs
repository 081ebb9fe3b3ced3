use crate::foundation::core::PixelRect;
use crate::foundation::math::{premultiply, unpremultiply};
use crate::scene::model::{BevelFilter, BlurFilter, Filter, GlowFilter, GradientGlowFilter, Rgba8};

/// Straight-alpha copy of a buffer region, channels in `0..=255`.
struct StraightRegion {
    rect: PixelRect,
    w: usize,
    h: usize,
    px: Vec<[f32; 4]>,
}

impl StraightRegion {
    fn read(buf: &[u8], width: u32, rect: PixelRect) -> Self {
        let w = rect.width() as usize;
        let h = rect.height() as usize;
        let mut px = Vec::with_capacity(w * h);
        for y in rect.top..rect.bottom {
            let row = (y as usize * width as usize + rect.left as usize) * 4;
            for p in buf[row..row + w * 4].chunks_exact(4) {
                px.push(unpremultiply([p[0], p[1], p[2], p[3]]));
            }
        }
        Self { rect, w, h, px }
    }

    fn write(&self, buf: &mut [u8], width: u32) {
        for (j, y) in (self.rect.top..self.rect.bottom).enumerate() {
            let row = (y as usize * width as usize + self.rect.left as usize) * 4;
            let src = &self.px[j * self.w..(j + 1) * self.w];
            for (d, s) in buf[row..row + self.w * 4].chunks_exact_mut(4).zip(src) {
                d.copy_from_slice(&premultiply(*s));
            }
        }
    }

    fn alpha_at(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.w as i64 || y >= self.h as i64 {
            return 0.0;
        }
        self.px[y as usize * self.w + x as usize][3]
    }
}

/// Apply `filter` to the premultiplied RGBA8 buffer around `dim` and return the grown dirty area.
///
/// `dim` is in buffer pixels and may extend past the buffer; work is clipped to the buffer.
pub(crate) fn apply_filter(
    buf: &mut [u8],
    width: u32,
    height: u32,
    dim: PixelRect,
    filter: &Filter,
) -> PixelRect {
    match filter {
        Filter::ColorMatrix { matrix } => {
            color_matrix(buf, width, dim.clip_to(width, height), matrix);
            dim
        }
        Filter::Blur(b) => blur(buf, width, height, dim, b),
        Filter::Glow(g) | Filter::DropShadow(g) => glow(buf, width, height, dim, &GlowSpec::from(g)),
        Filter::GradientGlow(g) => glow(buf, width, height, dim, &GlowSpec::from(g)),
        Filter::Bevel(b) => bevel(buf, width, height, dim, b),
        Filter::Unsupported { name } => {
            tracing::warn!(filter = %name, "unsupported filter skipped");
            dim
        }
    }
}

fn color_matrix(buf: &mut [u8], width: u32, rect: PixelRect, m: &[f32; 20]) {
    if rect.is_empty() {
        return;
    }
    let mut region = StraightRegion::read(buf, width, rect);
    for p in &mut region.px {
        let [r, g, b, a] = *p;
        let mut out = [0.0f32; 4];
        for (row, o) in out.iter_mut().enumerate() {
            let k = &m[row * 5..row * 5 + 5];
            *o = (k[0] * r + k[1] * g + k[2] * b + k[3] * a + k[4]).clamp(0.0, 255.0);
        }
        *p = out;
    }
    region.write(buf, width);
}

fn grow(dim: PixelRect, left: i32, top: i32, right: i32, bottom: i32) -> PixelRect {
    PixelRect {
        left: dim.left - left,
        top: dim.top - top,
        right: dim.right + right,
        bottom: dim.bottom + bottom,
    }
}

fn radius(blur: f32) -> usize {
    blur.max(0.0).round() as usize
}

fn blur(buf: &mut [u8], width: u32, height: u32, dim: PixelRect, f: &BlurFilter) -> PixelRect {
    let (rx, ry) = (radius(f.blur_x), radius(f.blur_y));
    let passes = f.passes.max(1) as usize;
    let (gx, gy) = ((rx * passes) as i32, (ry * passes) as i32);
    let area = grow(dim, gx, gy, gx, gy);
    let rect = area.clip_to(width, height);
    if rect.is_empty() || (rx == 0 && ry == 0) {
        return dim;
    }

    let mut region = StraightRegion::read(buf, width, rect);
    let mut scratch = vec![[0.0f32; 4]; region.px.len()];
    for _ in 0..passes {
        if rx > 0 {
            box_blur_rgba(&region.px, &mut scratch, region.w, region.h, rx, Axis::X);
            std::mem::swap(&mut region.px, &mut scratch);
        }
        if ry > 0 {
            box_blur_rgba(&region.px, &mut scratch, region.w, region.h, ry, Axis::Y);
            std::mem::swap(&mut region.px, &mut scratch);
        }
    }
    region.write(buf, width);
    dim.union(area)
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Pixel index of the `k`-th sample along `line` for `axis`.
fn line_index(axis: Axis, w: usize, line: usize, k: usize) -> usize {
    match axis {
        Axis::X => line * w + k,
        Axis::Y => k * w + line,
    }
}

fn line_shape(axis: Axis, w: usize, h: usize) -> (usize, usize) {
    match axis {
        Axis::X => (h, w),
        Axis::Y => (w, h),
    }
}

/// One running-sum box pass of radius `r` (window `2r + 1`) with alpha-weighted color.
fn box_blur_rgba(src: &[[f32; 4]], dst: &mut [[f32; 4]], w: usize, h: usize, r: usize, axis: Axis) {
    let (lines, n) = line_shape(axis, w, h);
    let window = (2 * r + 1) as f32;
    for line in 0..lines {
        let at = |k: usize| line_index(axis, w, line, k);
        let mut sum = [0.0f32; 4];
        let add = |sum: &mut [f32; 4], p: [f32; 4], sign: f32| {
            sum[0] += sign * p[0] * p[3];
            sum[1] += sign * p[1] * p[3];
            sum[2] += sign * p[2] * p[3];
            sum[3] += sign * p[3];
        };
        for k in 0..=r.min(n - 1) {
            add(&mut sum, src[at(k)], 1.0);
        }
        for i in 0..n {
            let a = sum[3].max(0.0);
            dst[at(i)] = if a > 0.0 {
                [
                    (sum[0] / a).clamp(0.0, 255.0),
                    (sum[1] / a).clamp(0.0, 255.0),
                    (sum[2] / a).clamp(0.0, 255.0),
                    (a / window).clamp(0.0, 255.0),
                ]
            } else {
                [0.0; 4]
            };
            if i + r + 1 < n {
                add(&mut sum, src[at(i + r + 1)], 1.0);
            }
            if i >= r {
                add(&mut sum, src[at(i - r)], -1.0);
            }
        }
    }
}

/// Running-sum box pass over a single channel.
fn box_blur_plane(src: &[f32], dst: &mut [f32], w: usize, h: usize, r: usize, axis: Axis) {
    let (lines, n) = line_shape(axis, w, h);
    let window = (2 * r + 1) as f32;
    for line in 0..lines {
        let at = |k: usize| line_index(axis, w, line, k);
        let mut sum = 0.0f32;
        for k in 0..=r.min(n - 1) {
            sum += src[at(k)];
        }
        for i in 0..n {
            dst[at(i)] = (sum / window).clamp(0.0, 255.0);
            if i + r + 1 < n {
                sum += src[at(i + r + 1)];
            }
            if i >= r {
                sum -= src[at(i - r)];
            }
        }
    }
}

fn blur_plane_passes(plane: &mut Vec<f32>, w: usize, h: usize, rx: usize, ry: usize, passes: usize) {
    let mut scratch = vec![0.0f32; plane.len()];
    for _ in 0..passes {
        if rx > 0 {
            box_blur_plane(plane, &mut scratch, w, h, rx, Axis::X);
            std::mem::swap(plane, &mut scratch);
        }
        if ry > 0 {
            box_blur_plane(plane, &mut scratch, w, h, ry, Axis::Y);
            std::mem::swap(plane, &mut scratch);
        }
    }
}

/// Parameters shared by glow, drop shadow and gradient glow.
struct GlowSpec<'a> {
    color: Rgba8,
    gradient: Option<(&'a [Rgba8], &'a [u8])>,
    blur_x: f32,
    blur_y: f32,
    strength: f32,
    passes: u32,
    angle: f32,
    distance: f32,
    inner: bool,
    knockout: bool,
    hide_source: bool,
}

impl<'a> From<&'a GlowFilter> for GlowSpec<'a> {
    fn from(g: &'a GlowFilter) -> Self {
        Self {
            color: g.color,
            gradient: None,
            blur_x: g.blur_x,
            blur_y: g.blur_y,
            strength: g.strength,
            passes: g.passes,
            angle: g.angle,
            distance: g.distance,
            inner: g.inner,
            knockout: g.knockout,
            hide_source: !g.composite_source,
        }
    }
}

impl<'a> From<&'a GradientGlowFilter> for GlowSpec<'a> {
    fn from(g: &'a GradientGlowFilter) -> Self {
        Self {
            color: [255, 255, 255, 255],
            gradient: Some((&g.colors, &g.ratios)),
            blur_x: g.blur_x,
            blur_y: g.blur_y,
            strength: g.strength,
            passes: g.passes,
            angle: g.angle,
            distance: g.distance,
            inner: g.inner,
            knockout: g.knockout,
            hide_source: false,
        }
    }
}

fn offset(angle: f32, distance: f32, round: fn(f32) -> f32) -> (i32, i32) {
    let (s, c) = angle.sin_cos();
    (round(c * distance) as i32, round(s * distance) as i32)
}

/// Where the effect layer goes relative to the source.
#[derive(Clone, Copy)]
enum Placement {
    Inner,
    OnTop,
    Under { hide_source: bool },
}

fn combine(effect: [f32; 4], src: [f32; 4], placement: Placement, knockout: bool) -> [f32; 4] {
    let sa = src[3] / 255.0;
    match (placement, knockout) {
        (Placement::Inner, true) => [effect[0], effect[1], effect[2], effect[3] * sa],
        (Placement::Inner, false) => atop(effect, src),
        (Placement::OnTop, true) => effect,
        (Placement::OnTop, false) => over(effect, src),
        (Placement::Under { .. }, true) => [effect[0], effect[1], effect[2], effect[3] * (1.0 - sa)],
        (Placement::Under { hide_source: true }, false) => effect,
        (Placement::Under { hide_source: false }, false) => over(src, effect),
    }
}

fn over(top: [f32; 4], bottom: [f32; 4]) -> [f32; 4] {
    let ta = top[3] / 255.0;
    let ba = bottom[3] / 255.0;
    let oa = ta + ba * (1.0 - ta);
    if oa <= 0.0 {
        return [0.0; 4];
    }
    let mut out = [0.0; 4];
    for c in 0..3 {
        out[c] = (top[c] * ta + bottom[c] * ba * (1.0 - ta)) / oa;
    }
    out[3] = oa * 255.0;
    out
}

fn atop(top: [f32; 4], bottom: [f32; 4]) -> [f32; 4] {
    let ta = top[3] / 255.0;
    let mut out = [0.0; 4];
    for c in 0..3 {
        out[c] = top[c] * ta + bottom[c] * (1.0 - ta);
    }
    out[3] = bottom[3];
    out
}

fn glow(buf: &mut [u8], width: u32, height: u32, dim: PixelRect, g: &GlowSpec<'_>) -> PixelRect {
    let (dx, dy) = offset(g.angle, g.distance, f32::round);
    let passes = g.passes.max(1) as usize;
    let (rx, ry) = (radius(g.blur_x), radius(g.blur_y));
    let (gx, gy) = ((rx * passes) as i32, (ry * passes) as i32);
    let area = grow(
        dim,
        gx - dx.min(0),
        gy - dy.min(0),
        gx + dx.max(0),
        gy + dy.max(0),
    );
    let rect = area.clip_to(width, height);
    if rect.is_empty() {
        return dim;
    }

    let mut region = StraightRegion::read(buf, width, rect);
    let (w, h) = (region.w, region.h);
    let mut plane = Vec::with_capacity(w * h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let a = region.alpha_at(x - i64::from(dx), y - i64::from(dy));
            plane.push(if g.inner { 255.0 - a } else { a });
        }
    }
    blur_plane_passes(&mut plane, w, h, rx / 2, ry / 2, passes);

    let lut = g.gradient.map(|(colors, ratios)| gradient_lut(colors, ratios));
    let ca = f32::from(g.color[3]) / 255.0;
    let placement = if g.inner {
        Placement::Inner
    } else {
        Placement::Under {
            hide_source: g.hide_source,
        }
    };
    for (p, &a) in region.px.iter_mut().zip(plane.iter()) {
        let level = (g.strength * a).floor().clamp(0.0, 255.0);
        let effect = match &lut {
            Some(lut) => lut[level as usize],
            None => [
                f32::from(g.color[0]),
                f32::from(g.color[1]),
                f32::from(g.color[2]),
                ca * level,
            ],
        };
        *p = combine(effect, *p, placement, g.knockout);
    }
    region.write(buf, width);
    dim.union(area)
}

fn bevel(buf: &mut [u8], width: u32, height: u32, dim: PixelRect, b: &BevelFilter) -> PixelRect {
    let (ox, oy) = offset(b.angle, b.distance, f32::ceil);
    let passes = b.passes.max(1) as usize;
    let (rx, ry) = (radius(b.blur_x), radius(b.blur_y));
    let (gx, gy) = (
        (rx * passes) as i32 + ox.abs(),
        (ry * passes) as i32 + oy.abs(),
    );
    let area = grow(dim, gx, gy, gx, gy);
    let rect = area.clip_to(width, height);
    if rect.is_empty() {
        return dim;
    }

    let mut region = StraightRegion::read(buf, width, rect);
    let (w, h) = (region.w, region.h);
    let mut plane: Vec<f32> = region.px.iter().map(|p| p[3]).collect();
    blur_plane_passes(&mut plane, w, h, rx / 2, ry / 2, passes);
    let sample = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0.0
        } else {
            plane[y as usize * w + x as usize]
        }
    };

    let half = 127.5f32;
    let placement = if b.inner {
        Placement::Inner
    } else if b.on_top {
        Placement::OnTop
    } else {
        Placement::Under { hide_source: false }
    };
    let (ox, oy) = (i64::from(ox), i64::from(oy));
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let lit = sample(x - ox, y - oy);
            let shaded = sample(x + ox, y + oy);
            let v = (lit - shaded) * b.strength + half;
            let (color, amount) = if v > half {
                (b.highlight_color, v - half)
            } else {
                (b.shadow_color, half - v)
            };
            let effect = [
                f32::from(color[0]),
                f32::from(color[1]),
                f32::from(color[2]),
                (f32::from(color[3]) / 255.0 * amount * 2.0).clamp(0.0, 255.0),
            ];
            let i = y as usize * w + x as usize;
            region.px[i] = combine(effect, region.px[i], placement, b.knockout);
        }
    }
    region.write(buf, width);
    dim.union(area)
}

/// 256-entry straight RGBA lookup interpolated between gradient stops.
fn gradient_lut(colors: &[Rgba8], ratios: &[u8]) -> Vec<[f32; 4]> {
    let n = colors.len().min(ratios.len());
    let stop = |k: usize| -> [f32; 4] {
        let c = colors[k];
        [
            f32::from(c[0]),
            f32::from(c[1]),
            f32::from(c[2]),
            f32::from(c[3]),
        ]
    };
    (0..256usize)
        .map(|i| {
            if n == 0 {
                return [0.0; 4];
            }
            let pos = i as u8;
            if pos <= ratios[0] {
                return stop(0);
            }
            for k in 1..n {
                if pos <= ratios[k] {
                    let (r0, r1) = (f32::from(ratios[k - 1]), f32::from(ratios[k]));
                    let t = if r1 > r0 {
                        (f32::from(pos) - r0) / (r1 - r0)
                    } else {
                        1.0
                    };
                    let (a, b) = (stop(k - 1), stop(k));
                    return [
                        a[0] + (b[0] - a[0]) * t,
                        a[1] + (b[1] - a[1]) * t,
                        a[2] + (b[2] - a[2]) * t,
                        a[3] + (b[3] - a[3]) * t,
                    ];
                }
            }
            stop(n - 1)
        })
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/effects/filters.rs"]
mod tests;
