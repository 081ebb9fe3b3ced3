use std::ops::Range;

use crate::foundation::core::PixelRect;
use crate::foundation::error::{FlattenError, FlattenResult};
use crate::foundation::math::{add_sat_u8, mul_div255_u8, premultiply, unpremultiply};
use crate::geometry::algebra::ColorTransform;
use crate::scene::model::BlendMode;

fn check_same_len(dst: &[u8], src: &[u8], op: &str) -> FlattenResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(FlattenError::render(format!(
            "{op} expects equal-length rgba8 buffers"
        )));
    }
    Ok(())
}

/// Byte ranges of each row of `region` in a `width`-pixel wide RGBA8 buffer.
pub(crate) fn region_rows(width: u32, region: PixelRect) -> impl Iterator<Item = Range<usize>> {
    let stride = width as usize * 4;
    let x0 = region.left.max(0) as usize * 4;
    let x1 = region.right.max(region.left).max(0) as usize * 4;
    (region.top.max(0)..region.bottom.max(region.top)).map(move |y| {
        let row = y as usize * stride;
        row + x0..row + x1
    })
}

/// Premultiplied source-over of `src` onto `dst`, with `src` scaled by `opacity`.
pub(crate) fn premul_over_in_place_opacity(
    dst: &mut [u8],
    src: &[u8],
    opacity: f32,
) -> FlattenResult<()> {
    check_same_len(dst, src, "premul_over_in_place_opacity")?;
    let op = ((opacity.clamp(0.0, 1.0) * 255.0).round() as i32).clamp(0, 255) as u16;
    if op == 0 {
        return Ok(());
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let sa = mul_div255_u8(u16::from(s[3]), op);
        if sa == 0 {
            continue;
        }
        let inv = 255u16 - u16::from(sa);

        d[3] = add_sat_u8(sa, mul_div255_u8(u16::from(d[3]), inv));
        for c in 0..3 {
            let sc = mul_div255_u8(u16::from(s[c]), op);
            let dc = mul_div255_u8(u16::from(d[c]), inv);
            d[c] = add_sat_u8(sc, dc);
        }
    }
    Ok(())
}

/// Keep `dst` only where `mask` covers: every channel scaled by the mask alpha.
pub(crate) fn destination_in(dst: &mut [u8], mask: &[u8]) -> FlattenResult<()> {
    check_same_len(dst, mask, "destination_in")?;
    for (d, m) in dst.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        let w = u16::from(m[3]);
        for c in d.iter_mut() {
            *c = mul_div255_u8(u16::from(*c), w);
        }
    }
    Ok(())
}

/// Replace `dst` by `masked` where `mask` covers: `dst = masked + dst * (1 - mask alpha)`.
///
/// `masked` must already be clipped by `mask` (see [`destination_in`]).
pub(crate) fn replace_under_mask(dst: &mut [u8], masked: &[u8], mask: &[u8]) -> FlattenResult<()> {
    check_same_len(dst, masked, "replace_under_mask")?;
    check_same_len(dst, mask, "replace_under_mask")?;
    for ((d, s), m) in dst
        .chunks_exact_mut(4)
        .zip(masked.chunks_exact(4))
        .zip(mask.chunks_exact(4))
    {
        let keep = 255u16 - u16::from(m[3]);
        for c in 0..4 {
            d[c] = add_sat_u8(s[c], mul_div255_u8(u16::from(d[c]), keep));
        }
    }
    Ok(())
}

/// Apply the RGB terms of `color` to every pixel of `region`.
pub(crate) fn tint_region(buf: &mut [u8], width: u32, region: PixelRect, color: &ColorTransform) {
    for row in region_rows(width, region) {
        for px in buf[row].chunks_exact_mut(4) {
            if px[3] == 0 {
                continue;
            }
            let s = unpremultiply([px[0], px[1], px[2], px[3]]);
            let [r, g, b] = color.apply_rgb([s[0], s[1], s[2]]);
            px.copy_from_slice(&premultiply([r, g, b, s[3]]));
        }
    }
}

/// Composite `src` onto `dst` over `region` with `mode`, scaled by `opacity`.
///
/// Both buffers are premultiplied RGBA8 of the same size. Pixels outside `region` are untouched.
pub(crate) fn composite_blend(
    dst: &mut [u8],
    src: &[u8],
    width: u32,
    region: PixelRect,
    opacity: f32,
    mode: BlendMode,
) -> FlattenResult<()> {
    check_same_len(dst, src, "composite_blend")?;
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return Ok(());
    }

    // Dispatch once per op; each branch monomorphizes its own row kernel.
    for row in region_rows(width, region) {
        let (d, s) = (&mut dst[row.clone()], &src[row]);
        match mode {
            BlendMode::Normal | BlendMode::Layer => premul_over_in_place_opacity(d, s, opacity)?,
            BlendMode::Multiply => blend_row(d, s, opacity, |s, d| s * d),
            BlendMode::Screen => blend_row(d, s, opacity, |s, d| s + d - s * d),
            BlendMode::Lighten => blend_row(d, s, opacity, |s, d| s.max(d)),
            BlendMode::Darken => blend_row(d, s, opacity, |s, d| s.min(d)),
            BlendMode::Difference => blend_row(d, s, opacity, |s, d| (d - s).abs()),
            BlendMode::Add => blend_row(d, s, opacity, |s, d| (s + d).min(1.0)),
            BlendMode::Subtract => blend_row(d, s, opacity, |s, d| (d - s).max(0.0)),
            BlendMode::Invert => blend_row(d, s, opacity, |_, d| 1.0 - d),
            BlendMode::Overlay => blend_row(d, s, opacity, |s, d| {
                if d <= 0.5 {
                    2.0 * s * d
                } else {
                    1.0 - 2.0 * (1.0 - s) * (1.0 - d)
                }
            }),
            BlendMode::HardLight => blend_row(d, s, opacity, |s, d| {
                if s <= 0.5 {
                    2.0 * s * d
                } else {
                    1.0 - 2.0 * (1.0 - s) * (1.0 - d)
                }
            }),
            BlendMode::Alpha => alpha_row(d, s, opacity, |sa| sa),
            BlendMode::Erase => alpha_row(d, s, opacity, |sa| 1.0 - sa),
        }
    }
    Ok(())
}

/// Porter-Duff source-over with the blend applied to unpremultiplied channels:
/// `out_a = sa + da * (1 - sa)`, `out_p = sp * (1 - da) + dp * (1 - sa) + B(sc, dc) * sa * da`.
#[inline(always)]
fn blend_row<F>(dst: &mut [u8], src: &[u8], opacity: f32, blend_fn: F)
where
    F: Fn(f32, f32) -> f32,
{
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let sa = (s[3] as f32 / 255.0) * opacity;
        if sa <= 0.0 {
            continue;
        }
        let da = d[3] as f32 / 255.0;
        let inv_sa = 1.0 - sa;
        let out_a = (sa + da * inv_sa).clamp(0.0, 1.0);

        let mut out = [0u8; 4];
        for c in 0..3 {
            let sp = (s[c] as f32 / 255.0) * opacity;
            let dp = d[c] as f32 / 255.0;
            let sc = (sp / sa).clamp(0.0, 1.0);
            let dc = if da > 0.0 { (dp / da).clamp(0.0, 1.0) } else { 0.0 };
            let b = blend_fn(sc, dc).clamp(0.0, 1.0);
            let p = (sp * (1.0 - da) + dp * inv_sa + b * sa * da).clamp(0.0, 1.0);
            out[c] = (p * 255.0).round() as u8;
        }
        out[3] = (out_a * 255.0).round() as u8;
        d.copy_from_slice(&out);
    }
}

/// Scale the destination (all channels, premultiplied) by `factor(source alpha)`, blended towards
/// identity by `opacity`.
#[inline(always)]
fn alpha_row<F>(dst: &mut [u8], src: &[u8], opacity: f32, factor: F)
where
    F: Fn(f32) -> f32,
{
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let sa = s[3] as f32 / 255.0;
        let k = 1.0 - opacity + opacity * factor(sa).clamp(0.0, 1.0);
        let w = (k * 255.0).round().clamp(0.0, 255.0) as u16;
        for c in d.iter_mut() {
            *c = mul_div255_u8(u16::from(*c), w);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/effects/composite.rs"]
mod tests;
