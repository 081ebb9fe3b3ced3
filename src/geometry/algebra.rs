use crate::foundation::core::{Affine, Rect};

/// Tolerance on the linear part of two transforms considered equivalent.
pub const LINEAR_TOLERANCE: f64 = 0.025;
/// Tolerance on the translation part of two transforms considered equivalent.
pub const TRANSLATE_TOLERANCE: f64 = 0.25;
/// Tolerance on each multiplier/additive term of two color transforms considered equivalent.
pub const COLOR_TOLERANCE: f64 = 0.025;

/// Per-channel color transform: `out = in * mult + add`, channels in RGBA order.
///
/// Additive terms are normalized (`1.0` adds full intensity). The alpha additive term is kept in
/// `[-1, 1]` by composition.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColorTransform {
    /// RGBA multipliers.
    pub mult: [f64; 4],
    /// RGBA additive terms.
    pub add: [f64; 4],
}

impl Default for ColorTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ColorTransform {
    /// Identity color transform.
    pub const IDENTITY: Self = Self {
        mult: [1.0; 4],
        add: [0.0; 4],
    };

    /// Build a color transform from multiplier and additive terms.
    pub fn new(mult: [f64; 4], add: [f64; 4]) -> Self {
        Self { mult, add }
    }

    /// Alpha-only transform.
    pub fn alpha(mult: f64) -> Self {
        Self {
            mult: [1.0, 1.0, 1.0, mult],
            add: [0.0; 4],
        }
    }

    /// Return `true` when every term equals the identity.
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Return `true` when the RGB channels are touched (the alpha terms are ignored).
    pub fn has_tint(&self) -> bool {
        self.mult[..3].iter().any(|&m| m != 1.0) || self.add[..3].iter().any(|&a| a != 0.0)
    }

    /// Composite alpha applied to an opaque source: `clamp(mult + add, 0, 1)`.
    pub fn alpha_scale(&self) -> f64 {
        (self.mult[3] + self.add[3]).clamp(0.0, 1.0)
    }

    /// Same transform with the alpha terms reset to identity.
    pub fn without_alpha(&self) -> Self {
        let mut out = *self;
        out.mult[3] = 1.0;
        out.add[3] = 0.0;
        out
    }

    /// Apply the RGB terms to straight `0..=255` channels.
    pub fn apply_rgb(&self, rgb: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for c in 0..3 {
            out[c] = (f64::from(rgb[c]) * self.mult[c] + self.add[c] * 255.0).clamp(0.0, 255.0)
                as f32;
        }
        out
    }

    /// Return `true` when every term is finite.
    pub fn is_finite(&self) -> bool {
        self.mult.iter().chain(self.add.iter()).all(|v| v.is_finite())
    }
}

/// Compose two affine transforms: `child` is applied first, then `parent`.
pub fn multiply_transforms(parent: Affine, child: Affine) -> Affine {
    parent * child
}

/// Algebraic inverse of an affine transform.
///
/// Singular transforms produce non-finite coefficients; callers treat those as "no match".
pub fn invert_transform(t: Affine) -> Affine {
    t.inverse()
}

/// Map a box through `t` by transforming its 4 corners and taking the enclosing box.
pub fn transform_bound(t: Affine, rect: Rect) -> Rect {
    t.transform_rect_bbox(rect)
}

/// Compose two color transforms: `child` is applied first, then `parent`.
pub fn multiply_colors(parent: &ColorTransform, child: &ColorTransform) -> ColorTransform {
    let mut out = ColorTransform::IDENTITY;
    for c in 0..4 {
        out.mult[c] = child.mult[c] * parent.mult[c];
        out.add[c] = child.add[c] * parent.mult[c] + parent.add[c];
    }
    out.add[3] = out.add[3].clamp(-1.0, 1.0);
    out
}

/// Algebraic inverse of a color transform.
///
/// A zero multiplier yields non-finite terms on that channel.
pub fn invert_color(c: &ColorTransform) -> ColorTransform {
    let mut out = ColorTransform::IDENTITY;
    for ch in 0..4 {
        out.mult[ch] = 1.0 / c.mult[ch];
        out.add[ch] = -c.add[ch] / c.mult[ch];
    }
    out
}

/// Copy of `inverse` where every non-finite channel takes the inverse of `observed` instead.
pub fn patch_inverse_color(inverse: &ColorTransform, observed: &ColorTransform) -> ColorTransform {
    let mut inv = *inverse;
    let fallback = invert_color(observed);
    for ch in 0..4 {
        if !inv.mult[ch].is_finite() || !inv.add[ch].is_finite() {
            inv.mult[ch] = fallback.mult[ch];
            inv.add[ch] = fallback.add[ch];
        }
    }
    inv
}

/// Return `true` when two transforms agree within the linear/translation tolerances.
pub fn transforms_equivalent(a: Affine, b: Affine) -> bool {
    let a = a.as_coeffs();
    let b = b.as_coeffs();
    (0..4).all(|i| (a[i] - b[i]).abs() <= LINEAR_TOLERANCE)
        && (4..6).all(|i| (a[i] - b[i]).abs() <= TRANSLATE_TOLERANCE)
}

/// Return `true` when two color transforms agree within tolerance.
///
/// Non-finite terms on either side compare equal.
pub fn colors_equivalent(a: &ColorTransform, b: &ColorTransform) -> bool {
    let close = |x: f64, y: f64| !x.is_finite() || !y.is_finite() || (x - y).abs() <= COLOR_TOLERANCE;
    (0..4).all(|c| close(a.mult[c], b.mult[c]) && close(a.add[c], b.add[c]))
}

/// Return `true` when the linear part of `t` is the identity (translation is ignored).
pub fn is_translation_only(t: Affine) -> bool {
    let [a, b, c, d, _, _] = t.as_coeffs();
    a == 1.0 && b == 0.0 && c == 0.0 && d == 1.0
}

#[cfg(test)]
#[path = "../../tests/unit/geometry/algebra.rs"]
mod tests;
