use std::collections::BTreeMap;

use crate::foundation::core::{ElementId, Rect};
use crate::geometry::algebra::ColorTransform;

/// Straight (non-premultiplied) RGBA8 color.
pub type Rgba8 = [u8; 4];

/// Parsed scene handed over by the scene parser.
///
/// `elements` maps ids to descriptors; `names` is the root name table giving stable export names.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneDef {
    /// Element descriptors keyed by id.
    pub elements: BTreeMap<ElementId, ElementDef>,
    /// Stable export names. Named elements are never deleted or merged.
    #[serde(default)]
    pub names: BTreeMap<String, ElementId>,
}

impl SceneDef {
    /// Parse a scene from JSON text.
    pub fn from_json_str(s: &str) -> crate::FlattenResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// One element descriptor.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDef {
    /// Animated container.
    Symbol(SymbolDef),
    /// Static leaf.
    Sprite(SpriteDef),
    /// Shape interpolated between two keyframes by a placement ratio.
    Morph(MorphDef),
}

/// Symbol descriptor: frame count plus sparse display-list diffs.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SymbolDef {
    /// Number of frames in the symbol timeline.
    pub frame_count: u32,
    /// Diffs keyed by frame, then by depth. `null` removes the occupant of a depth.
    #[serde(default, deserialize_with = "deserialize_frame_diffs")]
    pub frames: FrameDiffs,
    /// Optional authored container bounds.
    #[serde(default)]
    pub container_bounds: Option<Rect>,
}

/// Frame or depth index written as a JSON object key.
///
/// Keys reach us as strings, including when the surrounding element has been buffered for its
/// `type` tag, so both numbers and numeric strings are accepted.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey(u32);

impl<'de> serde::Deserialize<'de> for IndexKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::Deserialize as _;

        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(Self(n)),
            Repr::Text(s) => s.trim().parse().map(Self).map_err(|_| {
                serde::de::Error::custom(format!("expected a frame or depth index, got {s:?}"))
            }),
        }
    }
}

/// Placement diffs keyed by frame, then by depth.
pub type FrameDiffs = BTreeMap<u32, BTreeMap<u32, Option<PlacementDef>>>;

fn deserialize_frame_diffs<'de, D>(deserializer: D) -> Result<FrameDiffs, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize as _;

    let raw = BTreeMap::<IndexKey, BTreeMap<IndexKey, Option<PlacementDef>>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(frame, depths)| {
            let depths = depths.into_iter().map(|(depth, p)| (depth.0, p)).collect();
            (frame.0, depths)
        })
        .collect())
}

/// One display-list entry.
///
/// With `id` set this is a full redefinition of the depth occupant; without it, a partial patch of
/// the previous occupant.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementDef {
    /// Referenced element.
    #[serde(default)]
    pub id: Option<ElementId>,
    /// Affine coefficients `[a, b, c, d, e, f]`.
    #[serde(default)]
    pub matrix: Option<[f64; 6]>,
    /// Color transform.
    #[serde(default)]
    pub color: Option<ColorTransform>,
    /// Filter list.
    #[serde(default)]
    pub filters: Option<Vec<Filter>>,
    /// Blend mode.
    #[serde(default)]
    pub blend_mode: Option<BlendMode>,
    /// Instance name. Named instances are never flattened.
    #[serde(default)]
    pub name: Option<String>,
    /// Last depth clipped by this occupant, turning it into a mask.
    #[serde(default)]
    pub clip_depth: Option<u32>,
    /// Morph ratio (`0..=65535`).
    #[serde(default)]
    pub ratio: Option<u16>,
}

/// Sprite descriptor: vector shapes or a straight RGBA image drawn into `bounds`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpriteDef {
    /// Local bounds.
    pub bounds: Rect,
    /// Solid-filled shapes in local coordinates.
    #[serde(default)]
    pub shapes: Vec<ShapeDef>,
    /// Raster image scaled into `bounds`.
    #[serde(default)]
    pub image: Option<ImageDef>,
}

/// One filled shape: SVG path data plus a straight RGBA fill.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeDef {
    /// SVG path data.
    pub path: String,
    /// Straight RGBA fill.
    pub color: Rgba8,
}

/// Decoded straight RGBA8 image.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDef {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major straight RGBA8 bytes.
    pub rgba: Vec<u8>,
}

/// Morph descriptor: start/end shape lists paired by index.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MorphDef {
    /// Shapes at ratio 0.
    pub start: Vec<ShapeDef>,
    /// Shapes at ratio 65535.
    pub end: Vec<ShapeDef>,
    /// Bounds at ratio 0.
    pub start_bounds: Rect,
    /// Bounds at ratio 65535.
    pub end_bounds: Rect,
}

/// Compositing mode of an instance into its parent.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Plain source-over.
    #[default]
    Normal,
    /// Isolated group, then source-over.
    Layer,
    /// `s * d`
    Multiply,
    /// `s + d - s * d`
    Screen,
    /// `max(s, d)`
    Lighten,
    /// `min(s, d)`
    Darken,
    /// `|d - s|`
    Difference,
    /// `min(s + d, 1)`
    Add,
    /// `max(d - s, 0)`
    Subtract,
    /// `1 - d` where the source covers.
    Invert,
    /// Destination alpha scaled by source alpha.
    Alpha,
    /// Destination alpha removed where the source covers.
    Erase,
    /// Multiply or screen depending on the destination.
    Overlay,
    /// Multiply or screen depending on the source.
    HardLight,
}

impl BlendMode {
    /// Map the numeric blend code used by the source format (`0`/`1` normal, `2..=14`).
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => Self::Layer,
            3 => Self::Multiply,
            4 => Self::Screen,
            5 => Self::Lighten,
            6 => Self::Darken,
            7 => Self::Difference,
            8 => Self::Add,
            9 => Self::Subtract,
            10 => Self::Invert,
            11 => Self::Alpha,
            12 => Self::Erase,
            13 => Self::Overlay,
            14 => Self::HardLight,
            _ => Self::Normal,
        }
    }

    /// Return `true` when the mode requires an isolated off-screen buffer.
    pub fn needs_isolation(self) -> bool {
        self != Self::Normal
    }
}

/// Blur filter parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlurFilter {
    /// Horizontal radius in pixels.
    pub blur_x: f32,
    /// Vertical radius in pixels.
    pub blur_y: f32,
    /// Number of box passes.
    #[serde(default = "one_pass")]
    pub passes: u32,
}

/// Glow and drop shadow parameters. A glow is a drop shadow with zero distance.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlowFilter {
    /// Straight RGBA glow color.
    pub color: Rgba8,
    /// Horizontal blur in pixels.
    pub blur_x: f32,
    /// Vertical blur in pixels.
    pub blur_y: f32,
    /// Alpha amplification.
    #[serde(default = "unit_strength")]
    pub strength: f32,
    /// Number of blur passes.
    #[serde(default = "one_pass")]
    pub passes: u32,
    /// Offset angle in radians.
    #[serde(default)]
    pub angle: f32,
    /// Offset distance in pixels.
    #[serde(default)]
    pub distance: f32,
    /// Glow inside the shape instead of around it.
    #[serde(default)]
    pub inner: bool,
    /// Hide the source, keeping only the glow.
    #[serde(default)]
    pub knockout: bool,
    /// Composite the source over the glow.
    #[serde(default = "enabled")]
    pub composite_source: bool,
}

/// Glow whose intensity is remapped through a color gradient.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientGlowFilter {
    /// Gradient stop colors.
    pub colors: Vec<Rgba8>,
    /// Gradient stop positions (`0..=255`), same length as `colors`.
    pub ratios: Vec<u8>,
    /// Horizontal blur in pixels.
    pub blur_x: f32,
    /// Vertical blur in pixels.
    pub blur_y: f32,
    /// Alpha amplification.
    #[serde(default = "unit_strength")]
    pub strength: f32,
    /// Number of blur passes.
    #[serde(default = "one_pass")]
    pub passes: u32,
    /// Offset angle in radians.
    #[serde(default)]
    pub angle: f32,
    /// Offset distance in pixels.
    #[serde(default)]
    pub distance: f32,
    /// Glow inside the shape instead of around it.
    #[serde(default)]
    pub inner: bool,
    /// Hide the source, keeping only the glow.
    #[serde(default)]
    pub knockout: bool,
}

/// Bevel parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BevelFilter {
    /// Straight RGBA shadow color.
    pub shadow_color: Rgba8,
    /// Straight RGBA highlight color.
    pub highlight_color: Rgba8,
    /// Horizontal blur in pixels.
    pub blur_x: f32,
    /// Vertical blur in pixels.
    pub blur_y: f32,
    /// Light angle in radians.
    #[serde(default)]
    pub angle: f32,
    /// Bevel distance in pixels.
    #[serde(default)]
    pub distance: f32,
    /// Contrast amplification.
    #[serde(default = "unit_strength")]
    pub strength: f32,
    /// Number of blur passes.
    #[serde(default = "one_pass")]
    pub passes: u32,
    /// Bevel inside the shape.
    #[serde(default)]
    pub inner: bool,
    /// Hide the source, keeping only the bevel.
    #[serde(default)]
    pub knockout: bool,
    /// Draw the bevel over the source.
    #[serde(default)]
    pub on_top: bool,
}

/// Pixel filter attached to an instance frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// 4x5 matrix over straight `0..=255` channels (offsets in the 5th column).
    ColorMatrix {
        /// Row-major coefficients.
        matrix: [f32; 20],
    },
    /// Multi-pass box blur.
    Blur(BlurFilter),
    /// Glow around or inside the shape.
    Glow(GlowFilter),
    /// Offset glow.
    DropShadow(GlowFilter),
    /// Glow remapped through a gradient.
    GradientGlow(GradientGlowFilter),
    /// Bevel highlight/shadow pair.
    Bevel(BevelFilter),
    /// Filter kind the rasterizer does not implement; skipped with a warning.
    Unsupported {
        /// Kind name as reported by the parser.
        name: String,
    },
}

impl Filter {
    /// How far the filter can extend painted content beyond the source, per axis.
    ///
    /// Blur-like filters pad by `blur * passes`; offset filters add their distance components.
    pub fn padding(&self) -> (f64, f64) {
        fn blur_pad(bx: f32, by: f32, passes: u32) -> (f64, f64) {
            let p = f64::from(passes.max(1));
            (f64::from(bx.max(0.0)) * p, f64::from(by.max(0.0)) * p)
        }
        fn offset(angle: f32, distance: f32) -> (f64, f64) {
            let (s, c) = f64::from(angle).sin_cos();
            let d = f64::from(distance);
            ((c * d).abs().ceil(), (s * d).abs().ceil())
        }
        match self {
            Self::ColorMatrix { .. } | Self::Unsupported { .. } => (0.0, 0.0),
            Self::Blur(b) => blur_pad(b.blur_x, b.blur_y, b.passes),
            Self::Glow(g) | Self::DropShadow(g) => {
                let (px, py) = blur_pad(g.blur_x, g.blur_y, g.passes);
                let (ox, oy) = offset(g.angle, g.distance);
                (px + ox, py + oy)
            }
            Self::GradientGlow(g) => {
                let (px, py) = blur_pad(g.blur_x, g.blur_y, g.passes);
                let (ox, oy) = offset(g.angle, g.distance);
                (px + ox, py + oy)
            }
            Self::Bevel(b) => {
                let (px, py) = blur_pad(b.blur_x, b.blur_y, b.passes);
                let (ox, oy) = offset(b.angle, b.distance);
                (px + ox, py + oy)
            }
        }
    }
}

fn one_pass() -> u32 {
    1
}

fn unit_strength() -> f32 {
    1.0
}

fn enabled() -> bool {
    true
}

#[cfg(test)]
#[path = "../../tests/unit/scene/model.rs"]
mod tests;
