use kurbo::{BezPath, PathEl, Point, QuadBez, Rect};

use crate::foundation::core::ElementId;
use crate::foundation::error::FlattenResult;
use crate::scene::graph::{Drawable, Shape, Sprite};
use crate::scene::model::{MorphDef, Rgba8};
use crate::timeline::reconstruct::parse_shape;

/// Ratio value mapping to the end shapes.
pub(crate) const MORPH_RATIO_MAX: f64 = 65535.0;

/// Materialize a morph at `ratio` as a Sprite with id `id`.
pub(crate) fn morph_sprite(id: ElementId, def: &MorphDef, ratio: u16) -> FlattenResult<Sprite> {
    let t = f64::from(ratio) / MORPH_RATIO_MAX;
    if def.start.len() != def.end.len() {
        tracing::warn!(
            %id,
            start = def.start.len(),
            end = def.end.len(),
            "morph start/end shape counts differ; extra shapes are dropped"
        );
    }

    let mut shapes = Vec::with_capacity(def.start.len().min(def.end.len()));
    for (a, b) in def.start.iter().zip(def.end.iter()) {
        let a = parse_shape(a)?;
        let b = parse_shape(b)?;
        shapes.push(Shape {
            path: lerp_path(&a.path, &b.path, t),
            color: lerp_color(a.color, b.color, t),
        });
    }

    Ok(Sprite {
        id,
        drawable: Drawable::Shapes(shapes),
        bounds: lerp_rect(def.start_bounds, def.end_bounds, t),
        stable_name: None,
    })
}

fn lerp_rect(a: Rect, b: Rect, t: f64) -> Rect {
    Rect::new(
        lerp(a.x0, b.x0, t),
        lerp(a.y0, b.y0, t),
        lerp(a.x1, b.x1, t),
        lerp(a.y1, b.y1, t),
    )
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_color(a: Rgba8, b: Rgba8, t: f64) -> Rgba8 {
    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = lerp(f64::from(a[c]), f64::from(b[c]), t)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
    out
}

/// Drawing segment with its degree made explicit.
#[derive(Clone, Copy)]
enum Segment {
    Line(Point),
    Quad(Point, Point),
    Cubic(Point, Point, Point),
}

impl Segment {
    fn from_el(el: PathEl) -> Option<Self> {
        match el {
            PathEl::LineTo(p) => Some(Self::Line(p)),
            PathEl::QuadTo(c, p) => Some(Self::Quad(c, p)),
            PathEl::CurveTo(c1, c2, p) => Some(Self::Cubic(c1, c2, p)),
            PathEl::MoveTo(_) | PathEl::ClosePath => None,
        }
    }

    fn degree(self) -> u8 {
        match self {
            Self::Line(_) => 1,
            Self::Quad(..) => 2,
            Self::Cubic(..) => 3,
        }
    }

    /// Raise to `degree`, given the segment start point.
    fn raised(self, from: Point, degree: u8) -> Self {
        match (self, degree) {
            (Self::Line(p), 2) => Self::Quad(from.midpoint(p), p),
            (Self::Line(p), 3) => Self::Cubic(from.lerp(p, 1.0 / 3.0), from.lerp(p, 2.0 / 3.0), p),
            (Self::Quad(c, p), 3) => {
                let cubic = QuadBez::new(from, c, p).raise();
                Self::Cubic(cubic.p1, cubic.p2, cubic.p3)
            }
            (s, _) => s,
        }
    }

    fn lerp(self, other: Self, t: f64) -> PathEl {
        match (self, other) {
            (Self::Line(a), Self::Line(b)) => PathEl::LineTo(a.lerp(b, t)),
            (Self::Quad(ac, a), Self::Quad(bc, b)) => PathEl::QuadTo(ac.lerp(bc, t), a.lerp(b, t)),
            (Self::Cubic(a1, a2, a), Self::Cubic(b1, b2, b)) => {
                PathEl::CurveTo(a1.lerp(b1, t), a2.lerp(b2, t), a.lerp(b, t))
            }
            // Degrees are equalized by the caller.
            (s, _) => s.to_el(),
        }
    }

    fn to_el(self) -> PathEl {
        match self {
            Self::Line(p) => PathEl::LineTo(p),
            Self::Quad(c, p) => PathEl::QuadTo(c, p),
            Self::Cubic(c1, c2, p) => PathEl::CurveTo(c1, c2, p),
        }
    }
}

/// Interpolate two paths element by element.
///
/// Drawing segments of different degree are raised to the higher one (a line paired with a quad
/// gets its midpoint as control point). Structurally incompatible paths snap to the nearer end.
pub(crate) fn lerp_path(a: &BezPath, b: &BezPath, t: f64) -> BezPath {
    let ae = a.elements();
    let be = b.elements();
    if ae.len() != be.len() {
        return if t < 0.5 { a.clone() } else { b.clone() };
    }

    let mut out = BezPath::new();
    let (mut a_cur, mut b_cur) = (Point::ORIGIN, Point::ORIGIN);
    let (mut a_start, mut b_start) = (Point::ORIGIN, Point::ORIGIN);
    for (&ea, &eb) in ae.iter().zip(be.iter()) {
        match (ea, eb) {
            (PathEl::MoveTo(pa), PathEl::MoveTo(pb)) => {
                out.push(PathEl::MoveTo(pa.lerp(pb, t)));
                (a_cur, b_cur, a_start, b_start) = (pa, pb, pa, pb);
            }
            (PathEl::ClosePath, PathEl::ClosePath) => {
                out.push(PathEl::ClosePath);
                (a_cur, b_cur) = (a_start, b_start);
            }
            _ => match (Segment::from_el(ea), Segment::from_el(eb)) {
                (Some(sa), Some(sb)) => {
                    let d = sa.degree().max(sb.degree());
                    out.push(sa.raised(a_cur, d).lerp(sb.raised(b_cur, d), t));
                    a_cur = ea.end_point().unwrap_or(a_cur);
                    b_cur = eb.end_point().unwrap_or(b_cur);
                }
                _ => return if t < 0.5 { a.clone() } else { b.clone() },
            },
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/morph.rs"]
mod tests;
