use crate::foundation::error::{FlattenError, FlattenResult};

pub use kurbo::{Affine, BezPath, Point, Rect, Vec2};

/// Identifier of a Symbol or Sprite in the scene graph.
///
/// Ids coming from the parser are preserved; synthesized elements get ids past the prior maximum.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ElementId(pub u32);

impl ElementId {
    /// Id of the root timeline.
    pub const ROOT: Self = Self(0);

    /// Next id in allocation order.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inclusive frame range `[first, last]` of a child instance in its parent's timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameSpan {
    /// First frame (inclusive).
    pub first: u32,
    /// Last frame (inclusive).
    pub last: u32,
}

impl FrameSpan {
    /// Create a validated span with `first <= last`.
    pub fn new(first: u32, last: u32) -> FlattenResult<Self> {
        if first > last {
            return Err(FlattenError::validation(format!(
                "frame span first ({first}) must be <= last ({last})"
            )));
        }
        Ok(Self { first, last })
    }

    /// Span covering a single frame.
    pub fn single(frame: u32) -> Self {
        Self {
            first: frame,
            last: frame,
        }
    }

    /// Number of frames contained in the span.
    pub fn len_frames(self) -> usize {
        (self.last - self.first) as usize + 1
    }

    /// Return `true` when `frame` is inside the span.
    pub fn contains(self, frame: u32) -> bool {
        self.first <= frame && frame <= self.last
    }

    /// Return `true` when the two spans share at least one frame.
    pub fn overlaps(self, other: Self) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    /// Index into per-frame arrays for an absolute parent frame, if inside the span.
    pub fn local(self, frame: u32) -> Option<usize> {
        self.contains(frame).then(|| (frame - self.first) as usize)
    }

    /// Shift both bounds down by `delta` frames.
    pub fn rebased(self, delta: u32) -> Self {
        Self {
            first: self.first.saturating_sub(delta),
            last: self.last.saturating_sub(delta),
        }
    }
}

/// Integer pixel rectangle `[left, right) x [top, bottom)` in buffer space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRect {
    /// Left edge (inclusive).
    pub left: i32,
    /// Top edge (inclusive).
    pub top: i32,
    /// Right edge (exclusive).
    pub right: i32,
    /// Bottom edge (exclusive).
    pub bottom: i32,
}

impl PixelRect {
    /// Smallest pixel rectangle enclosing `rect`.
    pub fn enclosing(rect: Rect) -> Self {
        Self {
            left: rect.x0.floor() as i32,
            top: rect.y0.floor() as i32,
            right: rect.x1.ceil() as i32,
            bottom: rect.y1.ceil() as i32,
        }
    }

    /// Width in pixels (0 for inverted rectangles).
    pub fn width(self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    /// Height in pixels (0 for inverted rectangles).
    pub fn height(self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    /// Return `true` when the rectangle covers no pixel.
    pub fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersect with a `width x height` buffer.
    pub fn clip_to(self, width: u32, height: u32) -> Self {
        Self {
            left: self.left.clamp(0, width as i32),
            top: self.top.clamp(0, height as i32),
            right: self.right.clamp(0, width as i32),
            bottom: self.bottom.clamp(0, height as i32),
        }
    }

    /// Smallest rectangle containing both.
    pub fn union(self, other: Self) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
