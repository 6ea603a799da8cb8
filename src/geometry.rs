//! Integer rectangles in device space.
//!
//! A [`RectInt`] describes a pixel-aligned area by its top-left corner `(x, y)`
//! and its `width`/`height`. It is used for surface extents, mapped image
//! regions and damage.
//!
//! # Examples
//!
//! ```
//! use gosub_surface::geometry::RectInt;
//!
//! let a = RectInt::new(0, 0, 4, 4);
//! let b = RectInt::new(2, 2, 4, 4);
//! assert_eq!(a.intersect(&b), Some(RectInt::new(2, 2, 2, 2)));
//! assert_eq!(a.union(&b), RectInt::new(0, 0, 6, 6));
//! ```

use serde::{Deserialize, Serialize};

/// Axis aligned rectangle with integer coordinates.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub struct RectInt {
    /// Horizontal offset in pixels from the origin.
    pub x: i32,

    /// Vertical offset in pixels from the origin.
    pub y: i32,

    /// Width in pixels.
    pub width: i32,

    /// Height in pixels.
    pub height: i32,
}

impl std::fmt::Debug for RectInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})x({},{})", self.x, self.y, self.width, self.height)
    }
}

impl RectInt {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the origin.
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Number of pixels covered. Empty rectangles cover nothing.
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Returns the overlapping area, or `None` when the rectangles do not overlap.
    pub fn intersect(&self, other: &RectInt) -> Option<RectInt> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        let r = RectInt::new(x, y, right - x, bottom - y);
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    /// Smallest rectangle containing both. Empty rectangles are ignored.
    pub fn union(&self, other: &RectInt) -> RectInt {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        RectInt::new(x, y, right - x, bottom - y)
    }

    pub fn contains_rect(&self, other: &RectInt) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }
}
