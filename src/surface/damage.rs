//! Damage tracking for deferred write-back.
//!
//! Writes into a fallback surface are recorded as rectangles. At flush time the tracker is
//! reduced to a short list of rectangles covering every recorded write, or to
//! [`Damage::Full`] when the tracker ran over its rectangle budget.

use crate::geometry::RectInt;

/// Reduced damage, as consumed by a flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Damage {
    /// Nothing was written
    Empty,
    /// The written area is unknown; the whole surface must be copied
    Full,
    /// Rectangles covering every write since the last reduction
    Rectangles(Vec<RectInt>),
}

impl Damage {
    pub fn is_empty(&self) -> bool {
        matches!(self, Damage::Empty)
    }

    /// True when the damage covers all of `extents`.
    pub fn covers(&self, extents: &RectInt) -> bool {
        match self {
            Damage::Empty => false,
            Damage::Full => true,
            Damage::Rectangles(rects) => rects.iter().any(|r| r.contains_rect(extents)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum State {
    Empty,
    Full,
    Rectangles(Vec<RectInt>),
}

#[derive(Clone, Debug)]
pub struct DamageTracker {
    state: State,
    max_rects: usize,
}

impl DamageTracker {
    /// Creates an empty tracker holding at most `max_rects` rectangles before degrading to full damage.
    pub fn new(max_rects: usize) -> Self {
        Self {
            state: State::Empty,
            max_rects: max_rects.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state == State::Empty
    }

    pub fn is_full(&self) -> bool {
        self.state == State::Full
    }

    /// Number of rectangles currently tracked.
    pub fn len(&self) -> usize {
        match &self.state {
            State::Rectangles(rects) => rects.len(),
            _ => 0,
        }
    }

    /// Adds a written rectangle. Empty rectangles are ignored; once full, the tracker stays full.
    pub fn add_rectangle(&mut self, rect: RectInt) {
        if rect.is_empty() {
            return;
        }

        match &mut self.state {
            State::Full => {}
            State::Empty => self.state = State::Rectangles(vec![rect]),
            State::Rectangles(rects) => {
                if rects.iter().any(|r| r.contains_rect(&rect)) {
                    return;
                }
                rects.retain(|r| !rect.contains_rect(r));
                rects.push(rect);

                if rects.len() > self.max_rects {
                    log::debug!("damage: more than {} rectangles, marking everything dirty", self.max_rects);
                    self.state = State::Full;
                }
            }
        }
    }

    /// Marks the whole surface as damaged.
    pub fn mark_full(&mut self) {
        self.state = State::Full;
    }

    /// Returns the tracked damage in its smallest form and resets the tracker to empty.
    pub fn reduce(&mut self) -> Damage {
        match std::mem::replace(&mut self.state, State::Empty) {
            State::Empty => Damage::Empty,
            State::Full => Damage::Full,
            State::Rectangles(rects) => Damage::Rectangles(coalesce(rects)),
        }
    }
}

/// Merges rectangles whose union is itself a rectangle, until no such pair remains.
///
/// Merging only happens when the bounding box adds no extra pixels, so the result covers
/// exactly the same area as the input.
fn coalesce(mut rects: Vec<RectInt>) -> Vec<RectInt> {
    loop {
        let mut merged = false;

        'outer: for i in 0..rects.len() {
            for j in (i + 1)..rects.len() {
                let a = rects[i];
                let b = rects[j];
                let overlap = a.intersect(&b).map(|r| r.area()).unwrap_or(0);
                let bbox = a.union(&b);

                if bbox.area() == a.area() + b.area() - overlap {
                    rects[i] = bbox;
                    rects.swap_remove(j);
                    merged = true;
                    break 'outer;
                }
            }
        }

        if !merged {
            break;
        }
    }

    rects.sort_by_key(|r| (r.y, r.x));
    rects
}
