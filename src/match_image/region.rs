//! Half-open rectangles used for search areas, match locations and ROIs

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point within the video frame, measured in pixels from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Rectangular region `[x, right) × [y, bottom)`.
///
/// Edges may be unbounded: `i32::MIN` stands for -∞ and `i32::MAX` for +∞.
/// `translate` and `extend` saturate so an unbounded edge stays unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    /// The whole (unbounded) plane.
    pub const ALL: Region = Region {
        x: i32::MIN,
        y: i32::MIN,
        right: i32::MAX,
        bottom: i32::MAX,
    };

    /// Create a region from its top-left corner and size.
    ///
    /// # Panics
    /// If `width` or `height` is zero.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        assert!(
            width > 0 && height > 0,
            "Region must have a positive size (got {width}x{height})"
        );
        Self {
            x,
            y,
            right: x.saturating_add_unsigned(width),
            bottom: y.saturating_add_unsigned(height),
        }
    }

    /// Create a region from its extents, or `None` if it would be empty.
    pub fn from_extents(x: i32, y: i32, right: i32, bottom: i32) -> Option<Self> {
        (right > x && bottom > y).then_some(Self {
            x,
            y,
            right,
            bottom,
        })
    }

    pub fn width(&self) -> u32 {
        (self.right as i64 - self.x as i64).min(u32::MAX as i64) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom as i64 - self.y as i64).min(u32::MAX as i64) as u32
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_bounded(&self) -> bool {
        self.x != i32::MIN && self.y != i32::MIN && self.right != i32::MAX && self.bottom != i32::MAX
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn center(&self) -> Position {
        Position::new(
            ((self.x as i64 + self.right as i64).div_euclid(2)) as i32,
            ((self.y as i64 + self.bottom as i64).div_euclid(2)) as i32,
        )
    }

    /// Intersection of two regions, `None` if they don't overlap.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        Region::from_extents(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
    }

    /// Intersection of any number of regions. No regions gives [`Region::ALL`].
    pub fn intersect_all<'a>(regions: impl IntoIterator<Item = &'a Region>) -> Option<Region> {
        regions
            .into_iter()
            .try_fold(Region::ALL, |acc, r| acc.intersect(r))
    }

    /// Smallest region containing all the given regions.
    pub fn bounding_box<'a>(regions: impl IntoIterator<Item = &'a Region>) -> Option<Region> {
        regions.into_iter().fold(None, |acc: Option<Region>, r| {
            Some(match acc {
                None => *r,
                Some(b) => Region {
                    x: b.x.min(r.x),
                    y: b.y.min(r.y),
                    right: b.right.max(r.right),
                    bottom: b.bottom.max(r.bottom),
                },
            })
        })
    }

    /// Non-strict superset test.
    pub fn contains(&self, other: &Region) -> bool {
        self.x <= other.x
            && other.right <= self.right
            && self.y <= other.y
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, p: Position) -> bool {
        self.x <= p.x && p.x < self.right && self.y <= p.y && p.y < self.bottom
    }

    /// Move the region; width and height are unaffected.
    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            x: shift(self.x, dx),
            y: shift(self.y, dy),
            right: shift(self.right, dx),
            bottom: shift(self.bottom, dy),
        }
    }

    /// Adjust each edge by the given amount. Returns `None` if the result is empty.
    pub fn extend(&self, x: i32, y: i32, right: i32, bottom: i32) -> Option<Region> {
        Region::from_extents(
            shift(self.x, x),
            shift(self.y, y),
            shift(self.right, right),
            shift(self.bottom, bottom),
        )
    }

    /// Everything above this region, `height` tall (unbounded if `None`).
    pub fn above(&self, height: Option<u32>) -> Region {
        let top = height.map_or(i32::MIN, |h| self.y.saturating_sub_unsigned(h));
        Region { y: top, bottom: self.y, ..*self }
    }

    pub fn below(&self, height: Option<u32>) -> Region {
        let bottom = height.map_or(i32::MAX, |h| self.bottom.saturating_add_unsigned(h));
        Region { y: self.bottom, bottom, ..*self }
    }

    pub fn left_of(&self, width: Option<u32>) -> Region {
        let left = width.map_or(i32::MIN, |w| self.x.saturating_sub_unsigned(w));
        Region { x: left, right: self.x, ..*self }
    }

    pub fn right_of(&self, width: Option<u32>) -> Region {
        let right = width.map_or(i32::MAX, |w| self.right.saturating_add_unsigned(w));
        Region { x: self.right, right, ..*self }
    }

    /// Region covering a `width`×`height` image.
    pub fn of_size(width: u32, height: u32) -> Region {
        Region::new(0, 0, width, height)
    }
}

fn shift(edge: i32, delta: i32) -> i32 {
    if edge == i32::MIN || edge == i32::MAX {
        edge
    } else {
        edge.saturating_add(delta)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Region::ALL {
            return write!(f, "Region.ALL");
        }
        let edge = |v: i32| match v {
            i32::MIN => "-inf".to_string(),
            i32::MAX => "inf".to_string(),
            v => v.to_string(),
        };
        write!(
            f,
            "Region(x={}, y={}, right={}, bottom={})",
            edge(self.x),
            edge(self.y),
            edge(self.right),
            edge(self.bottom)
        )
    }
}

/// Discard regions that are entirely contained within another region.
///
/// Sorted by ascending area; each region, largest first, removes every smaller
/// region it contains. Duplicates collapse to one. The output stays sorted by
/// area, which makes the operation idempotent.
pub fn merge_regions(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort_by_key(Region::area);
    let mut keep = vec![true; regions.len()];
    for i in (0..regions.len()).rev() {
        if !keep[i] {
            // Anything inside it is inside its container too
            continue;
        }
        let outer = regions[i];
        for (j, inner) in regions[..i].iter().enumerate() {
            if keep[j] && outer.contains(inner) {
                keep[j] = false;
            }
        }
    }
    regions
        .into_iter()
        .zip(keep)
        .filter_map(|(r, k)| k.then_some(r))
        .collect()
}
