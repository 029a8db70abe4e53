//! Latitude/longitude/time intervals
//!
//! Longitudes are kept in the 0–360 convention. An interval whose `max` is
//! below its `min` wraps through 0/360:
//!
//! ```text
//!   0                                  360
//!   |====]                        [=====|     min = 350, max = 10
//!   |        [================]         |     min = 90,  max = 270
//! ```
//!
//! The full circle is `min = 0, max = 360`. All overlap tests are inclusive
//! on both ends.

use serde::{Deserialize, Serialize};

/// Map any longitude into [0, 360)
pub fn normalize_lon(lon: f64) -> f64 {
    let n = lon.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if n >= 360.0 {
        0.0
    } else {
        n
    }
}

/// Inclusive latitude interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatRange {
    pub min: f64,
    pub max: f64,
}

impl LatRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, lat: f64) -> bool {
        lat >= self.min && lat <= self.max
    }

    pub fn overlaps(&self, other: &LatRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Grow to cover `other`
    pub fn union(&self, other: &LatRange) -> LatRange {
        LatRange::new(self.min.min(other.min), self.max.max(other.max))
    }
}

/// Inclusive longitude interval in 0–360, possibly wrapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonRange {
    pub min: f64,
    pub max: f64,
}

impl LonRange {
    /// Every longitude
    pub const FULL: LonRange = LonRange {
        min: 0.0,
        max: 360.0,
    };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Build from user-supplied bounds in any convention.
    ///
    /// A raw span of 360° or more selects the full circle. Otherwise both
    /// ends are normalized and `min > max` afterwards means the range wraps,
    /// so `-10..10` and `350..10` describe the same interval.
    pub fn from_bounds(min: f64, max: f64) -> Self {
        if max - min >= 360.0 {
            return Self::FULL;
        }
        Self::new(normalize_lon(min), normalize_lon(max))
    }

    pub fn wraps(&self) -> bool {
        self.max < self.min
    }

    pub fn is_full(&self) -> bool {
        !self.wraps() && self.max - self.min >= 360.0
    }

    /// Angular width in degrees
    pub fn width(&self) -> f64 {
        if self.wraps() {
            360.0 - self.min + self.max
        } else {
            self.max - self.min
        }
    }

    /// Non-wrapping pieces covering this interval on [0, 360]
    pub fn segments(&self) -> ((f64, f64), Option<(f64, f64)>) {
        if self.wraps() {
            ((self.min, 360.0), Some((0.0, self.max)))
        } else {
            ((self.min, self.max), None)
        }
    }

    /// Whether a longitude in any convention falls inside
    pub fn contains(&self, lon: f64) -> bool {
        if self.is_full() {
            return lon.is_finite();
        }
        let lon = normalize_lon(lon);
        if self.wraps() {
            lon >= self.min || lon <= self.max
        } else {
            lon >= self.min && lon <= self.max
        }
    }

    pub fn overlaps(&self, other: &LonRange) -> bool {
        let (a1, a2) = self.segments();
        let (b1, b2) = other.segments();

        let hit = |(s_min, s_max): (f64, f64), (o_min, o_max): (f64, f64)| {
            s_min <= o_max && o_min <= s_max
        };

        [Some(a1), a2]
            .into_iter()
            .flatten()
            .any(|a| [Some(b1), b2].into_iter().flatten().any(|b| hit(a, b)))
    }

    /// Narrowest interval containing a set of longitudes.
    ///
    /// Two candidates are compared: the naive extent in 0–360 and the
    /// extent in -180–180 (mapped back to 0–360, where it may wrap). The
    /// narrower wins; ties keep the naive extent. Non-finite values are
    /// ignored. Returns `None` when nothing is finite.
    pub fn enclosing(lons: impl IntoIterator<Item = f64>) -> Option<LonRange> {
        let mut naive: Option<(f64, f64)> = None;
        // Shifted extremes, each paired with its 0–360 value
        let mut shifted: Option<((f64, f64), (f64, f64))> = None;

        for lon in lons.into_iter().filter(|l| l.is_finite()) {
            let n = normalize_lon(lon);
            let s = if n >= 180.0 { n - 360.0 } else { n };

            naive = Some(match naive {
                Some((lo, hi)) => (lo.min(n), hi.max(n)),
                None => (n, n),
            });
            shifted = Some(match shifted {
                Some((lo, hi)) => (
                    if s < lo.0 { (s, n) } else { lo },
                    if s > hi.0 { (s, n) } else { hi },
                ),
                None => ((s, n), (s, n)),
            });
        }

        let (n_min, n_max) = naive?;
        let ((s_min, s_min_n), (s_max, s_max_n)) = shifted?;

        if s_max - s_min < n_max - n_min {
            Some(LonRange::new(s_min_n, s_max_n))
        } else {
            Some(LonRange::new(n_min, n_max))
        }
    }

    /// Smallest interval covering every given interval.
    ///
    /// The union of all intervals is laid out on the circle and the result
    /// is the complement of its largest gap.
    pub fn covering(ranges: impl IntoIterator<Item = LonRange>) -> Option<LonRange> {
        let mut segments = Vec::new();
        for range in ranges {
            if range.is_full() {
                return Some(LonRange::FULL);
            }
            let (first, second) = range.segments();
            segments.push(first);
            segments.extend(second);
        }
        if segments.is_empty() {
            return None;
        }

        segments.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(segments.len());
        for (lo, hi) in segments {
            match merged.last_mut() {
                Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }

        // Gap from the last segment around through 360 to the first
        let first = merged[0];
        let last = merged[merged.len() - 1];
        let mut best_gap = first.0 + 360.0 - last.1;
        let mut best = LonRange::new(first.0, last.1);

        for pair in merged.windows(2) {
            let gap = pair[1].0 - pair[0].1;
            if gap > best_gap {
                best_gap = gap;
                best = LonRange::new(pair[1].0, pair[0].1);
            }
        }

        if best_gap <= 0.0 {
            return Some(LonRange::FULL);
        }
        Some(best)
    }
}

/// Inclusive time interval in ms since epoch; `None` ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeBounds {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: i64) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t <= e)
    }

    /// Whether `[min, max]` intersects these bounds
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.start.map_or(true, |s| max >= s) && self.end.map_or(true, |e| min <= e)
    }
}

/// A validated, normalized search box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBox {
    pub lat: LatRange,
    pub lon: LonRange,
    pub time: TimeBounds,
}

impl SearchBox {
    /// Whether one sample lies inside the box
    pub fn contains(&self, lat: f64, lon: f64, time: i64) -> bool {
        self.lat.contains(lat) && self.lon.contains(lon) && self.time.contains(time)
    }
}
