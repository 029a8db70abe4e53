//! SwathDB Tile Index
//!
//! Every source file is cut along-track into fixed-size row ranges ("tiles")
//! and each tile is summarized by its latitude, longitude and time extent.
//! The summaries for the whole dataset live in one [`SpatialIndex`], which is
//! persisted as a single artifact and consulted at query time.
//!
//! # Architecture
//!
//! ```text
//! data_dir/**/*.swath
//!        ↓  discover + fingerprint (builder)
//! changed files ──→ worker pool ──→ build_tiles (tiler)
//!        ↓
//! coordinator: add_file / remove_stale / checkpoint
//!        ↓
//! SpatialIndex ──save──→ index.swix (header + LZ4 bincode payload)
//! ```
//!
//! - **tiler**: lazy tile sequence for one open file
//! - **store**: the in-memory index, its summary and its artifact format
//! - **builder**: incremental, parallel, cancellable build driver

mod builder;
mod error;
mod fingerprint;
pub mod geo;
mod store;
mod tiler;

pub use builder::{discover_files, BuildOptions, BuildReport, IndexBuilder, SkippedFile};
pub use error::{IndexError, IndexResult};
pub use fingerprint::{Fingerprint, FingerprintMode};
pub use geo::{LatRange, LonRange, SearchBox, TimeBounds};
pub use store::{IndexSummary, SpatialIndex, INDEX_SCHEMA_VERSION};
pub use tiler::{build_tiles, Tiles};

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Bounding box of one along-track row range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// First row (inclusive)
    pub row_start: usize,
    /// Last row (exclusive)
    pub row_end: usize,
    pub lat_min: f64,
    pub lat_max: f64,
    /// 0–360; `lon_max < lon_min` means the tile wraps through 0/360
    pub lon_min: f64,
    pub lon_max: f64,
    /// Earliest valid row time (ms since epoch)
    pub time_min: i64,
    /// Latest valid row time (ms since epoch)
    pub time_max: i64,
    /// Samples with finite coordinates and a valid row time
    pub valid_points: u64,
}

impl TileRecord {
    /// A tile with no valid samples; keeps its rows but never matches
    pub fn empty(rows: Range<usize>) -> Self {
        Self {
            row_start: rows.start,
            row_end: rows.end,
            lat_min: 0.0,
            lat_max: 0.0,
            lon_min: 0.0,
            lon_max: 0.0,
            time_min: 0,
            time_max: 0,
            valid_points: 0,
        }
    }

    pub fn rows(&self) -> Range<usize> {
        self.row_start..self.row_end
    }

    pub fn is_empty(&self) -> bool {
        self.valid_points == 0
    }

    pub fn lat_range(&self) -> LatRange {
        LatRange::new(self.lat_min, self.lat_max)
    }

    pub fn lon_range(&self) -> LonRange {
        LonRange::new(self.lon_min, self.lon_max)
    }

    /// Whether the tile may hold samples inside `search`
    pub fn overlaps(&self, search: &SearchBox) -> bool {
        !self.is_empty()
            && search.lat.overlaps(&self.lat_range())
            && search.lon.overlaps(&self.lon_range())
            && search.time.overlaps(self.time_min, self.time_max)
    }
}

/// One indexed source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the index base path, `/`-separated
    pub relative_path: String,
    /// Tiles ordered by `row_start`, covering `[0, rows)`
    pub tiles: Vec<TileRecord>,
    pub fingerprint: Fingerprint,
    pub rows: usize,
    pub cols: usize,
    /// When the file was tiled (ms since epoch)
    pub indexed_at: i64,
}

impl FileRecord {
    /// Earliest and latest valid time across tiles
    pub fn time_range(&self) -> Option<(i64, i64)> {
        self.tiles
            .iter()
            .filter(|t| !t.is_empty())
            .fold(None, |acc, t| match acc {
                None => Some((t.time_min, t.time_max)),
                Some((lo, hi)) => Some((lo.min(t.time_min), hi.max(t.time_max))),
            })
    }

    pub fn valid_points(&self) -> u64 {
        self.tiles.iter().map(|t| t.valid_points).sum()
    }
}

/// Render a relative path with `/` separators
pub(crate) fn relative_key(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(lat: (f64, f64), lon: (f64, f64), time: (i64, i64)) -> TileRecord {
        TileRecord {
            row_start: 0,
            row_end: 10,
            lat_min: lat.0,
            lat_max: lat.1,
            lon_min: lon.0,
            lon_max: lon.1,
            time_min: time.0,
            time_max: time.1,
            valid_points: 100,
        }
    }

    fn search(lat: (f64, f64), lon: (f64, f64), time: (Option<i64>, Option<i64>)) -> SearchBox {
        SearchBox {
            lat: LatRange::new(lat.0, lat.1),
            lon: LonRange::from_bounds(lon.0, lon.1),
            time: TimeBounds::new(time.0, time.1),
        }
    }

    #[test]
    fn test_tile_overlap_all_dimensions() {
        let t = tile((10.0, 20.0), (350.0, 5.0), (1_000, 2_000));

        assert!(t.overlaps(&search((15.0, 16.0), (0.0, 1.0), (None, None))));
        assert!(t.overlaps(&search((20.0, 30.0), (-20.0, -10.0), (Some(2_000), None))));
        assert!(!t.overlaps(&search((21.0, 30.0), (0.0, 1.0), (None, None))));
        assert!(!t.overlaps(&search((15.0, 16.0), (10.0, 20.0), (None, None))));
        assert!(!t.overlaps(&search((15.0, 16.0), (0.0, 1.0), (Some(2_001), None))));
    }

    #[test]
    fn test_empty_tile_never_matches() {
        let t = TileRecord::empty(0..10);
        assert!(!t.overlaps(&search((-90.0, 90.0), (-180.0, 180.0), (None, None))));
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let p = std::path::Path::new("cycle_001").join("pass_002.swath");
        assert_eq!(relative_key(&p), "cycle_001/pass_002.swath");
    }
}
