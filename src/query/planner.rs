//! Tile selection and read planning
//!
//! ```text
//! SearchBox ─→ linear scan of every tile ─→ group by file ─→ merge ranges
//!                                                   │
//!   pass_a.swath: [0,100) [100,200) [400,500)  ─→  [0,200) [400,500)
//! ```

use crate::index::geo::SearchBox;
use crate::index::SpatialIndex;
use std::ops::Range;

/// Row ranges to read from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub relative_path: String,
    /// Sorted, disjoint, non-adjacent
    pub ranges: Vec<Range<usize>>,
}

impl FilePlan {
    pub fn rows(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// Files and row ranges a query has to read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    /// Ordered by relative path
    pub files: Vec<FilePlan>,
    pub tiles_scanned: usize,
    pub tiles_selected: usize,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Select overlapping tiles and merge them into per-file row ranges
pub fn plan(index: &SpatialIndex, search: &SearchBox) -> QueryPlan {
    let mut files: Vec<FilePlan> = Vec::new();
    let mut tiles_selected = 0;

    // Index iteration is path-ordered, so equal paths arrive together
    for (path, tile) in index.tiles_overlapping(search) {
        tiles_selected += 1;
        match files.last_mut() {
            Some(plan) if plan.relative_path == path => plan.ranges.push(tile.rows()),
            _ => files.push(FilePlan {
                relative_path: path.to_string(),
                ranges: vec![tile.rows()],
            }),
        }
    }

    for plan in &mut files {
        plan.ranges = merge_row_ranges(std::mem::take(&mut plan.ranges));
    }

    QueryPlan {
        files,
        tiles_scanned: index.tile_count(),
        tiles_selected,
    }
}

/// Merge overlapping or touching ranges into a sorted disjoint list
pub fn merge_row_ranges(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => merged.push(r),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::geo::{LatRange, LonRange, TimeBounds};
    use crate::index::{FileRecord, Fingerprint, TileRecord};

    #[test]
    fn test_merge_row_ranges() {
        assert_eq!(
            merge_row_ranges(vec![400..500, 0..100, 100..200, 150..180]),
            vec![0..200, 400..500]
        );
        assert_eq!(merge_row_ranges(vec![5..5]), Vec::<Range<usize>>::new());
        assert_eq!(merge_row_ranges(vec![0..10, 11..20]), vec![0..10, 11..20]);
    }

    fn tile(rows: Range<usize>, lat: (f64, f64)) -> TileRecord {
        TileRecord {
            row_start: rows.start,
            row_end: rows.end,
            lat_min: lat.0,
            lat_max: lat.1,
            lon_min: 10.0,
            lon_max: 20.0,
            time_min: 0,
            time_max: 1_000,
            valid_points: 10,
        }
    }

    fn record(tiles: Vec<TileRecord>) -> FileRecord {
        FileRecord {
            relative_path: String::new(),
            rows: tiles.last().map(|t| t.row_end).unwrap_or(0),
            tiles,
            fingerprint: Fingerprint::Checksum { size: 0, crc32: 0 },
            cols: 1,
            indexed_at: 0,
        }
    }

    #[test]
    fn test_plan_groups_and_merges() {
        let mut index = SpatialIndex::new("/data", 100);
        index.add_file(
            "b.swath",
            record(vec![tile(0..100, (0.0, 5.0)), tile(100..200, (5.0, 10.0)), tile(200..300, (40.0, 50.0))]),
        );
        index.add_file("a.swath", record(vec![tile(0..100, (8.0, 12.0))]));
        index.add_file("c.swath", record(vec![tile(0..100, (60.0, 70.0))]));

        let search = SearchBox {
            lat: LatRange::new(4.0, 9.0),
            lon: LonRange::FULL,
            time: TimeBounds::default(),
        };
        let plan = plan(&index, &search);

        assert_eq!(plan.tiles_scanned, 5);
        assert_eq!(plan.tiles_selected, 3);
        assert_eq!(
            plan.files,
            vec![
                FilePlan {
                    relative_path: "a.swath".into(),
                    ranges: vec![0..100]
                },
                FilePlan {
                    relative_path: "b.swath".into(),
                    ranges: vec![0..200]
                },
            ]
        );
        assert_eq!(plan.files[1].rows(), 200);
    }

    #[test]
    fn test_plan_empty_when_nothing_overlaps() {
        let mut index = SpatialIndex::new("/data", 100);
        index.add_file("a.swath", record(vec![tile(0..100, (0.0, 5.0))]));

        let search = SearchBox {
            lat: LatRange::new(80.0, 90.0),
            lon: LonRange::FULL,
            time: TimeBounds::default(),
        };
        assert!(plan(&index, &search).is_empty());
    }
}
