//! Along-track tiling of one swath file
//!
//! Coordinates are read once; tile records are then produced lazily, one
//! `tile_size`-row chunk at a time. The last chunk may be shorter.
//!
//! A sample counts toward a tile's extent when its latitude is finite and
//! within [-90, 90], its longitude is finite, and its row time is valid.
//! Invalid samples stay inside the row range but do not move the box.

use crate::index::geo::LonRange;
use crate::index::TileRecord;
use crate::swath::{Coordinates, SwathError, SwathHandle, SwathResult};
use std::num::NonZeroUsize;

/// Read a file's coordinates and return its tile sequence
pub fn build_tiles(handle: &mut dyn SwathHandle, tile_size: NonZeroUsize) -> SwathResult<Tiles> {
    let shape = handle.shape();
    let coords = handle.coordinates()?;
    coords.validate()?;
    if coords.cols != shape.cols || coords.latitude.len() != shape.samples() {
        return Err(SwathError::InvalidFormat(format!(
            "coordinates are {} rows x {} cols, file declares {} x {}",
            coords.rows(),
            coords.cols,
            shape.rows,
            shape.cols
        )));
    }
    Ok(Tiles::new(coords, tile_size))
}

/// Lazy iterator over the tiles of one file
pub struct Tiles {
    coords: Coordinates,
    tile_size: usize,
    next_row: usize,
}

impl Tiles {
    pub fn new(coords: Coordinates, tile_size: NonZeroUsize) -> Self {
        Self {
            coords,
            tile_size: tile_size.get(),
            next_row: 0,
        }
    }

    /// Total along-track rows being tiled
    pub fn rows(&self) -> usize {
        self.coords.rows()
    }

    pub fn cols(&self) -> usize {
        self.coords.cols
    }

    fn summarize(&self, start: usize, end: usize) -> TileRecord {
        let mut lat_min = f64::INFINITY;
        let mut lat_max = f64::NEG_INFINITY;
        let mut time_min = i64::MAX;
        let mut time_max = i64::MIN;
        let mut valid = 0u64;
        let mut lons = Vec::with_capacity((end - start) * self.coords.cols);

        for row in start..end {
            let Some(t) = self.coords.time[row] else {
                continue;
            };
            let mut row_valid = false;

            for (&lat, &lon) in self
                .coords
                .row_latitude(row)
                .iter()
                .zip(self.coords.row_longitude(row))
            {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) || !lon.is_finite() {
                    continue;
                }
                lat_min = lat_min.min(lat);
                lat_max = lat_max.max(lat);
                lons.push(lon);
                valid += 1;
                row_valid = true;
            }

            if row_valid {
                time_min = time_min.min(t);
                time_max = time_max.max(t);
            }
        }

        let Some(lon) = LonRange::enclosing(lons) else {
            return TileRecord::empty(start..end);
        };

        TileRecord {
            row_start: start,
            row_end: end,
            lat_min,
            lat_max,
            lon_min: lon.min,
            lon_max: lon.max,
            time_min,
            time_max,
            valid_points: valid,
        }
    }
}

impl Iterator for Tiles {
    type Item = TileRecord;

    fn next(&mut self) -> Option<TileRecord> {
        let rows = self.coords.rows();
        if self.next_row >= rows {
            return None;
        }

        let start = self.next_row;
        let end = (start + self.tile_size).min(rows);
        self.next_row = end;

        Some(self.summarize(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.coords.rows().saturating_sub(self.next_row);
        let n = remaining.div_ceil(self.tile_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Tiles {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swath::synthetic::SyntheticSwath;
    use crate::swath::SwathShape;

    fn tile_size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_1000_rows_tile_100_gives_10_contiguous_tiles() {
        let mut swath = SyntheticSwath::new(1000, 5);
        let tiles: Vec<_> = build_tiles(&mut swath, tile_size(100)).unwrap().collect();

        assert_eq!(tiles.len(), 10);
        for (i, t) in tiles.iter().enumerate() {
            assert_eq!(t.rows(), i * 100..(i + 1) * 100);
        }
    }

    #[test]
    fn test_tiles_cover_all_rows_with_short_tail() {
        let mut swath = SyntheticSwath::new(1050, 3);
        let tiles = build_tiles(&mut swath, tile_size(493)).unwrap();
        assert_eq!(tiles.len(), 3);

        let tiles: Vec<_> = tiles.collect();
        assert_eq!(tiles[0].row_start, 0);
        assert_eq!(tiles.last().unwrap().row_end, 1050);
        assert!(tiles.windows(2).all(|w| w[0].row_end == w[1].row_start));
        assert_eq!(tiles[2].rows().len(), 64);
    }

    #[test]
    fn test_tile_boxes_contain_every_point() {
        // Crosses the antimeridian in signed longitudes and 0/360 along-track
        let mut swath = SyntheticSwath::new(400, 9)
            .longitude(-1.0, 0.01)
            .cross_track(0.05)
            .signed_longitude(true);
        let coords = swath.coordinates().unwrap();
        let tiles: Vec<_> = build_tiles(&mut swath, tile_size(50)).unwrap().collect();

        for t in &tiles {
            assert!(t.lat_min <= t.lat_max);
            for row in t.rows() {
                for (&lat, &lon) in coords.row_latitude(row).iter().zip(coords.row_longitude(row)) {
                    assert!(t.lat_range().contains(lat));
                    assert!(t.lon_range().contains(lon), "lon {} outside {:?}", lon, t.lon_range());
                }
            }
        }
        assert!(tiles.iter().any(|t| t.lon_range().wraps()));
        assert!(tiles.iter().all(|t| t.lon_range().width() < 10.0));
    }

    #[test]
    fn test_fill_rows_keep_range_but_not_box() {
        let mut swath = SyntheticSwath::new(20, 4).fill_rows(0..10);
        let tiles: Vec<_> = build_tiles(&mut swath, tile_size(10)).unwrap().collect();

        assert_eq!(tiles.len(), 2);
        assert!(tiles[0].is_empty());
        assert_eq!(tiles[0].rows(), 0..10);
        assert_eq!(tiles[1].valid_points, 40);
        assert_eq!(tiles[1].time_min, swath.row_time(10).unwrap());
        assert_eq!(tiles[1].time_max, swath.row_time(19).unwrap());
    }

    #[test]
    fn test_out_of_range_latitude_is_fill() {
        let coords = Coordinates {
            cols: 2,
            latitude: vec![10.0, 9999.0, 11.0, -9999.0],
            longitude: vec![20.0, 20.5, 21.0, 21.5],
            time: vec![Some(0), Some(1000)],
        };
        let tile = Tiles::new(coords, tile_size(10)).next().unwrap();
        assert_eq!(tile.valid_points, 2);
        assert_eq!((tile.lat_min, tile.lat_max), (10.0, 11.0));
        assert_eq!((tile.lon_min, tile.lon_max), (20.0, 21.0));
    }

    struct Unreadable;

    impl SwathHandle for Unreadable {
        fn shape(&self) -> SwathShape {
            SwathShape::new(10, 10)
        }
        fn variable_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn coordinates(&mut self) -> SwathResult<Coordinates> {
            Err(SwathError::MissingVariable("latitude".into()))
        }
        fn read(&mut self, _: &[String], _: std::ops::Range<usize>) -> SwathResult<crate::swath::RowSlab> {
            Err(SwathError::MissingVariable("latitude".into()))
        }
    }

    #[test]
    fn test_unreadable_coordinates() {
        assert!(build_tiles(&mut Unreadable, tile_size(10)).is_err());
    }

    /// Declares a wider grid than its coordinates hold
    struct Truncated;

    impl SwathHandle for Truncated {
        fn shape(&self) -> SwathShape {
            SwathShape::new(4, 3)
        }
        fn variable_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn coordinates(&mut self) -> SwathResult<Coordinates> {
            SyntheticSwath::new(4, 2).coordinates()
        }
        fn read(&mut self, _: &[String], _: std::ops::Range<usize>) -> SwathResult<crate::swath::RowSlab> {
            Err(SwathError::MissingVariable("ssha".into()))
        }
    }

    #[test]
    fn test_coordinates_must_match_shape() {
        assert!(matches!(
            build_tiles(&mut Truncated, tile_size(10)),
            Err(SwathError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_empty_file_has_no_tiles() {
        let mut swath = SyntheticSwath::new(0, 4);
        assert_eq!(build_tiles(&mut swath, tile_size(10)).unwrap().count(), 0);
    }
}
