//! Generated swaths for tests and benchmarks
//!
//! A synthetic pass moves linearly in latitude and longitude along-track and
//! spreads samples cross-track around the ground track. Two variables are
//! produced with values that identify their sample:
//!
//! - `ssha = row * 1000 + col`
//! - `swh = (row + col) * 0.01`

use crate::swath::error::SwathResult;
use crate::swath::format::{write_swath, DEFAULT_BLOCK_ROWS};
use crate::swath::{check_rows, Coordinates, RowSlab, SwathError, SwathHandle, SwathShape};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Variable names every synthetic swath carries
pub const SYNTHETIC_VARIABLES: [&str; 2] = ["ssha", "swh"];

/// Parameters of a generated pass
#[derive(Debug, Clone)]
pub struct SyntheticSwath {
    pub rows: usize,
    pub cols: usize,
    /// Latitude of row 0
    pub lat_start: f64,
    /// Latitude change per row
    pub lat_step: f64,
    /// Ground-track longitude of row 0
    pub lon_start: f64,
    /// Longitude change per row
    pub lon_step: f64,
    /// Longitude spacing between adjacent cross-track samples
    pub col_spacing: f64,
    /// Time of row 0 (ms since epoch)
    pub time_start: i64,
    /// Time step per row (ms)
    pub time_step: i64,
    /// Emit longitudes in [-180, 180) instead of [0, 360)
    pub signed_longitude: bool,
    /// Rows whose coordinates and time are fill
    pub fill_rows: Range<usize>,
}

impl SyntheticSwath {
    /// A short mid-latitude pass starting at 2023-05-10T00:00:00Z
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            lat_start: -10.0,
            lat_step: 0.01,
            lon_start: 100.0,
            lon_step: 0.005,
            col_spacing: 0.02,
            time_start: 1_683_676_800_000,
            time_step: 1_000,
            signed_longitude: false,
            fill_rows: 0..0,
        }
    }

    pub fn latitude(mut self, start: f64, step: f64) -> Self {
        self.lat_start = start;
        self.lat_step = step;
        self
    }

    pub fn longitude(mut self, start: f64, step: f64) -> Self {
        self.lon_start = start;
        self.lon_step = step;
        self
    }

    pub fn cross_track(mut self, spacing: f64) -> Self {
        self.col_spacing = spacing;
        self
    }

    pub fn time(mut self, start: i64, step: i64) -> Self {
        self.time_start = start;
        self.time_step = step;
        self
    }

    pub fn signed_longitude(mut self, signed: bool) -> Self {
        self.signed_longitude = signed;
        self
    }

    pub fn fill_rows(mut self, rows: Range<usize>) -> Self {
        self.fill_rows = rows;
        self
    }

    /// Latitude and longitude of one sample, as stored in the file
    pub fn sample(&self, row: usize, col: usize) -> (f64, f64) {
        if self.fill_rows.contains(&row) {
            return (f64::NAN, f64::NAN);
        }

        let lat = self.lat_start + row as f64 * self.lat_step;
        let offset = col as f64 - (self.cols as f64 - 1.0) / 2.0;
        let lon = (self.lon_start + row as f64 * self.lon_step + offset * self.col_spacing)
            .rem_euclid(360.0);
        let lon = if self.signed_longitude && lon >= 180.0 {
            lon - 360.0
        } else {
            lon
        };

        (lat, lon)
    }

    /// Time of one row
    pub fn row_time(&self, row: usize) -> Option<i64> {
        if self.fill_rows.contains(&row) {
            None
        } else {
            Some(self.time_start + row as i64 * self.time_step)
        }
    }

    /// Value of a synthetic variable at one sample
    pub fn value(name: &str, row: usize, col: usize) -> Option<f64> {
        match name {
            "ssha" => Some((row * 1000 + col) as f64),
            "swh" => Some((row + col) as f64 * 0.01),
            _ => None,
        }
    }

    fn coords_for(&self, rows: Range<usize>) -> Coordinates {
        let mut coords = Coordinates::empty(self.cols);
        for row in rows {
            for col in 0..self.cols {
                let (lat, lon) = self.sample(row, col);
                coords.latitude.push(lat);
                coords.longitude.push(lon);
            }
            coords.time.push(self.row_time(row));
        }
        coords
    }

    fn values_for(&self, name: &str, rows: Range<usize>) -> SwathResult<Vec<f64>> {
        let mut values = Vec::with_capacity(rows.len() * self.cols);
        for row in rows {
            for col in 0..self.cols {
                let v = Self::value(name, row, col)
                    .ok_or_else(|| SwathError::MissingVariable(name.to_string()))?;
                values.push(v);
            }
        }
        Ok(values)
    }

    /// Write the pass as a native `.swath` file
    pub fn write(&self, path: impl AsRef<Path>) -> SwathResult<PathBuf> {
        let all = 0..self.rows;
        let variables = SYNTHETIC_VARIABLES
            .iter()
            .map(|name| Ok((*name, self.values_for(name, all.clone())?)))
            .collect::<SwathResult<Vec<_>>>()?;

        write_swath(path, &self.coords_for(all), &variables, DEFAULT_BLOCK_ROWS)
    }
}

impl SwathHandle for SyntheticSwath {
    fn shape(&self) -> SwathShape {
        SwathShape::new(self.rows, self.cols)
    }

    fn variable_names(&self) -> Vec<String> {
        SYNTHETIC_VARIABLES.iter().map(|v| v.to_string()).collect()
    }

    fn coordinates(&mut self) -> SwathResult<Coordinates> {
        Ok(self.coords_for(0..self.rows))
    }

    fn read(&mut self, variables: &[String], rows: Range<usize>) -> SwathResult<RowSlab> {
        check_rows(&rows, self.rows)?;

        let values = variables
            .iter()
            .map(|name| Ok((name.clone(), self.values_for(name, rows.clone())?)))
            .collect::<SwathResult<Vec<_>>>()?;

        Ok(RowSlab {
            row_start: rows.start,
            coords: self.coords_for(rows),
            variables: values,
        })
    }
}
