//! Swath file access
//!
//! Source files are never copied or rewritten by the index. Everything the
//! index and query engine need from a file goes through two traits:
//!
//! - [`SwathSource`]: opens a path and hands back a scoped [`SwathHandle`]
//! - [`SwathHandle`]: exposes the along-track coordinate arrays and reads
//!   variables for a row range
//!
//! # Layout
//!
//! ```text
//!            cross-track (cols) →
//!   row 0   [ s s s s s s s s ]   time[0]
//!   row 1   [ s s s s s s s s ]   time[1]      along-track (rows)
//!   ...                                          ↓ time-ordered
//!   row n-1 [ s s s s s s s s ]   time[n-1]
//! ```
//!
//! Latitude, longitude and every variable are stored row-major
//! (`rows × cols`). Time is one value per row, in milliseconds since the
//! Unix epoch. Fill values are surfaced as `NaN` (coordinates/variables) or
//! `None` (time).
//!
//! # Implementations
//!
//! - [`format`]: native `.swath` container (memory-mapped, LZ4 column chunks)
//! - `netcdf_reader` (feature `netcdf`): SWOT-style NetCDF products
//! - [`synthetic`]: generated orbits for tests and benchmarks

pub mod compression;
pub mod error;
pub mod format;
#[cfg(feature = "netcdf")]
pub mod netcdf_reader;
pub mod synthetic;

pub use error::{SwathError, SwathResult};
pub use format::{CompressionType, SwathFile, SwathHeader, SwathWriter};

use std::ops::Range;
use std::path::Path;

/// Grid dimensions of one swath file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwathShape {
    /// Along-track length
    pub rows: usize,
    /// Cross-track width
    pub cols: usize,
}

impl SwathShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total number of samples
    pub fn samples(&self) -> usize {
        self.rows * self.cols
    }
}

/// Coordinate arrays for a contiguous block of rows
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    /// Cross-track width
    pub cols: usize,
    /// Latitude per sample, row-major
    pub latitude: Vec<f64>,
    /// Longitude per sample, row-major, in whatever convention the file uses
    pub longitude: Vec<f64>,
    /// Time per row (ms since epoch), `None` for fill
    pub time: Vec<Option<i64>>,
}

impl Coordinates {
    /// Create an empty coordinate block
    pub fn empty(cols: usize) -> Self {
        Self {
            cols,
            latitude: Vec::new(),
            longitude: Vec::new(),
            time: Vec::new(),
        }
    }

    /// Number of rows held
    pub fn rows(&self) -> usize {
        self.time.len()
    }

    /// Check the array lengths agree with `rows × cols`
    pub fn validate(&self) -> SwathResult<()> {
        let expected = self.rows() * self.cols;
        if self.latitude.len() != expected || self.longitude.len() != expected {
            return Err(SwathError::InvalidFormat(format!(
                "coordinate arrays have {} / {} samples, expected {} ({} rows x {} cols)",
                self.latitude.len(),
                self.longitude.len(),
                expected,
                self.rows(),
                self.cols
            )));
        }
        Ok(())
    }

    /// Latitude samples of one row
    pub fn row_latitude(&self, row: usize) -> &[f64] {
        &self.latitude[row * self.cols..(row + 1) * self.cols]
    }

    /// Longitude samples of one row
    pub fn row_longitude(&self, row: usize) -> &[f64] {
        &self.longitude[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy rows `[start, end)` (relative to this block) into a new block
    pub fn slice_rows(&self, rows: Range<usize>) -> Self {
        let samples = rows.start * self.cols..rows.end * self.cols;
        Self {
            cols: self.cols,
            latitude: self.latitude[samples.clone()].to_vec(),
            longitude: self.longitude[samples].to_vec(),
            time: self.time[rows].to_vec(),
        }
    }

    /// Append another block with the same width
    pub fn extend(&mut self, other: Coordinates) {
        debug_assert_eq!(self.cols, other.cols);
        self.latitude.extend(other.latitude);
        self.longitude.extend(other.longitude);
        self.time.extend(other.time);
    }
}

/// Coordinates plus requested variables for a row range of one file
#[derive(Debug, Clone, PartialEq)]
pub struct RowSlab {
    /// First along-track row held (absolute within the file)
    pub row_start: usize,
    /// Coordinates for the held rows
    pub coords: Coordinates,
    /// Requested variables, in request order, row-major like the coordinates
    pub variables: Vec<(String, Vec<f64>)>,
}

impl RowSlab {
    /// Number of rows held
    pub fn rows(&self) -> usize {
        self.coords.rows()
    }

    /// Absolute row range held
    pub fn row_range(&self) -> Range<usize> {
        self.row_start..self.row_start + self.rows()
    }

    /// Values of a requested variable
    pub fn variable(&self, name: &str) -> Option<&[f64]> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// An open swath file
///
/// Handles are scoped: callers open, read what they need and drop the
/// handle inside the same task.
pub trait SwathHandle {
    /// Grid dimensions
    fn shape(&self) -> SwathShape;

    /// Names of the data variables available for [`SwathHandle::read`]
    fn variable_names(&self) -> Vec<String>;

    /// Read the full coordinate arrays
    fn coordinates(&mut self) -> SwathResult<Coordinates>;

    /// Read coordinates and `variables` for rows `[rows.start, rows.end)`
    fn read(&mut self, variables: &[String], rows: Range<usize>) -> SwathResult<RowSlab>;
}

/// Opens swath files
pub trait SwathSource: Send + Sync {
    /// Open a file for reading
    fn open(&self, path: &Path) -> SwathResult<Box<dyn SwathHandle>>;
}

/// Picks a reader from the file extension
///
/// - `.swath` → [`SwathFile`]
/// - `.nc`, `.nc4` → NetCDF reader (requires the `netcdf` feature)
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSource;

impl SwathSource for DefaultSource {
    fn open(&self, path: &Path) -> SwathResult<Box<dyn SwathHandle>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some(format::SWATH_EXTENSION) => Ok(Box::new(SwathFile::open(path)?)),
            #[cfg(feature = "netcdf")]
            Some("nc") | Some("nc4") => Ok(Box::new(netcdf_reader::NetCdfSwath::open(path)?)),
            _ => Err(SwathError::Unsupported(path.to_path_buf())),
        }
    }
}

/// Check a requested row range against the file extent
pub(crate) fn check_rows(rows: &Range<usize>, total: usize) -> SwathResult<()> {
    if rows.start > rows.end || rows.end > total {
        return Err(SwathError::RowRange {
            start: rows.start,
            end: rows.end,
            rows: total,
        });
    }
    Ok(())
}
