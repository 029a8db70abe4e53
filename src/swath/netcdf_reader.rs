//! NetCDF swath reader (feature `netcdf`)
//!
//! Reads SWOT-style products: `latitude` and `longitude` on
//! `num_lines × num_pixels`, `time` on `num_lines`. Packed variables are
//! unpacked with `scale_factor`/`add_offset` and `_FillValue` becomes `NaN`.
//! Time is converted to milliseconds since the Unix epoch from its CF
//! `units` attribute (`"seconds since 2000-01-01 00:00:00"`).
//!
//! # System requirements
//!
//! libnetcdf and libhdf5 (`libhdf5-dev libnetcdf-dev` on Debian).

use crate::swath::error::{SwathError, SwathResult};
use crate::swath::{check_rows, Coordinates, RowSlab, SwathHandle, SwathShape};
use chrono::{NaiveDate, NaiveDateTime};
use std::ops::Range;
use std::path::{Path, PathBuf};

const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";
const TIME: &str = "time";

/// An open NetCDF swath product
pub struct NetCdfSwath {
    path: PathBuf,
    file: ::netcdf::File,
    shape: SwathShape,
    time_units: TimeUnits,
}

impl NetCdfSwath {
    /// Open a product and check its coordinate layout
    pub fn open(path: impl AsRef<Path>) -> SwathResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = ::netcdf::open(&path).map_err(|e| {
            SwathError::InvalidFormat(format!("Failed to open NetCDF {:?}: {}", path, e))
        })?;

        let lat = variable(&file, LATITUDE)?;
        let dims = lat.dimensions();
        if dims.len() != 2 {
            return Err(SwathError::InvalidFormat(format!(
                "latitude has {} dimensions, expected 2",
                dims.len()
            )));
        }
        let shape = SwathShape::new(dims[0].len(), dims[1].len());

        let lon = variable(&file, LONGITUDE)?;
        let lon_dims: Vec<usize> = lon.dimensions().iter().map(|d| d.len()).collect();
        if lon_dims != [shape.rows, shape.cols] {
            return Err(SwathError::InvalidFormat(format!(
                "longitude shape {:?} does not match latitude {}x{}",
                lon_dims, shape.rows, shape.cols
            )));
        }

        let time = variable(&file, TIME)?;
        let time_dims: Vec<usize> = time.dimensions().iter().map(|d| d.len()).collect();
        if time_dims != [shape.rows] {
            return Err(SwathError::InvalidFormat(format!(
                "time shape {:?} does not match {} lines",
                time_dims, shape.rows
            )));
        }
        let units = get_str_attr(&time, "units")
            .ok_or_else(|| SwathError::InvalidFormat("time has no units attribute".into()))?;
        let time_units = TimeUnits::parse(&units)?;

        Ok(Self {
            path,
            file,
            shape,
            time_units,
        })
    }

    /// Read and unpack a per-sample or per-line variable over `rows`
    fn read_values(&self, name: &str, rows: &Range<usize>) -> SwathResult<Vec<f64>> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| SwathError::MissingVariable(name.to_string()))?;
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

        let raw: Vec<f64> = match dims.as_slice() {
            [r, c] if *r == self.shape.rows && *c == self.shape.cols => var
                .get_values::<f64, _>((rows.clone(), ..))
                .map_err(|e| self.read_error(name, e))?,
            // Per-line variable: repeat each value across the swath
            [r] if *r == self.shape.rows => {
                let line: Vec<f64> = var
                    .get_values::<f64, _>(rows.clone())
                    .map_err(|e| self.read_error(name, e))?;
                line.iter()
                    .flat_map(|&v| std::iter::repeat(v).take(self.shape.cols))
                    .collect()
            }
            _ => {
                return Err(SwathError::InvalidFormat(format!(
                    "{} has shape {:?}, not a swath variable",
                    name, dims
                )))
            }
        };

        Ok(unpack(&var, raw))
    }

    fn read_time(&self, rows: &Range<usize>) -> SwathResult<Vec<Option<i64>>> {
        let var = variable(&self.file, TIME)?;
        let raw: Vec<f64> = var
            .get_values::<f64, _>(rows.clone())
            .map_err(|e| self.read_error(TIME, e))?;

        Ok(unpack(&var, raw)
            .into_iter()
            .map(|v| self.time_units.to_millis(v))
            .collect())
    }

    fn read_coords(&self, rows: Range<usize>) -> SwathResult<Coordinates> {
        let coords = Coordinates {
            cols: self.shape.cols,
            latitude: self.read_values(LATITUDE, &rows)?,
            longitude: self.read_values(LONGITUDE, &rows)?,
            time: self.read_time(&rows)?,
        };
        coords.validate()?;
        Ok(coords)
    }

    fn read_error(&self, name: &str, err: ::netcdf::Error) -> SwathError {
        SwathError::InvalidFormat(format!("Failed to read {} from {:?}: {}", name, self.path, err))
    }
}

impl SwathHandle for NetCdfSwath {
    fn shape(&self) -> SwathShape {
        self.shape
    }

    fn variable_names(&self) -> Vec<String> {
        self.file
            .variables()
            .filter(|v| {
                let dims: Vec<usize> = v.dimensions().iter().map(|d| d.len()).collect();
                dims == [self.shape.rows, self.shape.cols] || dims == [self.shape.rows]
            })
            .map(|v| v.name())
            .filter(|n| n != LATITUDE && n != LONGITUDE && n != TIME)
            .collect()
    }

    fn coordinates(&mut self) -> SwathResult<Coordinates> {
        self.read_coords(0..self.shape.rows)
    }

    fn read(&mut self, variables: &[String], rows: Range<usize>) -> SwathResult<RowSlab> {
        check_rows(&rows, self.shape.rows)?;

        let coords = self.read_coords(rows.clone())?;
        let variables = variables
            .iter()
            .map(|name| Ok((name.clone(), self.read_values(name, &rows)?)))
            .collect::<SwathResult<Vec<_>>>()?;

        Ok(RowSlab {
            row_start: rows.start,
            coords,
            variables,
        })
    }
}

/// CF time units: a step length and an epoch
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeUnits {
    /// Milliseconds per unit step
    step_ms: f64,
    /// Epoch in milliseconds since 1970-01-01
    epoch_ms: i64,
}

impl TimeUnits {
    fn parse(units: &str) -> SwathResult<Self> {
        let invalid = || SwathError::InvalidFormat(format!("Unsupported time units: {:?}", units));

        let (step, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
        let step_ms = match step.trim().to_ascii_lowercase().as_str() {
            "milliseconds" | "millisecond" | "ms" => 1.0,
            "seconds" | "second" | "secs" | "s" => 1_000.0,
            "minutes" | "minute" | "min" => 60_000.0,
            "hours" | "hour" | "h" => 3_600_000.0,
            "days" | "day" | "d" => 86_400_000.0,
            _ => return Err(invalid()),
        };

        let epoch = epoch
            .trim()
            .trim_end_matches('Z')
            .trim_end_matches(" UTC")
            .trim();
        let parsed = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(epoch, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(epoch, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(invalid)?;

        Ok(Self {
            step_ms,
            epoch_ms: parsed.and_utc().timestamp_millis(),
        })
    }

    fn to_millis(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        Some(self.epoch_ms + (value * self.step_ms).round() as i64)
    }
}

fn variable<'f>(file: &'f ::netcdf::File, name: &str) -> SwathResult<::netcdf::Variable<'f>> {
    file.variable(name)
        .ok_or_else(|| SwathError::MissingVariable(name.to_string()))
}

/// Apply `_FillValue`, `scale_factor` and `add_offset`
fn unpack(var: &::netcdf::Variable, raw: Vec<f64>) -> Vec<f64> {
    let fill = get_f64_attr(var, "_FillValue");
    let scale = get_f64_attr(var, "scale_factor").unwrap_or(1.0);
    let offset = get_f64_attr(var, "add_offset").unwrap_or(0.0);

    raw.into_iter()
        .map(|v| {
            if fill.map(|f| v == f).unwrap_or(false) {
                f64::NAN
            } else {
                v * scale + offset
            }
        })
        .collect()
}

/// Checking first avoids HDF5 error spam for optional attributes.
fn has_attr(var: &::netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &::netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn get_str_attr(var: &::netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        ::netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}
