//! Bounding-box query requests
//!
//! ```rust,ignore
//! let request = BoxQuery::new(-10.0, 10.0, 350.0, 10.0)
//!     .time_start(parse_timestamp("2023-05-10")?)
//!     .time_end(parse_timestamp("2023-05-17")?)
//!     .variables(["ssha", "swh"]);
//! ```

use crate::index::geo::{LatRange, LonRange, SearchBox, TimeBounds};
use crate::query::error::{QueryError, QueryResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// How matching samples are selected from a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefineMode {
    /// Keep only samples inside the box
    #[default]
    Points,
    /// Keep every sample of a row that has at least one sample inside the box
    Lines,
}

impl std::str::FromStr for RefineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "points" => Ok(RefineMode::Points),
            "lines" => Ok(RefineMode::Lines),
            other => Err(format!("unknown refine mode: {}", other)),
        }
    }
}

/// A spatial-temporal box plus the variables to return
#[derive(Debug, Clone, PartialEq)]
pub struct BoxQuery {
    pub lat_min: f64,
    pub lat_max: f64,
    /// Any convention; `lon_min > lon_max` after normalization wraps
    pub lon_min: f64,
    pub lon_max: f64,
    /// Inclusive, ms since epoch; `None` is unbounded
    pub time_start: Option<i64>,
    pub time_end: Option<i64>,
    pub variables: Vec<String>,
    pub refine: RefineMode,
}

impl BoxQuery {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            time_start: None,
            time_end: None,
            variables: Vec::new(),
            refine: RefineMode::Points,
        }
    }

    pub fn time_start(mut self, ms: i64) -> Self {
        self.time_start = Some(ms);
        self
    }

    pub fn time_end(mut self, ms: i64) -> Self {
        self.time_end = Some(ms);
        self
    }

    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn refine(mut self, mode: RefineMode) -> Self {
        self.refine = mode;
        self
    }

    /// Check the request and normalize it into a [`SearchBox`]
    pub fn validate(&self) -> QueryResult<SearchBox> {
        let bounds = [
            ("lat_min", self.lat_min),
            ("lat_max", self.lat_max),
            ("lon_min", self.lon_min),
            ("lon_max", self.lon_max),
        ];
        if let Some((name, value)) = bounds.iter().find(|(_, v)| !v.is_finite()) {
            return Err(QueryError::InvalidQuery(format!("{} is not finite: {}", name, value)));
        }

        if self.lat_min > self.lat_max {
            return Err(QueryError::InvalidQuery(format!(
                "lat_min {} is greater than lat_max {}",
                self.lat_min, self.lat_max
            )));
        }
        if self.lat_min < -90.0 || self.lat_max > 90.0 {
            return Err(QueryError::InvalidQuery(format!(
                "latitude range {}..{} is outside [-90, 90]",
                self.lat_min, self.lat_max
            )));
        }

        if let (Some(start), Some(end)) = (self.time_start, self.time_end) {
            if start > end {
                return Err(QueryError::InvalidQuery(format!(
                    "time_start {} is after time_end {}",
                    start, end
                )));
            }
        }

        if let Some(empty) = self.variables.iter().position(|v| v.trim().is_empty()) {
            return Err(QueryError::InvalidQuery(format!(
                "variable #{} has an empty name",
                empty + 1
            )));
        }

        Ok(SearchBox {
            lat: LatRange::new(self.lat_min, self.lat_max),
            lon: LonRange::from_bounds(self.lon_min, self.lon_max),
            time: TimeBounds::new(self.time_start, self.time_end),
        })
    }
}

/// Parse a UTC timestamp into ms since epoch.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.f]`, `YYYY-MM-DD HH:MM:SS[.f]`
/// and bare dates (midnight).
pub fn parse_timestamp(s: &str) -> QueryResult<i64> {
    let s = s.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t.and_utc().timestamp_millis());
        }
    }
    if let Some(t) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc().timestamp_millis());
    }

    Err(QueryError::InvalidQuery(format!("cannot parse timestamp: {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_longitudes_normalize() {
        let search = BoxQuery::new(-10.0, 10.0, -20.0, 20.0).validate().unwrap();
        assert_eq!(search.lon, LonRange::new(340.0, 20.0));
        assert!(search.lon.wraps());

        let search = BoxQuery::new(-10.0, 10.0, -180.0, 180.0).validate().unwrap();
        assert!(search.lon.is_full());
    }

    #[test]
    fn test_inverted_latitude_rejected() {
        let err = BoxQuery::new(10.0, -10.0, 0.0, 10.0).validate().unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_out_of_range_and_nan_rejected() {
        assert!(BoxQuery::new(-91.0, 0.0, 0.0, 10.0).validate().is_err());
        assert!(BoxQuery::new(0.0, 10.0, f64::NAN, 10.0).validate().is_err());
        assert!(BoxQuery::new(0.0, 10.0, 0.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_time_range() {
        let q = BoxQuery::new(0.0, 1.0, 0.0, 1.0);
        assert!(q.clone().time_start(10).time_end(5).validate().is_err());

        let search = q.clone().time_start(5).time_end(5).validate().unwrap();
        assert_eq!(search.time, TimeBounds::new(Some(5), Some(5)));

        let search = q.time_end(5).validate().unwrap();
        assert_eq!(search.time.start, None);
    }

    #[test]
    fn test_empty_variable_rejected() {
        let q = BoxQuery::new(0.0, 1.0, 0.0, 1.0).variables(["ssha", " "]);
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("2023-05-10").unwrap(), 1_683_676_800_000);
        assert_eq!(parse_timestamp("2023-05-10T00:00:01").unwrap(), 1_683_676_801_000);
        assert_eq!(parse_timestamp("2023-05-10 00:00:00.250").unwrap(), 1_683_676_800_250);
        assert_eq!(parse_timestamp("2023-05-10T02:00:00+02:00").unwrap(), 1_683_676_800_000);
        assert!(parse_timestamp("last tuesday").is_err());
    }

    #[test]
    fn test_refine_mode_parse() {
        assert_eq!("lines".parse::<RefineMode>().unwrap(), RefineMode::Lines);
        assert_eq!(RefineMode::default(), RefineMode::Points);
    }
}
