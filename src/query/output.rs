//! Query result container and writers
//!
//! Samples are stored column-wise. Files are referenced by position in
//! [`SampleTable::files`] so the path is not repeated per sample.

use crate::query::error::{QueryResult, QueryWarning};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::io::Write;

/// Column-oriented matched samples
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleTable {
    /// Relative paths referenced by `file`
    pub files: Vec<String>,
    /// Index into `files`
    pub file: Vec<u32>,
    pub row: Vec<u64>,
    pub col: Vec<u32>,
    pub latitude: Vec<f64>,
    /// As stored in the source file
    pub longitude: Vec<f64>,
    /// ms since epoch
    pub time: Vec<Option<i64>>,
    /// Requested variables in request order
    pub variables: Vec<(String, Vec<f64>)>,
}

impl SampleTable {
    /// Empty table with one column per requested variable
    pub fn new(variables: &[String]) -> Self {
        Self {
            variables: variables.iter().map(|v| (v.clone(), Vec::new())).collect(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    pub fn variable(&self, name: &str) -> Option<&[f64]> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Relative path of the sample at `i`
    pub fn file_of(&self, i: usize) -> &str {
        &self.files[self.file[i] as usize]
    }

    /// Append another table's samples after this one's
    pub fn append(&mut self, other: SampleTable) {
        let offset = self.files.len() as u32;
        self.files.extend(other.files);
        self.file.extend(other.file.into_iter().map(|f| f + offset));
        self.row.extend(other.row);
        self.col.extend(other.col);
        self.latitude.extend(other.latitude);
        self.longitude.extend(other.longitude);
        self.time.extend(other.time);

        for ((_, mine), (_, theirs)) in self.variables.iter_mut().zip(other.variables) {
            mine.extend(theirs);
        }
    }

    /// Write one CSV record per sample
    pub fn write_csv<W: Write>(&self, writer: W) -> QueryResult<()> {
        let mut out = csv::Writer::from_writer(writer);

        let mut header = vec!["file", "row", "col", "latitude", "longitude", "time"];
        header.extend(self.variables.iter().map(|(n, _)| n.as_str()));
        out.write_record(&header)?;

        for i in 0..self.len() {
            let mut record = vec![
                self.file_of(i).to_string(),
                self.row[i].to_string(),
                self.col[i].to_string(),
                self.latitude[i].to_string(),
                self.longitude[i].to_string(),
                self.time[i].map(format_time).unwrap_or_default(),
            ];
            record.extend(self.variables.iter().map(|(_, v)| v[i].to_string()));
            out.write_record(&record)?;
        }

        out.flush()?;
        Ok(())
    }

    /// JSON array of one object per sample
    pub fn to_json_records(&self) -> Value {
        let records = (0..self.len())
            .map(|i| {
                let mut obj = Map::new();
                obj.insert("file".into(), json!(self.file_of(i)));
                obj.insert("row".into(), json!(self.row[i]));
                obj.insert("col".into(), json!(self.col[i]));
                obj.insert("latitude".into(), finite(self.latitude[i]));
                obj.insert("longitude".into(), finite(self.longitude[i]));
                obj.insert("time".into(), json!(self.time[i].map(format_time)));
                for (name, values) in &self.variables {
                    obj.insert(name.clone(), finite(values[i]));
                }
                Value::Object(obj)
            })
            .collect();
        Value::Array(records)
    }
}

/// A query result: samples, contributing files, warnings, stats
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub table: SampleTable,
    /// Files that contributed at least one sample, in output order
    pub files: Vec<String>,
    pub warnings: Vec<QueryWarning>,
    pub stats: QueryStats,
}

impl QueryOutput {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Samples, files, warnings and stats as one JSON document
    pub fn write_json<W: Write>(&self, mut writer: W) -> QueryResult<()> {
        let doc = json!({
            "stats": self.stats,
            "files": self.files,
            "warnings": self.warnings,
            "samples": self.table.to_json_records(),
        });
        serde_json::to_writer_pretty(&mut writer, &doc)?;
        writeln!(writer)?;
        Ok(())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> QueryResult<()> {
        self.table.write_csv(writer)
    }
}

/// Counters collected while executing a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub tiles_scanned: usize,
    pub tiles_selected: usize,
    pub files_selected: usize,
    pub rows_read: usize,
    pub samples_returned: usize,
    pub execution_time_ms: u64,
}

fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// JSON has no NaN; fill becomes null
fn finite(v: f64) -> Value {
    if v.is_finite() {
        json!(v)
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(file: &str, rows: &[u64]) -> SampleTable {
        let mut t = SampleTable::new(&["ssha".to_string()]);
        t.files.push(file.to_string());
        for &r in rows {
            t.file.push(0);
            t.row.push(r);
            t.col.push(1);
            t.latitude.push(1.5);
            t.longitude.push(359.5);
            t.time.push(Some(1_683_676_800_000));
            t.variables[0].1.push(r as f64 * 10.0);
        }
        t
    }

    #[test]
    fn test_append_offsets_file_indexes() {
        let mut all = table("a.swath", &[0, 1]);
        all.append(table("b.swath", &[7]));

        assert_eq!(all.len(), 3);
        assert_eq!(all.file_of(2), "b.swath");
        assert_eq!(all.variable("ssha").unwrap(), &[0.0, 10.0, 70.0]);
    }

    #[test]
    fn test_csv_output() {
        let mut buf = Vec::new();
        table("cycle_1/a.swath", &[3]).write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "file,row,col,latitude,longitude,time,ssha");
        assert_eq!(
            lines.next().unwrap(),
            "cycle_1/a.swath,3,1,1.5,359.5,2023-05-10T00:00:00.000Z,30"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_csv_has_header_only() {
        let mut buf = Vec::new();
        SampleTable::new(&["swh".to_string()]).write_csv(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "file,row,col,latitude,longitude,time,swh\n");
    }

    #[test]
    fn test_json_output_nulls_fill() {
        let mut t = table("a.swath", &[0]);
        t.variables[0].1[0] = f64::NAN;
        let output = QueryOutput {
            files: t.files.clone(),
            table: t,
            ..Default::default()
        };

        let mut buf = Vec::new();
        output.write_json(&mut buf).unwrap();
        let value: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["samples"][0]["ssha"], Value::Null);
        assert_eq!(value["samples"][0]["row"], 0);
        assert_eq!(value["files"][0], "a.swath");
    }
}
