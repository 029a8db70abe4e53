//! In-memory tile index and its persisted artifact
//!
//! Artifact layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (32 bytes)                       │
//! │   magic: [u8; 4] = "SWIX"               │
//! │   schema_version: u16                   │
//! │   flags: u16 (bit 0 = LZ4 payload)      │
//! │   payload_len: u64                      │
//! │   payload_checksum: u32                 │
//! │   reserved: [u8; 8]                     │
//! │   header_checksum: u32                  │
//! ├─────────────────────────────────────────┤
//! │ PAYLOAD                                 │
//! │   lz4(bincode(SpatialIndex))            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Saves are atomic: the artifact is written to a sibling temp file, synced,
//! then renamed over the target. A reader never sees a half-written index.

use crate::index::error::{IndexError, IndexResult};
use crate::index::geo::{LatRange, LonRange, SearchBox};
use crate::index::{FileRecord, TileRecord};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for index artifact identification
const INDEX_MAGIC: [u8; 4] = *b"SWIX";

/// Current artifact schema version
pub const INDEX_SCHEMA_VERSION: u16 = 1;

const HEADER_SIZE: usize = 32;

const FLAG_LZ4: u16 = 1;

/// The tile index for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialIndex {
    base_path: PathBuf,
    tile_size: usize,
    files: BTreeMap<String, FileRecord>,
    complete: bool,
}

impl SpatialIndex {
    /// Create an empty index rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>, tile_size: usize) -> Self {
        Self {
            base_path: base_path.into(),
            tile_size,
            files: BTreeMap::new(),
            complete: false,
        }
    }

    // ==================== Accessors ====================

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Whether the last build that wrote this index finished
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    /// File records in sorted path order
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.files.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.files.contains_key(relative_path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn tile_count(&self) -> usize {
        self.files.values().map(|f| f.tiles.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute path of an indexed file under the current base path
    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .fold(self.base_path.clone(), |acc, part| acc.join(part))
    }

    // ==================== Mutation ====================

    /// Insert or replace the record for `relative_path`.
    ///
    /// Replacing discards every tile of the previous record. Returns the
    /// replaced record, if any.
    pub fn add_file(&mut self, relative_path: impl Into<String>, mut record: FileRecord) -> Option<FileRecord> {
        let key = relative_path.into().replace('\\', "/");
        record.relative_path = key.clone();
        self.files.insert(key, record)
    }

    pub fn remove_file(&mut self, relative_path: &str) -> Option<FileRecord> {
        self.files.remove(relative_path)
    }

    /// Drop records whose path is not in `existing`. Returns removed paths.
    pub fn remove_stale(&mut self, existing: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .files
            .keys()
            .filter(|k| !existing.contains(*k))
            .cloned()
            .collect();

        for key in &stale {
            self.files.remove(key);
            debug!("Pruned stale record {}", key);
        }
        stale
    }

    /// Point the index at a relocated dataset. Records are untouched.
    pub fn remap_base_path(&mut self, new_base_path: impl Into<PathBuf>) {
        self.base_path = new_base_path.into();
    }

    // ==================== Query ====================

    /// Linear scan for tiles that may hold samples inside `search`
    pub fn tiles_overlapping<'a>(
        &'a self,
        search: &'a SearchBox,
    ) -> impl Iterator<Item = (&'a str, &'a TileRecord)> + 'a {
        self.files.iter().flat_map(move |(path, record)| {
            record
                .tiles
                .iter()
                .filter(move |t| t.overlaps(search))
                .map(move |t| (path.as_str(), t))
        })
    }

    /// Aggregate statistics, optionally with the file list
    pub fn summary(&self, list_files: bool) -> IndexSummary {
        let live = || self.files.values().flat_map(|f| f.tiles.iter()).filter(|t| !t.is_empty());

        let time_range = self
            .files
            .values()
            .filter_map(|f| f.time_range())
            .reduce(|(lo, hi), (min, max)| (lo.min(min), hi.max(max)));
        let lat_range = live()
            .map(|t| t.lat_range())
            .reduce(|a, b| a.union(&b));
        let lon_range = LonRange::covering(live().map(|t| t.lon_range()));

        IndexSummary {
            base_path: self.base_path.clone(),
            tile_size: self.tile_size,
            file_count: self.file_count(),
            tile_count: self.tile_count(),
            valid_points: self.files.values().map(|f| f.valid_points()).sum(),
            time_range,
            lat_range,
            lon_range,
            complete: self.complete,
            files: list_files.then(|| self.files.keys().cloned().collect()),
        }
    }

    /// Pretty JSON summary for tooling
    pub fn to_json(&self, list_files: bool) -> IndexResult<String> {
        Ok(serde_json::to_string_pretty(&self.summary(list_files))?)
    }

    // ==================== Persistence ====================

    /// Serialize to the artifact format
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        let payload = lz4_flex::compress_prepend_size(&bincode::serialize(self)?);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&INDEX_MAGIC);
        header[4..6].copy_from_slice(&INDEX_SCHEMA_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&FLAG_LZ4.to_le_bytes());
        header[8..16].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        header[16..20].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        // bytes 20-27 reserved
        let checksum = crc32fast::hash(&header[0..28]);
        header[28..32].copy_from_slice(&checksum.to_le_bytes());

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse and validate an artifact
    pub fn from_bytes(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(IndexError::Corruption(format!(
                "Artifact too short: {} bytes",
                bytes.len()
            )));
        }
        let header = &bytes[0..HEADER_SIZE];

        if header[0..4] != INDEX_MAGIC {
            return Err(IndexError::Corruption(format!(
                "Invalid magic: {:?}",
                &header[0..4]
            )));
        }

        let stored = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        let computed = crc32fast::hash(&header[0..28]);
        if stored != computed {
            return Err(IndexError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored, computed
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != INDEX_SCHEMA_VERSION {
            return Err(IndexError::SchemaVersion {
                found: version,
                expected: INDEX_SCHEMA_VERSION,
            });
        }

        let flags = u16::from_le_bytes([header[6], header[7]]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes) as usize;

        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(IndexError::Corruption(format!(
                "Payload is {} bytes, header says {}",
                payload.len(),
                payload_len
            )));
        }

        let stored = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
        if crc32fast::hash(payload) != stored {
            return Err(IndexError::Corruption("Payload checksum mismatch".into()));
        }

        let raw = if flags & FLAG_LZ4 != 0 {
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| IndexError::Corruption(format!("LZ4 decompression failed: {}", e)))?
        } else {
            payload.to_vec()
        };

        Ok(bincode::deserialize(&raw)?)
    }

    /// Atomically write the artifact to `path`
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        let bytes = self.to_bytes()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let result = (|| -> IndexResult<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result?;

        info!(
            "Saved index: {} files, {} tiles{} -> {:?}",
            self.file_count(),
            self.tile_count(),
            if self.complete { "" } else { " (checkpoint)" },
            path
        );
        Ok(())
    }

    /// Read and validate the artifact at `path`
    pub fn load(path: &Path) -> IndexResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let index = Self::from_bytes(&bytes)?;
        debug!(
            "Loaded index from {:?}: {} files, {} tiles",
            path,
            index.file_count(),
            index.tile_count()
        );
        Ok(index)
    }
}

/// Aggregate statistics of an index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub base_path: PathBuf,
    pub tile_size: usize,
    pub file_count: usize,
    pub tile_count: usize,
    pub valid_points: u64,
    /// Earliest and latest valid time (ms since epoch)
    pub time_range: Option<(i64, i64)>,
    pub lat_range: Option<LatRange>,
    /// Smallest wrap-aware interval covering every tile
    pub lon_range: Option<LonRange>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

fn format_millis(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

impl fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Base path:   {}", self.base_path.display())?;
        writeln!(f, "Tile size:   {} rows", self.tile_size)?;
        writeln!(f, "Files:       {}", self.file_count)?;
        writeln!(f, "Tiles:       {}", self.tile_count)?;
        writeln!(f, "Points:      {}", self.valid_points)?;
        writeln!(f, "Complete:    {}", if self.complete { "yes" } else { "no (checkpoint)" })?;

        match self.time_range {
            Some((lo, hi)) => writeln!(f, "Time range:  {} .. {}", format_millis(lo), format_millis(hi))?,
            None => writeln!(f, "Time range:  -")?,
        }
        match self.lat_range {
            Some(r) => writeln!(f, "Latitude:    {:.4} .. {:.4}", r.min, r.max)?,
            None => writeln!(f, "Latitude:    -")?,
        }
        match self.lon_range {
            Some(r) if r.wraps() => writeln!(
                f,
                "Longitude:   {:.4} .. {:.4} (wraps 0/360, {:.1}° wide)",
                r.min,
                r.max,
                r.width()
            )?,
            Some(r) => writeln!(f, "Longitude:   {:.4} .. {:.4} ({:.1}° wide)", r.min, r.max, r.width())?,
            None => writeln!(f, "Longitude:   -")?,
        }

        if let Some(files) = &self.files {
            writeln!(f, "\nIndexed files:")?;
            for file in files {
                writeln!(f, "  {}", file)?;
            }
        }
        Ok(())
    }
}
