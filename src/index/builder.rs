//! Incremental index build
//!
//! # Flow
//!
//! ```text
//! discover_files(data_dir, pattern)        sorted relative paths
//!        ↓
//! ┌──────────── worker pool (jobs) ────────────┐
//! │ cancelled? → fingerprint → unchanged?      │
//! │            → open → build_tiles → record   │
//! └────────────────────────────────────────────┘
//!        ↓ (one result at a time)
//! coordinator: add_file, checkpoint every N, prune, save
//! ```
//!
//! Workers never touch the index. Every mutation happens on the
//! coordinating task, so the index needs no locking.

use crate::index::error::{IndexError, IndexResult};
use crate::index::fingerprint::{Fingerprint, FingerprintMode};
use crate::index::store::SpatialIndex;
use crate::index::tiler::build_tiles;
use crate::index::{relative_key, FileRecord};
use crate::swath::{DefaultSource, SwathSource};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Knobs for one build run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Rows per tile
    pub tile_size: usize,
    /// File name glob (`*`, `?`, `[..]`, `{a,b}`)
    pub pattern: String,
    /// Worker count, 0 = one per CPU
    pub jobs: usize,
    pub fingerprint: FingerprintMode,
    /// Drop records whose file no longer exists
    pub prune: bool,
    /// Discard the existing index and re-tile everything
    pub rebuild: bool,
    /// Save a checkpoint every N newly tiled files, 0 = never
    pub checkpoint_interval: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tile_size: 493,
            pattern: "*.swath".to_string(),
            jobs: 0,
            fingerprint: FingerprintMode::Metadata,
            prune: false,
            rebuild: false,
            checkpoint_interval: 0,
        }
    }
}

impl BuildOptions {
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

/// A file left out of the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// What a build run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub discovered: usize,
    pub tiled: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedFile>,
    pub pruned: Vec<String>,
    pub tiles_written: usize,
    pub checkpoints: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Discovered:  {}", self.discovered)?;
        writeln!(f, "Tiled:       {} ({} tiles)", self.tiled, self.tiles_written)?;
        writeln!(f, "Unchanged:   {}", self.unchanged)?;
        writeln!(f, "Skipped:     {}", self.skipped.len())?;
        for s in &self.skipped {
            writeln!(f, "  {}: {}", s.path, s.reason)?;
        }
        if !self.pruned.is_empty() {
            writeln!(f, "Pruned:      {}", self.pruned.len())?;
        }
        if self.checkpoints > 0 {
            writeln!(f, "Checkpoints: {}", self.checkpoints)?;
        }
        if self.cancelled {
            writeln!(f, "Cancelled:   yes")?;
        }
        write!(f, "Elapsed:     {:.2}s", self.elapsed_ms as f64 / 1000.0)
    }
}

enum FileOutcome {
    Tiled(FileRecord),
    Unchanged,
    Skipped(String),
    Cancelled,
}

struct FileJob {
    relative_path: String,
    absolute_path: PathBuf,
    previous: Option<Fingerprint>,
}

/// Builds or updates a [`SpatialIndex`] from a data directory
pub struct IndexBuilder {
    data_dir: PathBuf,
    options: BuildOptions,
    source: Arc<dyn SwathSource>,
    cancel: Arc<AtomicBool>,
    index_file: Option<PathBuf>,
}

impl IndexBuilder {
    pub fn new(data_dir: impl Into<PathBuf>, options: BuildOptions) -> Self {
        Self {
            data_dir: data_dir.into(),
            options,
            source: Arc::new(DefaultSource),
            cancel: Arc::new(AtomicBool::new(false)),
            index_file: None,
        }
    }

    /// Read files through a custom source
    pub fn with_source(mut self, source: Arc<dyn SwathSource>) -> Self {
        self.source = source;
        self
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Save checkpoints and the finished index to `path`
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    /// Setting this flag stops the build at the next file boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the build, starting from `existing` when given.
    ///
    /// On cancellation the returned index is marked incomplete and nothing
    /// beyond the checkpoints already written is saved.
    pub async fn build(&self, existing: Option<SpatialIndex>) -> IndexResult<(SpatialIndex, BuildReport)> {
        let started = Instant::now();

        let tile_size = NonZeroUsize::new(self.options.tile_size)
            .ok_or(IndexError::InvalidTileSize(self.options.tile_size))?;
        if !self.data_dir.is_dir() {
            return Err(IndexError::InvalidDataDir(self.data_dir.clone()));
        }
        let data_dir = std::fs::canonicalize(&self.data_dir)?;

        let mut index = self.starting_index(existing, &data_dir)?;
        let files = discover_files(&data_dir, &self.options.pattern)?;

        let mut report = BuildReport {
            discovered: files.len(),
            ..Default::default()
        };
        info!(
            "Indexing {:?}: {} files match {:?}, {} already indexed",
            data_dir,
            files.len(),
            self.options.pattern,
            index.file_count()
        );

        let jobs: Vec<FileJob> = files
            .iter()
            .map(|(relative_path, absolute_path)| FileJob {
                relative_path: relative_path.clone(),
                absolute_path: absolute_path.clone(),
                previous: index.get(relative_path).map(|r| r.fingerprint),
            })
            .collect();

        let mode = self.options.fingerprint;
        let mut results = stream::iter(jobs)
            .map(|job| {
                let source = self.source.clone();
                let cancel = self.cancel.clone();
                async move {
                    let relative_path = job.relative_path.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        if cancel.load(Ordering::SeqCst) {
                            return FileOutcome::Cancelled;
                        }
                        process_file(source.as_ref(), &job, tile_size, mode)
                    })
                    .await
                    .unwrap_or_else(|e| FileOutcome::Skipped(format!("worker failed: {}", e)));
                    (relative_path, outcome)
                }
            })
            .buffer_unordered(self.options.effective_jobs());

        let mut since_checkpoint = 0;
        while let Some((relative_path, outcome)) = results.next().await {
            match outcome {
                FileOutcome::Tiled(record) => {
                    debug!("Tiled {} ({} tiles)", relative_path, record.tiles.len());
                    report.tiled += 1;
                    report.tiles_written += record.tiles.len();
                    index.add_file(relative_path, record);

                    since_checkpoint += 1;
                    if self.options.checkpoint_interval > 0
                        && since_checkpoint >= self.options.checkpoint_interval
                    {
                        since_checkpoint = 0;
                        self.checkpoint(&mut index, &mut report);
                    }
                }
                FileOutcome::Unchanged => {
                    report.unchanged += 1;
                }
                FileOutcome::Skipped(reason) => {
                    warn!("Skipping {}: {}", relative_path, reason);
                    // Old tiles no longer describe the file
                    index.remove_file(&relative_path);
                    report.skipped.push(SkippedFile {
                        path: relative_path,
                        reason,
                    });
                }
                FileOutcome::Cancelled => {}
            }
        }

        report.skipped.sort_by(|a, b| a.path.cmp(&b.path));

        if self.cancel.load(Ordering::SeqCst) {
            warn!(
                "Build cancelled after {} of {} files",
                report.tiled + report.unchanged + report.skipped.len(),
                report.discovered
            );
            index.set_complete(false);
            report.cancelled = true;
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok((index, report));
        }

        if self.options.prune {
            let existing: HashSet<String> = files.into_iter().map(|(rel, _)| rel).collect();
            report.pruned = index.remove_stale(&existing);
            if !report.pruned.is_empty() {
                info!("Pruned {} records for deleted files", report.pruned.len());
            }
        }

        index.set_complete(true);
        if let Some(path) = &self.index_file {
            index.save(path)?;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Build finished: {} tiled, {} unchanged, {} skipped in {}ms",
            report.tiled,
            report.unchanged,
            report.skipped.len(),
            report.elapsed_ms
        );
        Ok((index, report))
    }

    fn starting_index(&self, existing: Option<SpatialIndex>, data_dir: &Path) -> IndexResult<SpatialIndex> {
        let tile_size = self.options.tile_size;

        match existing {
            Some(existing) if self.options.rebuild => {
                info!(
                    "Rebuild requested, discarding {} existing records",
                    existing.file_count()
                );
                Ok(SpatialIndex::new(data_dir, tile_size))
            }
            Some(existing) if existing.tile_size() != tile_size => Err(IndexError::TileSizeMismatch {
                existing: existing.tile_size(),
                requested: tile_size,
            }),
            Some(mut existing) => {
                if existing.base_path() != data_dir {
                    warn!(
                        "Existing index is rooted at {:?}, using {:?}",
                        existing.base_path(),
                        data_dir
                    );
                    existing.remap_base_path(data_dir);
                }
                if !existing.is_complete() {
                    info!("Resuming from checkpoint with {} files", existing.file_count());
                }
                Ok(existing)
            }
            None => Ok(SpatialIndex::new(data_dir, tile_size)),
        }
    }

    fn checkpoint(&self, index: &mut SpatialIndex, report: &mut BuildReport) {
        let Some(path) = &self.index_file else {
            return;
        };

        index.set_complete(false);
        match index.save(path) {
            Ok(()) => report.checkpoints += 1,
            Err(e) => warn!("Checkpoint to {:?} failed: {}", path, e),
        }
    }
}

fn process_file(
    source: &dyn SwathSource,
    job: &FileJob,
    tile_size: NonZeroUsize,
    mode: FingerprintMode,
) -> FileOutcome {
    let fingerprint = match Fingerprint::compute(&job.absolute_path, mode) {
        Ok(fp) => fp,
        Err(e) => return FileOutcome::Skipped(format!("cannot stat file: {}", e)),
    };
    if job.previous == Some(fingerprint) {
        return FileOutcome::Unchanged;
    }

    let mut handle = match source.open(&job.absolute_path) {
        Ok(h) => h,
        Err(e) => return FileOutcome::Skipped(e.to_string()),
    };
    let tiles = match build_tiles(handle.as_mut(), tile_size) {
        Ok(t) => t,
        Err(e) => return FileOutcome::Skipped(e.to_string()),
    };

    let (rows, cols) = (tiles.rows(), tiles.cols());
    FileOutcome::Tiled(FileRecord {
        relative_path: job.relative_path.clone(),
        tiles: tiles.collect(),
        fingerprint,
        rows,
        cols,
        indexed_at: Utc::now().timestamp_millis(),
    })
}

/// Find files under `data_dir` whose name matches `pattern`.
///
/// Patterns containing `/` are matched against the relative path instead of
/// the file name. Returns `(relative_path, absolute_path)` sorted by
/// relative path.
pub fn discover_files(data_dir: &Path, pattern: &str) -> IndexResult<Vec<(String, PathBuf)>> {
    let matcher = glob_to_regex(pattern)?;
    let match_path = pattern.contains('/');
    let mut found = Vec::new();

    for entry in WalkDir::new(data_dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Cannot read directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(data_dir) else {
            continue;
        };
        let relative = relative_key(relative);
        let candidate = if match_path {
            relative.as_str()
        } else {
            relative.rsplit('/').next().unwrap_or(&relative)
        };

        if matcher.is_match(candidate) {
            found.push((relative, entry.into_path()));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Translate a shell glob into an anchored regex
fn glob_to_regex(pattern: &str) -> IndexResult<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut in_braces = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == '\\' {
                        re.push_str("\\\\");
                        continue;
                    }
                    re.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            '{' if !in_braces => {
                in_braces = true;
                re.push_str("(?:");
            }
            '}' if in_braces => {
                in_braces = false;
                re.push(')');
            }
            ',' if in_braces => re.push('|'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| IndexError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swath::synthetic::SyntheticSwath;
    use crate::swath::{SwathHandle, SwathResult};
    use std::sync::atomic::AtomicUsize;
    use tempfile::{tempdir, TempDir};

    fn write_passes(dir: &Path, count: usize) {
        for i in 0..count {
            SyntheticSwath::new(120, 5)
                .longitude(10.0 * i as f64, 0.01)
                .time(1_683_676_800_000 + i as i64 * 3_600_000, 1_000)
                .write(dir.join(format!("pass_{:03}.swath", i)))
                .unwrap();
        }
    }

    fn options(tile_size: usize) -> BuildOptions {
        BuildOptions {
            tile_size,
            jobs: 2,
            ..Default::default()
        }
    }

    fn dataset(count: usize) -> TempDir {
        let dir = tempdir().unwrap();
        write_passes(dir.path(), count);
        dir
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("*.swath").unwrap();
        assert!(re.is_match("pass_001.swath"));
        assert!(!re.is_match("pass_001.swath.bak"));
        assert!(!re.is_match("dir/pass_001.swath"));

        let re = glob_to_regex("SWOT_L2_??_*.nc").unwrap();
        assert!(re.is_match("SWOT_L2_LR_SSH.nc"));
        assert!(!re.is_match("SWOT_L2_LRX_SSH.nc"));

        let re = glob_to_regex("*.{nc,nc4}").unwrap();
        assert!(re.is_match("a.nc4") && re.is_match("a.nc"));
        assert!(!re.is_match("a.swath"));

        let re = glob_to_regex("pass_[!0]*.swath").unwrap();
        assert!(re.is_match("pass_1.swath"));
        assert!(!re.is_match("pass_0.swath"));
    }

    #[test]
    fn test_discover_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cycle_2")).unwrap();
        std::fs::create_dir_all(dir.path().join("cycle_1")).unwrap();
        for p in ["cycle_2/b.swath", "cycle_1/z.swath", "a.swath", "notes.txt"] {
            std::fs::write(dir.path().join(p), b"x").unwrap();
        }

        let found = discover_files(dir.path(), "*.swath").unwrap();
        let names: Vec<_> = found.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(names, vec!["a.swath", "cycle_1/z.swath", "cycle_2/b.swath"]);

        let found = discover_files(dir.path(), "cycle_1/*.swath").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_build_from_scratch() {
        let dir = dataset(3);
        let (index, report) = IndexBuilder::new(dir.path(), options(50))
            .build(None)
            .await
            .unwrap();

        assert!(index.is_complete());
        assert_eq!(index.file_count(), 3);
        // 120 rows at 50 per tile
        assert_eq!(index.tile_count(), 9);
        assert_eq!(report.tiled, 3);
        assert_eq!(report.tiles_written, 9);
        assert!(index.base_path().is_absolute());

        let record = index.get("pass_001.swath").unwrap();
        assert_eq!((record.rows, record.cols), (120, 5));
    }

    #[tokio::test]
    async fn test_incremental_build_is_idempotent() {
        let dir = dataset(3);
        let builder = IndexBuilder::new(dir.path(), options(50));

        let (first, _) = builder.build(None).await.unwrap();
        let (second, report) = builder.build(Some(first.clone())).await.unwrap();

        assert_eq!(second, first);
        assert_eq!(report.tiled, 0);
        assert_eq!(report.unchanged, 3);
    }

    #[tokio::test]
    async fn test_changed_file_is_retiled() {
        let dir = dataset(2);
        let opts = BuildOptions {
            fingerprint: FingerprintMode::Checksum,
            ..options(50)
        };
        let builder = IndexBuilder::new(dir.path(), opts);
        let (first, _) = builder.build(None).await.unwrap();

        SyntheticSwath::new(200, 5)
            .write(dir.path().join("pass_000.swath"))
            .unwrap();
        let (second, report) = builder.build(Some(first)).await.unwrap();

        assert_eq!(report.tiled, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(second.get("pass_000.swath").unwrap().tiles.len(), 4);
    }

    #[tokio::test]
    async fn test_unreadable_file_skipped() {
        let dir = dataset(2);
        std::fs::write(dir.path().join("broken.swath"), b"not a swath").unwrap();

        let (index, report) = IndexBuilder::new(dir.path(), options(50))
            .build(None)
            .await
            .unwrap();

        assert_eq!(index.file_count(), 2);
        assert!(!index.contains("broken.swath"));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "broken.swath");
    }

    #[tokio::test]
    async fn test_tile_size_mismatch_and_rebuild() {
        let dir = dataset(1);
        let (existing, _) = IndexBuilder::new(dir.path(), options(50))
            .build(None)
            .await
            .unwrap();

        let err = IndexBuilder::new(dir.path(), options(60))
            .build(Some(existing.clone()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::TileSizeMismatch {
                existing: 50,
                requested: 60
            }
        ));

        let rebuild = BuildOptions {
            rebuild: true,
            ..options(60)
        };
        let (index, report) = IndexBuilder::new(dir.path(), rebuild)
            .build(Some(existing))
            .await
            .unwrap();
        assert_eq!(index.tile_size(), 60);
        assert_eq!(report.tiled, 1);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let dir = dataset(1);
        let err = IndexBuilder::new(dir.path(), options(0)).build(None).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidTileSize(0)));

        let err = IndexBuilder::new(dir.path().join("missing"), options(10))
            .build(None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidDataDir(_)));
    }

    #[tokio::test]
    async fn test_prune_deleted_files() {
        let dir = dataset(3);
        let (first, _) = IndexBuilder::new(dir.path(), options(50)).build(None).await.unwrap();
        std::fs::remove_file(dir.path().join("pass_002.swath")).unwrap();

        let (kept, _) = IndexBuilder::new(dir.path(), options(50))
            .build(Some(first.clone()))
            .await
            .unwrap();
        assert_eq!(kept.file_count(), 3);

        let prune = BuildOptions {
            prune: true,
            ..options(50)
        };
        let (pruned, report) = IndexBuilder::new(dir.path(), prune)
            .build(Some(first))
            .await
            .unwrap();
        assert_eq!(pruned.file_count(), 2);
        assert_eq!(report.pruned, vec!["pass_002.swath".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_build_keeps_previous_index() {
        let dir = dataset(3);
        let index_file = dir.path().join("index.swix");

        let (previous, _) = IndexBuilder::new(dir.path(), options(50))
            .persist_to(&index_file)
            .build(None)
            .await
            .unwrap();
        write_passes(&dir.path().join("more"), 2);

        let builder = IndexBuilder::new(dir.path(), options(50)).persist_to(&index_file);
        builder.cancel_flag().store(true, Ordering::SeqCst);
        let (index, report) = builder.build(Some(previous.clone())).await.unwrap();

        assert!(report.cancelled);
        assert!(!index.is_complete());
        assert_eq!(SpatialIndex::load(&index_file).unwrap(), previous);
    }

    /// Raises the cancel flag once `limit` files have been opened
    struct CancelAfter {
        opened: AtomicUsize,
        limit: usize,
        cancel: Arc<AtomicBool>,
    }

    impl SwathSource for CancelAfter {
        fn open(&self, path: &Path) -> SwathResult<Box<dyn SwathHandle>> {
            if self.opened.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.cancel.store(true, Ordering::SeqCst);
            }
            DefaultSource.open(path)
        }
    }

    #[tokio::test]
    async fn test_checkpoint_and_resume() {
        let dir = dataset(5);
        let index_file = dir.path().join("index.swix");
        let cancel = Arc::new(AtomicBool::new(false));
        let opts = BuildOptions {
            jobs: 1,
            checkpoint_interval: 1,
            ..options(50)
        };

        let source = Arc::new(CancelAfter {
            opened: AtomicUsize::new(0),
            limit: 2,
            cancel: cancel.clone(),
        });
        let (_, report) = IndexBuilder::new(dir.path(), opts.clone())
            .with_source(source)
            .with_cancel_flag(cancel)
            .persist_to(&index_file)
            .build(None)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.checkpoints, 2);

        let checkpoint = SpatialIndex::load(&index_file).unwrap();
        assert!(!checkpoint.is_complete());
        assert_eq!(checkpoint.file_count(), 2);

        let (resumed, report) = IndexBuilder::new(dir.path(), opts)
            .persist_to(&index_file)
            .build(Some(checkpoint))
            .await
            .unwrap();
        assert!(resumed.is_complete());
        assert_eq!(resumed.file_count(), 5);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.tiled, 3);
        assert!(SpatialIndex::load(&index_file).unwrap().is_complete());
    }
}
