//! Query Executor
//!
//! Executes a [`BoxQuery`] against a [`SpatialIndex`]:
//! 1. Validate and normalize the box
//! 2. Plan: select tiles, group by file, merge row ranges
//! 3. Read each selected file (scoped handle, worker pool)
//! 4. Refine samples against the exact box
//! 5. Concatenate in path order
//!
//! # Execution Pipeline
//!
//! ```text
//! BoxQuery → SearchBox → Plan → Read (parallel) → Refine → Merge (ordered)
//! ```
//!
//! Missing and unreadable files become warnings on the output. Only an
//! invalid request fails the whole query.

use crate::index::geo::SearchBox;
use crate::index::SpatialIndex;
use crate::query::error::{QueryError, QueryResult, QueryWarning};
use crate::query::output::{QueryOutput, QueryStats, SampleTable};
use crate::query::planner::{plan, FilePlan, QueryPlan};
use crate::query::request::{BoxQuery, RefineMode};
use crate::swath::{DefaultSource, RowSlab, SwathError, SwathSource};
use futures_util::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Samples and row count read from one file
type FileResult = QueryResult<(SampleTable, usize)>;

/// Runs queries against a shared index
pub struct QueryEngine {
    index: Arc<SpatialIndex>,
    source: Arc<dyn SwathSource>,
    jobs: usize,
}

impl QueryEngine {
    /// Create an engine reading files with the default source
    pub fn new(index: Arc<SpatialIndex>) -> Self {
        Self {
            index,
            source: Arc::new(DefaultSource),
            jobs: num_cpus::get(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SwathSource>) -> Self {
        self.source = source;
        self
    }

    /// Maximum files read concurrently, 0 = one per CPU
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        self
    }

    /// Execute a query, reading selected files in parallel
    pub async fn execute(&self, request: &BoxQuery) -> QueryResult<QueryOutput> {
        let start = Instant::now();
        let search = request.validate()?;
        let plan = plan(&self.index, &search);
        log_plan(&plan);

        let variables = Arc::new(request.variables.clone());
        let refine = request.refine;

        let mut results: Vec<(usize, String, FileResult)> = stream::iter(plan.files.iter().cloned().enumerate())
            .map(|(i, file_plan)| {
                let source = self.source.clone();
                let index = self.index.clone();
                let variables = variables.clone();
                async move {
                    let relative_path = file_plan.relative_path.clone();
                    let path = index.resolve(&relative_path);
                    let result = tokio::task::spawn_blocking({
                        let path = path.clone();
                        move || read_file(source.as_ref(), &path, &file_plan, &search, &variables, refine)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(QueryError::UnreadableFile {
                            path,
                            source: SwathError::Io(std::io::Error::other(format!(
                                "reader task failed: {}",
                                e
                            ))),
                        })
                    });
                    (i, relative_path, result)
                }
            })
            .buffer_unordered(self.jobs)
            .collect()
            .await;

        results.sort_by_key(|(i, _, _)| *i);
        assemble(
            &plan,
            request,
            results.into_iter().map(|(_, path, result)| (path, result)),
            start,
        )
    }
}

/// Execute a query on the calling thread with the default source
pub fn query(index: &SpatialIndex, request: &BoxQuery) -> QueryResult<QueryOutput> {
    query_with_source(index, &DefaultSource, request)
}

/// Execute a query on the calling thread, reading files through `source`
pub fn query_with_source(
    index: &SpatialIndex,
    source: &dyn SwathSource,
    request: &BoxQuery,
) -> QueryResult<QueryOutput> {
    let start = Instant::now();
    let search = request.validate()?;
    let plan = plan(index, &search);
    log_plan(&plan);

    let results = plan.files.iter().map(|file_plan| {
        let path = index.resolve(&file_plan.relative_path);
        let result = read_file(
            source,
            &path,
            file_plan,
            &search,
            &request.variables,
            request.refine,
        );
        (file_plan.relative_path.clone(), result)
    });

    assemble(&plan, request, results, start)
}

fn log_plan(plan: &QueryPlan) {
    info!(
        "Query selected {} of {} tiles in {} files",
        plan.tiles_selected,
        plan.tiles_scanned,
        plan.files.len()
    );
}

/// Concatenate per-file results in plan order
fn assemble(
    plan: &QueryPlan,
    request: &BoxQuery,
    results: impl Iterator<Item = (String, FileResult)>,
    start: Instant,
) -> QueryResult<QueryOutput> {
    let mut output = QueryOutput {
        table: SampleTable::new(&request.variables),
        stats: QueryStats {
            tiles_scanned: plan.tiles_scanned,
            tiles_selected: plan.tiles_selected,
            files_selected: plan.files.len(),
            ..Default::default()
        },
        ..Default::default()
    };

    for (relative_path, result) in results {
        match result {
            Ok((table, rows_read)) => {
                output.stats.rows_read += rows_read;
                if !table.is_empty() {
                    output.files.push(relative_path);
                    output.table.append(table);
                }
            }
            Err(err) => match QueryWarning::from_error(&relative_path, &err) {
                Some(warning) => {
                    warn!("{}", warning);
                    output.warnings.push(warning);
                }
                None => return Err(err),
            },
        }
    }

    output.stats.samples_returned = output.table.len();
    output.stats.execution_time_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Query returned {} samples from {} files in {}ms",
        output.stats.samples_returned,
        output.files.len(),
        output.stats.execution_time_ms
    );
    Ok(output)
}

/// Open one file, read its planned ranges and refine the samples
fn read_file(
    source: &dyn SwathSource,
    path: &Path,
    file_plan: &FilePlan,
    search: &SearchBox,
    variables: &[String],
    refine: RefineMode,
) -> FileResult {
    if !path.exists() {
        return Err(QueryError::MissingFile(path.to_path_buf()));
    }
    let unreadable = |source: SwathError| QueryError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    };

    let mut handle = source.open(path).map_err(unreadable)?;
    let mut table = SampleTable::new(variables);
    table.files.push(file_plan.relative_path.clone());
    let mut rows_read = 0;

    for range in &file_plan.ranges {
        let slab = handle.read(variables, range.clone()).map_err(unreadable)?;
        rows_read += slab.rows();
        refine_slab(&slab, search, refine, &mut table);
    }

    Ok((table, rows_read))
}

/// Append the samples of `slab` that satisfy `search`
fn refine_slab(slab: &RowSlab, search: &SearchBox, mode: RefineMode, table: &mut SampleTable) {
    let coords = &slab.coords;
    let cols = coords.cols;

    for (r, row) in slab.row_range().enumerate() {
        let Some(time) = coords.time[r] else {
            continue;
        };
        let lats = coords.row_latitude(r);
        let lons = coords.row_longitude(r);
        let inside = |c: usize| search.contains(lats[c], lons[c], time);

        let keep: Vec<usize> = match mode {
            RefineMode::Points => (0..cols).filter(|&c| inside(c)).collect(),
            RefineMode::Lines if (0..cols).any(inside) => (0..cols).collect(),
            RefineMode::Lines => Vec::new(),
        };

        for c in keep {
            let sample = r * cols + c;
            table.file.push(0);
            table.row.push(row as u64);
            table.col.push(c as u32);
            table.latitude.push(lats[c]);
            table.longitude.push(lons[c]);
            table.time.push(Some(time));
            for ((_, out), (_, values)) in table.variables.iter_mut().zip(&slab.variables) {
                out.push(values[sample]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_tiles, FileRecord, Fingerprint, FingerprintMode};
    use crate::query::error::WarningKind;
    use crate::swath::synthetic::SyntheticSwath;
    use std::collections::BTreeSet;
    use std::num::NonZeroUsize;
    use tempfile::{tempdir, TempDir};

    const TILE: usize = 40;

    /// Three passes: two mid-latitude, one crossing 0/360
    fn passes() -> Vec<(&'static str, SyntheticSwath)> {
        vec![
            ("cycle_1/pass_001.swath", SyntheticSwath::new(200, 6)),
            (
                "cycle_1/pass_002.swath",
                SyntheticSwath::new(200, 6)
                    .longitude(359.0, 0.01)
                    .time(1_683_680_400_000, 1_000),
            ),
            (
                "cycle_2/pass_001.swath",
                SyntheticSwath::new(150, 6)
                    .latitude(30.0, 0.02)
                    .longitude(-60.0, 0.02)
                    .signed_longitude(true)
                    .time(1_683_763_200_000, 1_000),
            ),
        ]
    }

    fn index_dataset() -> (TempDir, SpatialIndex) {
        let dir = tempdir().unwrap();
        let mut index = SpatialIndex::new(dir.path(), TILE);

        for (rel, mut swath) in passes() {
            let path = swath.write(dir.path().join(rel)).unwrap();
            let tiles = build_tiles(&mut swath, NonZeroUsize::new(TILE).unwrap()).unwrap();
            let record = FileRecord {
                relative_path: rel.to_string(),
                rows: tiles.rows(),
                cols: tiles.cols(),
                tiles: tiles.collect(),
                fingerprint: Fingerprint::compute(&path, FingerprintMode::Metadata).unwrap(),
                indexed_at: 0,
            };
            index.add_file(rel, record);
        }
        index.set_complete(true);
        (dir, index)
    }

    fn keys(output: &QueryOutput) -> BTreeSet<(String, u64, u32)> {
        (0..output.len())
            .map(|i| {
                let t = &output.table;
                (t.file_of(i).to_string(), t.row[i], t.col[i])
            })
            .collect()
    }

    /// Count synthetic samples inside a box without the index
    fn brute_force(request: &BoxQuery) -> usize {
        let search = request.validate().unwrap();
        passes()
            .iter()
            .map(|(_, s)| {
                (0..s.rows)
                    .flat_map(|r| (0..s.cols).map(move |c| (r, c)))
                    .filter(|&(r, c)| {
                        let (lat, lon) = s.sample(r, c);
                        s.row_time(r).map_or(false, |t| search.contains(lat, lon, t))
                    })
                    .count()
            })
            .sum()
    }

    #[test]
    fn test_full_coverage_returns_every_point() {
        let (_dir, index) = index_dataset();
        let request = BoxQuery::new(-90.0, 90.0, -180.0, 180.0).variables(["ssha"]);
        let output = query(&index, &request).unwrap();

        assert_eq!(output.len(), 200 * 6 + 200 * 6 + 150 * 6);
        assert!(output.warnings.is_empty());
        assert_eq!(
            output.files,
            vec![
                "cycle_1/pass_001.swath",
                "cycle_1/pass_002.swath",
                "cycle_2/pass_001.swath"
            ]
        );

        // Ordered by file, then row, then column
        let t = &output.table;
        assert_eq!((t.row[0], t.col[0]), (0, 0));
        assert_eq!((t.row[6], t.col[6]), (1, 0));
        assert_eq!(t.variable("ssha").unwrap()[7], 1001.0);
    }

    #[test]
    fn test_box_matches_brute_force() {
        let (_dir, index) = index_dataset();
        let request = BoxQuery::new(-9.5, -8.7, 100.0, 100.5)
            .time_start(1_683_676_800_000)
            .time_end(1_683_676_800_000 + 150_000);
        let output = query(&index, &request).unwrap();

        assert!(!output.is_empty());
        assert_eq!(output.len(), brute_force(&request));
        assert!(output.stats.tiles_selected < output.stats.tiles_scanned);
        for i in 0..output.len() {
            assert!(output.table.latitude[i] >= -9.5 && output.table.latitude[i] <= -8.7);
            assert!(output.table.time[i].unwrap() <= 1_683_676_800_000 + 150_000);
        }
    }

    #[test]
    fn test_latitude_outside_data_is_empty() {
        let (_dir, index) = index_dataset();
        let request = BoxQuery::new(80.0, 80.0, -180.0, 180.0).variables(["ssha", "swh"]);
        let output = query(&index, &request).unwrap();

        assert!(output.is_empty());
        assert!(output.warnings.is_empty());
        assert_eq!(output.table.variables.len(), 2);
        assert_eq!(output.stats.files_selected, 0);
    }

    #[test]
    fn test_antimeridian_box_is_union_of_halves() {
        let (_dir, index) = index_dataset();
        let whole = query(&index, &BoxQuery::new(-90.0, 90.0, -2.0, 2.0)).unwrap();
        let west = query(&index, &BoxQuery::new(-90.0, 90.0, -2.0, 0.0)).unwrap();
        let east = query(&index, &BoxQuery::new(-90.0, 90.0, 0.0, 2.0)).unwrap();

        assert!(!west.is_empty() && !east.is_empty());
        let union: BTreeSet<_> = keys(&west).union(&keys(&east)).cloned().collect();
        assert_eq!(keys(&whole), union);
        assert_eq!(whole.len(), brute_force(&BoxQuery::new(-90.0, 90.0, -2.0, 2.0)));
    }

    #[test]
    fn test_signed_longitudes_in_file() {
        let (_dir, index) = index_dataset();
        let request = BoxQuery::new(-90.0, 90.0, 295.0, 305.0);
        let output = query(&index, &request).unwrap();

        assert_eq!(output.files, vec!["cycle_2/pass_001.swath"]);
        assert_eq!(output.len(), brute_force(&request));
        // Values come back as stored
        assert!(output.table.longitude.iter().all(|&l| l < 0.0));
    }

    #[test]
    fn test_lines_mode_keeps_whole_rows() {
        let (_dir, index) = index_dataset();
        // Rows 100..110 of the first pass span 100.45..100.6 cross-track
        let narrow = BoxQuery::new(-9.0, -8.9, 100.4, 100.5);

        let points = query(&index, &narrow).unwrap();
        let lines = query(&index, &narrow.clone().refine(RefineMode::Lines)).unwrap();

        assert!(points.len() < lines.len());
        assert_eq!(lines.len() % 6, 0);
        assert!(keys(&points).is_subset(&keys(&lines)));
    }

    #[test]
    fn test_missing_file_is_warning() {
        let (dir, index) = index_dataset();
        std::fs::remove_file(dir.path().join("cycle_1/pass_001.swath")).unwrap();

        let output = query(&index, &BoxQuery::new(-90.0, 90.0, -180.0, 180.0)).unwrap();
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].kind, WarningKind::MissingFile);
        assert_eq!(output.warnings[0].file, "cycle_1/pass_001.swath");
        assert_eq!(output.files.len(), 2);
    }

    #[test]
    fn test_unreadable_file_and_missing_variable_are_warnings() {
        let (dir, index) = index_dataset();
        std::fs::write(dir.path().join("cycle_1/pass_002.swath"), b"garbage").unwrap();

        let request = BoxQuery::new(-90.0, 90.0, -180.0, 180.0).variables(["sig0"]);
        let output = query(&index, &request).unwrap();

        assert_eq!(output.warnings.len(), 3);
        assert!(output
            .warnings
            .iter()
            .all(|w| w.kind == WarningKind::UnreadableFile));
        assert!(output.is_empty());
    }

    #[test]
    fn test_invalid_query_is_fatal() {
        let (_dir, index) = index_dataset();
        let err = query(&index, &BoxQuery::new(10.0, -10.0, 0.0, 1.0)).unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_query_after_remap() {
        let (dir, mut index) = index_dataset();
        let moved = tempdir().unwrap();
        let target = moved.path().join("archive");
        std::fs::rename(dir.path(), &target).unwrap();

        let request = BoxQuery::new(-90.0, 90.0, -180.0, 180.0);
        let stale = query(&index, &request).unwrap();
        assert_eq!(stale.warnings.len(), 3);

        index.remap_base_path(&target);
        let output = query(&index, &request).unwrap();
        assert!(output.warnings.is_empty());
        assert_eq!(output.len(), 200 * 6 + 200 * 6 + 150 * 6);
    }

    #[tokio::test]
    async fn test_engine_matches_blocking_query() {
        let (_dir, index) = index_dataset();
        let request = BoxQuery::new(-10.0, 5.0, -5.0, 120.0).variables(["ssha", "swh"]);

        let blocking = query(&index, &request).unwrap();
        let engine = QueryEngine::new(Arc::new(index)).with_jobs(2);
        let parallel = engine.execute(&request).await.unwrap();

        assert_eq!(parallel.table, blocking.table);
        assert_eq!(parallel.files, blocking.files);
        assert_eq!(parallel.stats.rows_read, blocking.stats.rows_read);
    }
}
