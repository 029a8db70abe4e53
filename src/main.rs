//! SwathDB CLI
//!
//! Command-line interface for SwathDB operations:
//! - Build or update a tile index
//! - Point an index at a relocated dataset
//! - Inspect an index
//! - Query samples inside a box

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use swathdb::config::{generate_default_config, Config, LoggingConfig};
use swathdb::index::{FingerprintMode, IndexBuilder, IndexError, SpatialIndex};
use swathdb::query::{parse_timestamp, BoxQuery, QueryEngine, RefineMode};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "swathdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tile index and bounding-box queries for satellite swath files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build or update an index from a data directory
    Build {
        /// Directory holding the swath files
        #[arg(long)]
        data_dir: PathBuf,
        /// Index artifact to write
        #[arg(long)]
        index_file: PathBuf,
        /// Update the existing index instead of starting over; a missing
        /// index file starts a new one
        #[arg(long)]
        load_existing: bool,
        /// Along-track rows per tile
        #[arg(long)]
        tile_size: Option<usize>,
        /// File name glob
        #[arg(long)]
        pattern: Option<String>,
        /// Parallel file readers (0 = one per CPU)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Drop records for files that no longer exist
        #[arg(long)]
        prune: bool,
        /// Re-tile every file, allowing a tile size change
        #[arg(long)]
        rebuild: bool,
        /// Detect changes by CRC32 instead of size and mtime
        #[arg(long)]
        checksum: bool,
        /// Save the index every N newly tiled files
        #[arg(long)]
        checkpoint_interval: Option<usize>,
    },

    /// Point an index at a new data directory
    Remap {
        #[arg(long)]
        index_file: PathBuf,
        #[arg(long)]
        new_base_path: PathBuf,
    },

    /// Show index statistics
    Info {
        #[arg(long)]
        index_file: PathBuf,
        /// Include the per-file listing
        #[arg(long)]
        list_files: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Return samples inside a latitude/longitude/time box
    Query {
        #[arg(long)]
        index_file: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        lat_min: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat_max: f64,
        /// Western edge; greater than lon-max means the box crosses 0°/360°
        #[arg(long, allow_negative_numbers = true)]
        lon_min: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon_max: f64,
        /// Inclusive start (RFC 3339 or YYYY-MM-DD[ HH:MM:SS])
        #[arg(long)]
        time_start: Option<String>,
        /// Inclusive end
        #[arg(long)]
        time_end: Option<String>,
        /// Variables to return, comma-separated. Defaults to `[query]
        /// variables` in the config file, which is empty out of the box, so
        /// only row/col/time/latitude/longitude are written unless one is named
        #[arg(long, value_delimiter = ',')]
        variables: Vec<String>,
        /// Return every sample of a matching row
        #[arg(long)]
        lines: bool,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Build {
            data_dir,
            index_file,
            load_existing,
            tile_size,
            pattern,
            jobs,
            prune,
            rebuild,
            checksum,
            checkpoint_interval,
        } => {
            let mut options = config.build_options();
            if let Some(n) = tile_size {
                options.tile_size = n;
            }
            if let Some(p) = pattern {
                options.pattern = p;
            }
            if let Some(n) = jobs {
                options.jobs = n;
            }
            if let Some(n) = checkpoint_interval {
                options.checkpoint_interval = n;
            }
            if checksum {
                options.fingerprint = FingerprintMode::Checksum;
            }
            options.prune = prune;
            options.rebuild = rebuild;

            let existing = existing_index(&index_file, load_existing)?;

            let builder = IndexBuilder::new(&data_dir, options).persist_to(&index_file);
            let cancel = builder.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing files in progress");
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let (index, report) = builder
                .build(existing)
                .await
                .map_err(|err| rebuild_hint(err, format!("Failed to build index from {:?}", data_dir)))?;

            println!("{}", report);
            if report.cancelled {
                return Err(IndexError::Cancelled.into());
            }
            info!(
                "Wrote {:?}: {} files, {} tiles",
                index_file,
                index.file_count(),
                index.tile_count()
            );
        }

        Commands::Remap {
            index_file,
            new_base_path,
        } => {
            let mut index = load_index(&index_file)?;
            let new_base_path = if new_base_path.is_dir() {
                std::fs::canonicalize(&new_base_path)?
            } else {
                warn!("{:?} is not a directory, storing it as given", new_base_path);
                new_base_path
            };

            let old = index.base_path().to_path_buf();
            index.remap_base_path(&new_base_path);
            index
                .save(&index_file)
                .with_context(|| format!("Failed to save {:?}", index_file))?;
            println!("Remapped {:?} -> {:?}", old, new_base_path);
        }

        Commands::Info {
            index_file,
            list_files,
            json,
        } => {
            let index = load_index(&index_file)?;
            if json {
                println!("{}", index.to_json(list_files)?);
            } else {
                println!("{}", index.summary(list_files));
            }
        }

        Commands::Query {
            index_file,
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            time_start,
            time_end,
            variables,
            lines,
            output,
            format,
        } => {
            let index = load_index(&index_file)?;
            if !index.is_complete() {
                warn!("Index {:?} is incomplete, results may be partial", index_file);
            }

            let variables = if variables.is_empty() {
                config.query.variables.clone()
            } else {
                variables
            };
            let refine = if lines {
                RefineMode::Lines
            } else {
                config.query.refine
            };

            let mut request = BoxQuery::new(lat_min, lat_max, lon_min, lon_max)
                .variables(variables)
                .refine(refine);
            if let Some(s) = time_start {
                request = request.time_start(parse_timestamp(&s)?);
            }
            if let Some(s) = time_end {
                request = request.time_end(parse_timestamp(&s)?);
            }

            let engine = QueryEngine::new(Arc::new(index)).with_jobs(config.query.jobs);
            let result = engine.execute(&request).await?;

            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
                )),
                None => Box::new(io::stdout().lock()),
            };
            match format {
                OutputFormat::Csv => result.write_csv(writer)?,
                OutputFormat::Json => result.write_json(writer)?,
            }

            info!(
                "{} samples from {} files ({} warnings) in {}ms",
                result.stats.samples_returned,
                result.files.len(),
                result.warnings.len(),
                result.stats.execution_time_ms
            );
        }

        Commands::Config { output } => {
            let config = generate_default_config();
            if let Some(path) = output {
                std::fs::write(&path, &config)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Config written to {:?}", path);
            } else {
                print!("{}", config);
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swathdb={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        _ => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
}

fn load_index(path: &Path) -> anyhow::Result<SpatialIndex> {
    if !path.exists() {
        bail!("Index file {:?} does not exist", path);
    }
    SpatialIndex::load(path).map_err(|err| rebuild_hint(err, format!("Failed to load index {:?}", path)))
}

/// Index to update for `build`, if any.
///
/// With `--load-existing` a missing file starts a fresh index, so scheduled
/// jobs can always pass the flag. A file that exists but cannot be loaded
/// is still an error.
fn existing_index(path: &Path, load_existing: bool) -> anyhow::Result<Option<SpatialIndex>> {
    if !load_existing {
        return Ok(None);
    }
    if !path.exists() {
        info!("No index at {:?}, starting a new one", path);
        return Ok(None);
    }
    load_index(path).map(Some)
}

fn rebuild_hint(err: IndexError, context: String) -> anyhow::Error {
    if err.is_version_mismatch() {
        anyhow::Error::new(err).context(format!("{} (rerun build with --rebuild to re-tile)", context))
    } else {
        anyhow::Error::new(err).context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_index_missing_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("first_run.swix");

        assert!(existing_index(&path, true).unwrap().is_none());
        assert!(existing_index(&path, false).unwrap().is_none());
    }

    #[test]
    fn test_existing_index_loads_saved_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.swix");
        SpatialIndex::new(dir.path(), 493).save(&path).unwrap();

        let loaded = existing_index(&path, true).unwrap().unwrap();
        assert_eq!(loaded.tile_size(), 493);
        assert!(existing_index(&path, false).unwrap().is_none());
    }

    #[test]
    fn test_existing_index_corrupt_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.swix");
        std::fs::write(&path, b"not an index").unwrap();

        assert!(existing_index(&path, true).is_err());
    }

    #[test]
    fn test_rebuild_hint_on_mismatch() {
        let err = rebuild_hint(
            IndexError::TileSizeMismatch {
                existing: 493,
                requested: 100,
            },
            "Failed to build".into(),
        );
        assert!(err.to_string().contains("--rebuild"));

        let err = rebuild_hint(IndexError::Cancelled, "Failed to build".into());
        assert_eq!(err.to_string(), "Failed to build");
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "swathdb",
            "build",
            "--data-dir",
            "/data",
            "--index-file",
            "/data/index.swix",
            "--load-existing",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Build { load_existing: true, .. }));
    }
}
