//! # SwathDB
//!
//! Tile index and bounding-box query engine for satellite swath archives.
//!
//! ## Features
//!
//! - **Along-track tiling**: each file is cut into fixed row ranges summarized
//!   by their latitude, longitude and time extent
//! - **Antimeridian aware**: longitude intervals may wrap through 0°/360°
//! - **Incremental builds**: unchanged files are skipped by fingerprint,
//!   work runs on a bounded worker pool and can be cancelled
//! - **Compact artifact**: one checksummed, LZ4-compressed index file
//! - **Tolerant queries**: missing or unreadable files become warnings
//!
//! ## Modules
//!
//! - [`swath`]: source file access (`.swath` container, NetCDF, synthetic)
//! - [`index`]: tiling, the index store and the build driver
//! - [`query`]: request validation, planning, execution and output
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swathdb::index::{BuildOptions, IndexBuilder};
//! use swathdb::query::{query, BoxQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Index every .swath file under /data/swot
//!     let (index, report) = IndexBuilder::new("/data/swot", BuildOptions::default())
//!         .persist_to("/data/swot.swix")
//!         .build(None)
//!         .await?;
//!     println!("{}", report);
//!
//!     // Samples within a box crossing the antimeridian
//!     let request = BoxQuery::new(-10.0, 10.0, 350.0, 10.0).variables(["ssha"]);
//!     let output = query(&index, &request)?;
//!
//!     println!("Found {} samples in {} files", output.len(), output.files.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod query;
pub mod swath;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError};

pub use index::{
    BuildOptions, BuildReport, IndexBuilder, IndexError, IndexResult, IndexSummary, SpatialIndex,
};

pub use query::{
    query, BoxQuery, QueryEngine, QueryError, QueryOutput, QueryResult, QueryWarning, RefineMode,
};

pub use swath::{DefaultSource, SwathError, SwathHandle, SwathSource};
