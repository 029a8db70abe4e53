//! SwathDB Query Engine
//!
//! Answers "which samples fall inside this box" using the tile index:
//!
//! - **Request**: bounding box, time window, variables, refine mode
//! - **Planner**: tile selection and per-file row ranges
//! - **Executor**: parallel reads and sample-level refinement
//! - **Output**: column-oriented samples with CSV and JSON writers
//!
//! # Examples
//!
//! ## Blocking
//!
//! ```rust,ignore
//! use swathdb::query::{query, BoxQuery, parse_timestamp};
//!
//! let request = BoxQuery::new(-10.0, 10.0, 350.0, 10.0)
//!     .time_start(parse_timestamp("2023-05-10")?)
//!     .variables(["ssha"]);
//! let output = query(&index, &request)?;
//! output.write_csv(std::io::stdout())?;
//! ```
//!
//! ## Async
//!
//! ```rust,ignore
//! let engine = QueryEngine::new(Arc::new(index)).with_jobs(8);
//! let output = engine.execute(&request).await?;
//! for warning in &output.warnings {
//!     eprintln!("skipped {}", warning);
//! }
//! ```

mod error;
mod executor;
mod output;
mod planner;
mod request;

pub use error::{QueryError, QueryResult, QueryWarning, WarningKind};
pub use executor::{query, query_with_source, QueryEngine};
pub use output::{QueryOutput, QueryStats, SampleTable};
pub use planner::{merge_row_ranges, plan, FilePlan, QueryPlan};
pub use request::{parse_timestamp, BoxQuery, RefineMode};
