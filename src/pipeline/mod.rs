//! Pipeline stages of a refresh run.
//!
//! - `CandidateStream`: pages stale, in-window records out of the store
//! - `WorkerPool`: fetches and writes back each candidate concurrently
//! - `WriteBackApplier`: persists refreshed metrics to every target table
//! - `run_refresh`: wires the stages together for one pass

pub mod candidates;
pub mod dispatch;
pub mod refresh;
pub mod writeback;

pub use candidates::CandidateStream;
pub use dispatch::{DispatchSummary, ItemOutcome, RetryPolicy, WorkerPool};
pub use refresh::{RefreshDeps, RunReport, dry_run, run_refresh};
pub use writeback::WriteBackApplier;
