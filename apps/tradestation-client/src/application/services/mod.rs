//! Application Services
//!
//! Token management and the plan → fetch → merge pipeline for historical
//! bars.

pub mod chunk_planner;
pub mod historical;
pub mod merger;
pub mod parallel_fetcher;
pub mod token_manager;

pub use chunk_planner::{ChunkPlanner, DEFAULT_MAX_BARS_PER_CALL, PlanError};
pub use historical::{HistoricalBars, HistoricalError, HistoricalRequest, Recovery};
pub use merger::{ChunkBars, FailedChunk, FailureReason, MergeError, Merger};
pub use parallel_fetcher::{
    CancelPolicy, ChunkOutcome, ChunkReport, DEFAULT_MAX_WORKERS, FetchConfig, FetchReport,
    ParallelFetcher,
};
pub use token_manager::{DEFAULT_EXPIRY_SKEW, TokenManager};
