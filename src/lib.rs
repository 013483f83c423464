//! mplarchive -- archive CI image-comparison artifacts into a browsable history.
//!
//! This crate provides the pipeline that takes a finished CI run's
//! comparison artifacts, files them under a per-run archive directory,
//! records the run in a bounded history ledger, regenerates the index page
//! from that ledger, and publishes the result with git.

pub mod collector;
pub mod config;
pub mod ledger;
pub mod namer;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod storage;
pub mod trigger;
pub mod writer;

pub use config::ArchiveConfig;
pub use pipeline::{Pipeline, PipelineOutcome, PipelineReport};
pub use trigger::{Conclusion, RunDescriptor};
