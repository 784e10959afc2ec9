//! Transformation module.
//!
//! - Walker: applies one step to every leaf of a container
//! - Combine: concatenates selected branches into one table
//! - Pipeline: runs a whole stage

pub mod combine;
pub mod pipeline;
pub mod walker;

pub use pipeline::{Loaded, RunOptions, RunReport, StageRunner};
pub use walker::{key_is_skipped, KeyFilter, Walker, COMBINE};
