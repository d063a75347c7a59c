#![forbid(unsafe_code)]

//! Core data model and pipeline for the Medtrack medication timeline.
//!
//! This crate provides:
//! - Domain types (log rows, rules, doses, timeline rows)
//! - Rule compilation and the default medication catalog
//! - The pipeline stages (normalize, split, extract, constrain, aggregate)
//! - Configuration, logging and row loading

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod rules;
pub mod normalize;
pub mod events;
pub mod extract;
pub mod constraints;
pub mod timeline;
pub mod pipeline;
pub mod sheet;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::default_rules;
pub use config::{Config, DEFAULT_WIDTH_HOURS};
pub use rules::RuleSet;
pub use normalize::{normalize_rows, parse_timestamp, DroppedRow};
pub use events::to_entries;
pub use extract::{extract_all, extract_doses};
pub use constraints::{evaluate, ConstraintReport, ConstraintViolation, UnitMismatch};
pub use timeline::build_timeline;
pub use pipeline::{run, run_lookback, PipelineOutput, PipelineStats};
pub use sheet::read_rows;
