//! Builder module for running counting jobs
//!
//! This module implements the counting pipeline:
//! 1. Validate the job configuration
//! 2. Size and allocate the counting table
//! 3. Fan sequences out over a thread pool, incrementing the shared table
//! 4. On probe-budget exhaustion, discard the table and rebuild larger
//! 5. Drain into a histogram and optional blacklist

pub mod config;
pub mod histogram_builder;

pub use config::CountConfiguration;
pub use histogram_builder::HistogramBuilder;
