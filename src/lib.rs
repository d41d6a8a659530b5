use std::env;

use anyhow::{Context, Result};
use env_logger::Builder;
use log::LevelFilter;
use ndarray::Array2;

use crate::cli::LogLevel;
use crate::joining::bionj::BionjMatrix;
use crate::joining::bounding::BoundingBionjMatrix;
use crate::joining::nj::NjMatrix;
use crate::joining::JoinMethod;
use crate::tree::newick::to_newick_string;

pub mod cli;
pub mod error;
pub mod joining;
pub mod matrix;
pub mod tree;

#[macro_use]
extern crate log;

/// Install the global logger. The CLI verbosity sets the base filter; an
/// explicit `RUST_LOG` refines it. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Quiet => LevelFilter::Error,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
    };
    let mut builder = Builder::new();
    builder.filter_level(filter);
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    let _ = builder.try_init();
}

/// The single entry point for bindings.
///
/// - `dist`: square distance matrix (n x n), already symmetric
/// - `labels`: length n
/// - `method`: which joining variant to run
///
/// Returns the Newick text (one line, trailing newline included).
pub fn run_fast_nj_from_memory(
    dist: Array2<f64>,
    labels: Vec<String>,
    method: JoinMethod,
) -> Result<String> {
    let forest = match method {
        JoinMethod::Nj => NjMatrix::from_parts(&dist, &labels)?.run()?,
        JoinMethod::Bionj => BionjMatrix::from_parts(&dist, &labels)?.run()?,
        JoinMethod::RapidBionj => {
            let (forest, visited) = BoundingBionjMatrix::from_parts(&dist, &labels)?.run()?;
            info!("Bounded search visited {visited} sorted-row entries");
            forest
        }
    };
    to_newick_string(&forest).context("rendering the joined tree")
}
