//! Export pipeline behind the `onnxport` command line.
//!
//! [`export::export`] takes [`params::ExportParams`] from a checkpoint to a
//! validated `.onnx` file, then hands the artifact to [`repair`], whose
//! failures never fail the export.
#[macro_use]
extern crate log;

pub mod export;
pub mod params;
pub mod repair;

pub use self::export::{ExportReport, export};
pub use self::params::ExportParams;
pub use self::repair::{GraphOptimizer, GraphSimplifier, RepairReport};
