//! # onnxport-onnx
//!
//! ONNX side of the export: protobuf messages, translation between
//! [`Graph`](onnxport_core::model::Graph) and `ModelProto` in both
//! directions, and the structural checker gating the repair stage.
#[allow(unused_imports)]
#[macro_use]
extern crate log;

pub mod checker;
pub mod model;
pub mod ops;
pub mod pb_helpers;
pub mod ser;
pub mod tensor;

pub mod pb {
    #![allow(clippy::all)]
    include!("prost/onnx.rs");
}

pub use self::checker::check_model;
pub use self::model::{Onnx, onnx};
pub use self::ser::{ExportOptions, to_onnx};

/// Operator set version of the default domain, for writing and checking.
pub const OPSET_VERSION: i64 = 13;

/// IR version written in exported models (ONNX 1.7 and later).
pub const IR_VERSION: i64 = 7;

pub mod prelude {
    pub use crate::pb::ModelProto;
    pub use crate::{ExportOptions, Onnx, check_model, onnx, to_onnx};
}

#[cfg(test)]
#[allow(dead_code)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("ONNXPORT_LOG").is_test(true).try_init();
}
