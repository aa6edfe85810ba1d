//! # onnxport-core
//!
//! Everything needed to turn an in-memory detection network into a graph of
//! ONNX-compatible operators, and to rewrite that graph afterwards.
//!
//! The crate is organised in two halves:
//!
//! * the *module tree* ([`nn`], [`zoo`]): layers holding named parameters,
//!   walked by the [`trace::Tracer`] during one forward pass,
//! * the *graph* ([`model`], [`ops`], [`plan`], [`optim`]): the recorded
//!   operators, an interpreter to run them, and the passes that simplify and
//!   fuse them.
//!
//! ## Example
//!
//! ```
//! use onnxport_core::internal::*;
//! use onnxport_core::ops::binary::Add;
//! use onnxport_core::plan::SimplePlan;
//!
//! // build a simple model that just add 3 to each input component
//! let mut model = Graph::default();
//! let input = model.add_source("input", Fact::f32([3])).unwrap();
//! let three = model.add_const("three", Tensor::from(ndarray::arr1(&[3f32; 3]).into_dyn())).unwrap();
//! let add = model.wire_node("add", Add, &[input, three]).unwrap();
//! model.set_output_outlets(&add).unwrap();
//!
//! let plan = SimplePlan::new(&model).unwrap();
//! let input = Tensor::from(ndarray::arr1(&[1.0f32, 2.5, 5.0]).into_dyn());
//! let outputs = plan.run(tvec!(input)).unwrap();
//! assert_eq!(outputs[0].as_f32().unwrap().as_slice().unwrap(), &[4.0, 5.5, 8.0]);
//! ```

#[macro_use]
extern crate derive_new;
#[allow(unused_imports)]
#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod checkpoint;
pub mod errors;
pub mod model;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod plan;
pub mod shape;
pub mod tensor;
pub mod trace;
pub mod zoo;

pub use anyhow;
pub use downcast_rs;
pub use dyn_clone;
pub use ndarray;
pub use smallvec;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used for node inputs and outputs, and tensor dimensions.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

pub mod prelude {
    pub use crate::TVec;
    pub use crate::errors::{ExportError, ExportResult};
    pub use crate::model::{Dim, Fact, Graph, InletId, Node, OutletId};
    pub use crate::tensor::{DatumType, Tensor};
    pub use crate::tvec;
}

pub mod internal {
    pub use crate::model::{GraphPatch, Outlet};
    pub use crate::nn::Layer;
    pub use crate::ops::Op;
    pub use crate::prelude::*;
    pub use anyhow::{Context as _, bail, ensure, format_err};
    pub use itertools::Itertools;
    pub use std::borrow::Cow;
    pub use std::collections::HashMap;
    pub use std::sync::Arc;
}

#[cfg(test)]
#[allow(dead_code)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("ONNXPORT_LOG").is_test(true).try_init();
}
