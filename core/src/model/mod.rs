//! # Graph of operators
//!
//! A [`Graph`] is a directed acyclic graph of [`Node`]s. Each node holds one
//! [`Op`](crate::ops::Op), a list of inputs (the outlets it consumes) and a
//! list of outputs, each carrying a [`Fact`] (datum type, shape, and constant
//! value when it is known) and the list of inlets consuming it.
//!
//! Graphs are produced by the [`Tracer`](crate::trace::Tracer) or by parsing
//! an ONNX protobuf, executed by [`SimplePlan`](crate::plan::SimplePlan) and
//! rewritten by [`GraphPatch`]es.
mod compact;
mod fact;
mod graph;
mod node;
pub mod order;
mod patch;

pub use self::fact::{Dim, Fact};
pub use self::graph::Graph;
pub use self::node::{InletId, Node, Outlet, OutletId};
pub use self::order::eval_order;
pub use self::patch::GraphPatch;
