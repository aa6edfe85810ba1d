//! Module trees.
//!
//! A network is a tree of [`Layer`]s. Each layer owns its learnable
//! parameters and its children, and knows how to record its forward pass on
//! a [`Tracer`]. Paths in the tree are dotted child names, as in
//! `backbone.stem.conv`.
use std::fmt;

use downcast_rs::Downcast;

use crate::internal::*;
use crate::trace::Tracer;

mod activation;
mod batch_norm;
mod container;
mod conv;
mod pool;

pub use self::activation::{ExportSiLU, LeakyReLU, ReLU, SiLU, Sigmoid};
pub use self::batch_norm::BatchNorm2d;
pub use self::container::{ModuleList, Sequential};
pub use self::conv::Conv2d;
pub use self::pool::{MaxPool2d, Upsample};

pub trait Layer: fmt::Debug + Send + Sync + Downcast {
    /// Type name, used in dumps and error messages.
    fn name(&self) -> &'static str;

    /// Record the forward pass on the tracer.
    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>>;

    fn children(&self) -> Vec<(String, &dyn Layer)> {
        vec![]
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Box<dyn Layer>)> {
        vec![]
    }

    /// Own parameters (and buffers), not including children's.
    fn parameters(&self) -> Vec<(&'static str, &Tensor)> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        vec![]
    }

    fn set_training(&mut self, training: bool) {
        for (_, child) in self.children_mut() {
            child.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.children().iter().any(|(_, c)| c.is_training())
    }
}

downcast_rs::impl_downcast!(Layer);

impl<L: Layer> From<L> for Box<dyn Layer> {
    fn from(it: L) -> Box<dyn Layer> {
        Box::new(it)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") }
}

/// Depth-first, pre-order walk. The root has the empty path.
pub fn visit<'l>(root: &'l dyn Layer, f: &mut dyn FnMut(&str, &'l dyn Layer)) {
    fn rec<'l>(path: &str, layer: &'l dyn Layer, f: &mut dyn FnMut(&str, &'l dyn Layer)) {
        f(path, layer);
        for (name, child) in layer.children() {
            rec(&join(path, &name), child, f);
        }
    }
    rec("", root, f)
}

/// All parameters of the tree, by dotted path.
pub fn named_parameters(root: &dyn Layer) -> Vec<(String, &Tensor)> {
    let mut params = vec![];
    visit(root, &mut |path, layer| {
        for (name, t) in layer.parameters() {
            params.push((join(path, name), t));
        }
    });
    params
}

/// Apply `f` to every parameter of the tree, in [`named_parameters`] order.
pub fn for_each_parameter_mut(
    root: &mut dyn Layer,
    f: &mut dyn FnMut(&str, &mut Tensor) -> ExportResult<()>,
) -> ExportResult<()> {
    fn rec(
        path: &str,
        layer: &mut dyn Layer,
        f: &mut dyn FnMut(&str, &mut Tensor) -> ExportResult<()>,
    ) -> ExportResult<()> {
        for (name, t) in layer.parameters_mut() {
            f(&join(path, name), t)?;
        }
        for (name, child) in layer.children_mut() {
            rec(&join(path, &name), child.as_mut(), f)?;
        }
        Ok(())
    }
    rec("", root, f)
}

pub fn set_eval(root: &mut dyn Layer) {
    root.set_training(false)
}

/// Number of modules in the tree, root included.
pub fn count_modules(root: &dyn Layer) -> usize {
    let mut count = 0;
    visit(root, &mut |_, _| count += 1);
    count
}

/// Path and type name of every module, in walk order.
pub fn module_paths(root: &dyn Layer) -> Vec<(String, &'static str)> {
    let mut paths = vec![];
    visit(root, &mut |path, layer| paths.push((path.to_string(), layer.name())));
    paths
}

/// Replace every module of type `S` below `root` by a fresh one from `make`.
///
/// Replacements take the position and name of the module they replace. They
/// are not walked into. Returns the number of replaced modules.
pub fn replace_module<S: Layer, F: FnMut() -> Box<dyn Layer>>(
    root: &mut dyn Layer,
    mut make: F,
) -> usize {
    fn rec(
        layer: &mut dyn Layer,
        pred: &dyn Fn(&dyn Layer) -> bool,
        make: &mut dyn FnMut() -> Box<dyn Layer>,
    ) -> usize {
        let mut count = 0;
        for (name, child) in layer.children_mut() {
            if pred(&**child) {
                trace!("Replacing {} ({})", name, child.name());
                *child = make();
                count += 1;
            } else {
                count += rec(child.as_mut(), pred, make);
            }
        }
        count
    }
    let count = rec(root, &|l| l.is::<S>(), &mut make);
    debug!("Replaced {} {} module(s)", count, std::any::type_name::<S>());
    count
}
