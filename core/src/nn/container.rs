use crate::internal::*;
use crate::trace::Tracer;

/// Children applied one after the other. They are named by index.
#[derive(Debug, Default)]
pub struct Sequential {
    pub layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Sequential {
        Sequential { layers }
    }
}

impl Layer for Sequential {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let mut wires: TVec<OutletId> = inputs.into();
        for (ix, layer) in self.layers.iter().enumerate() {
            wires = tracer.call(&ix.to_string(), layer.as_ref(), &wires)?;
        }
        Ok(wires)
    }

    fn children(&self) -> Vec<(String, &dyn Layer)> {
        self.layers.iter().enumerate().map(|(ix, l)| (ix.to_string(), l.as_ref())).collect()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Box<dyn Layer>)> {
        self.layers.iter_mut().enumerate().map(|(ix, l)| (ix.to_string(), l)).collect()
    }
}

/// Indexed children, called explicitly by their owner with
/// [`Tracer::call_item`].
#[derive(Debug, Default)]
pub struct ModuleList {
    pub layers: Vec<Box<dyn Layer>>,
}

impl ModuleList {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> ModuleList {
        ModuleList { layers }
    }
}

impl Layer for ModuleList {
    fn name(&self) -> &'static str {
        "ModuleList"
    }

    fn forward(&self, _: &mut Tracer, _: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        bail!("ModuleList has no forward pass, call its modules individually")
    }

    fn children(&self) -> Vec<(String, &dyn Layer)> {
        self.layers.iter().enumerate().map(|(ix, l)| (ix.to_string(), l.as_ref())).collect()
    }

    fn children_mut(&mut self) -> Vec<(String, &mut Box<dyn Layer>)> {
        self.layers.iter_mut().enumerate().map(|(ix, l)| (ix.to_string(), l)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Conv2d, ReLU};

    #[test]
    fn module_list_scopes() {
        let list = ModuleList::new(vec![
            Conv2d::new(1, 1, 1, 1, 1, false, 0).into(),
            Conv2d::new(1, 1, 1, 1, 1, false, 1).into(),
        ]);
        let mut tracer = Tracer::new();
        let x = tracer.input("x", Tensor::zero(&[1, 1, 2, 2])).unwrap();
        let y = tracer.call_item("stems", &list, 1, &[x]).unwrap();
        assert!(tracer.call_item("stems", &list, 2, &[x]).is_err());
        assert!(list.forward(&mut tracer, &[x]).is_err());
        let model = tracer.into_model();
        assert_eq!(model.node(y[0].node).name, "/stems/1/Conv");
        assert!(model.node_by_name("stems.1.weight").is_ok());
    }

    #[test]
    fn sequential_chains() {
        let seq = Sequential::new(vec![ReLU.into(), ReLU.into()]);
        let mut tracer = Tracer::new();
        let x = tracer.input("x", Tensor::random_normal(&[4], 0)).unwrap();
        let y = tracer.call1("seq", &seq, x).unwrap();
        let model = tracer.into_model();
        assert_eq!(model.node(y.node).name, "/seq/1/Relu");
        assert_eq!(model.nodes.len(), 3);
    }
}
