//! Recording a forward pass as a graph.
//!
//! Layers call the [`Tracer`] instead of computing directly. Each call adds a
//! node to the graph and evaluates it right away, so a trace both builds the
//! graph and produces the outputs of the pass.
use crate::internal::*;

#[derive(Debug, Default)]
pub struct Tracer {
    model: Graph,
    values: HashMap<OutletId, Arc<Tensor>>,
    /// module path of the layer being recorded
    path: Vec<String>,
    /// uses of each node name, for deduplication
    names: HashMap<String, usize>,
    params: HashMap<String, OutletId>,
}

impl Tracer {
    pub fn new() -> Tracer {
        Tracer::default()
    }

    /// Node name prefix of the current module, e.g. `/backbone/stem`.
    pub fn scope(&self) -> String {
        self.path.iter().map(|p| format!("/{p}")).join("")
    }

    fn node_name(&mut self, what: &str) -> String {
        let name = format!("{}/{}", self.scope(), what);
        let uses = self.names.entry(name.clone()).or_insert(0);
        *uses += 1;
        if *uses == 1 { name } else { format!("{}_{}", name, *uses - 1) }
    }

    pub fn input(&mut self, name: impl Into<String>, value: Tensor) -> ExportResult<OutletId> {
        let outlet = self.model.add_source(name, Fact::for_tensor(&value))?;
        self.values.insert(outlet, Arc::new(value));
        Ok(outlet)
    }

    /// Run `f` with `name` appended to the module path.
    pub fn scoped<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Tracer) -> ExportResult<T>,
    ) -> ExportResult<T> {
        self.path.push(name.to_string());
        let result = f(self);
        self.path.pop();
        result
    }

    /// Record a child module, under its own scope.
    pub fn call(
        &mut self,
        name: &str,
        layer: &dyn Layer,
        inputs: &[OutletId],
    ) -> ExportResult<TVec<OutletId>> {
        self.scoped(name, |tracer| layer.forward(tracer, inputs))
            .with_context(|| format!("In {} ({})", self.param_name(name), layer.name()))
    }

    /// Record the child `ix` of a container module, itself named `name` in
    /// the current module.
    pub fn call_item(
        &mut self,
        name: &str,
        container: &dyn Layer,
        ix: usize,
        inputs: &[OutletId],
    ) -> ExportResult<TVec<OutletId>> {
        let children = container.children();
        let (item, layer) =
            children.get(ix).with_context(|| format!("{name} has no module #{ix}"))?;
        self.scoped(name, |tracer| tracer.call(item, *layer, inputs))
    }

    /// Same as [`Tracer::call`], for single-output modules.
    pub fn call1(
        &mut self,
        name: &str,
        layer: &dyn Layer,
        input: OutletId,
    ) -> ExportResult<OutletId> {
        let outputs = self.call(name, layer, &[input])?;
        ensure!(outputs.len() == 1, "{} has {} outputs", name, outputs.len());
        Ok(outputs[0])
    }

    fn param_name(&self, name: &str) -> String {
        self.path.iter().map(|s| s.as_str()).chain(std::iter::once(name)).join(".")
    }

    /// A parameter of the current module. It becomes a constant named by its
    /// dotted path.
    pub fn param(&mut self, name: &str, value: &Tensor) -> ExportResult<OutletId> {
        let name = self.param_name(name);
        if let Some(outlet) = self.params.get(&name) {
            return Ok(*outlet);
        }
        let value = Arc::new(value.clone());
        let outlet = self.model.add_const(&*name, value.clone())?;
        self.values.insert(outlet, value);
        self.params.insert(name, outlet);
        Ok(outlet)
    }

    /// An anonymous constant operand.
    pub fn konst(&mut self, value: impl Into<Arc<Tensor>>) -> ExportResult<OutletId> {
        let value = value.into();
        let name = self.node_name("Constant");
        let outlet = self.model.add_const(name, value.clone())?;
        self.values.insert(outlet, value);
        Ok(outlet)
    }

    /// Record an operator and evaluate it.
    pub fn op(
        &mut self,
        op: impl Into<Box<dyn Op>>,
        inputs: &[OutletId],
    ) -> ExportResult<TVec<OutletId>> {
        let op = op.into();
        let name = self.node_name(&op.name());
        let values = inputs
            .iter()
            .map(|i| self.value(*i).cloned())
            .collect::<ExportResult<TVec<_>>>()?;
        let outputs = op.eval(values).with_context(|| format!("Evaluating {name}"))?;
        let wires = self.model.wire_node(&*name, op, inputs)?;
        ensure!(wires.len() == outputs.len(), "{} produced {} outputs", name, outputs.len());
        for (wire, value) in wires.iter().zip(outputs) {
            let fact = self.model.outlet_fact(*wire)?;
            ensure!(
                fact.compatible_with(&Fact::for_tensor(&value)),
                "{}: computed {:?}, declared {:?}",
                name,
                value,
                fact
            );
            self.values.insert(*wire, Arc::new(value));
        }
        trace!("Recorded {name}");
        Ok(wires)
    }

    /// Same as [`Tracer::op`], for single-output operators.
    pub fn op1(
        &mut self,
        op: impl Into<Box<dyn Op>>,
        inputs: &[OutletId],
    ) -> ExportResult<OutletId> {
        Ok(self.op(op, inputs)?[0])
    }

    pub fn value(&self, outlet: OutletId) -> ExportResult<&Arc<Tensor>> {
        self.values.get(&outlet).with_context(|| format!("No value for {outlet:?}"))
    }

    pub fn fact(&self, outlet: OutletId) -> ExportResult<&Fact> {
        self.model.outlet_fact(outlet)
    }

    pub fn into_model(self) -> Graph {
        self.model
    }
}

/// A recorded forward pass.
#[derive(Debug, Clone)]
pub struct Traced {
    pub model: Graph,
    pub outputs: TVec<Tensor>,
}

/// Record one forward pass of `model` on `input`.
///
/// The module tree must be in eval mode. The graph has one input and one
/// output, labelled with the given names.
pub fn trace(
    model: &dyn Layer,
    input: Tensor,
    input_name: &str,
    output_name: &str,
) -> ExportResult<Traced> {
    if model.is_training() {
        bail!(ExportError::Trace(format!(
            "{} is in training mode, switch it to eval mode first",
            model.name()
        )));
    }
    let mut tracer = Tracer::new();
    let x = tracer.input(input_name, input)?;
    tracer.model.set_outlet_label(x, input_name.to_string())?;
    let outputs = model
        .forward(&mut tracer, &[x])
        .context(ExportError::Trace(format!("forward pass of {}", model.name())))?;
    if outputs.len() != 1 {
        bail!(ExportError::Trace(format!("expected one output, got {}", outputs.len())));
    }
    let value = (**tracer.value(outputs[0])?).clone();
    let mut graph = tracer.into_model();
    graph.set_output_outlets(&outputs)?;
    graph.set_outlet_label(outputs[0], output_name.to_string())?;
    graph.compact()?;
    debug!("Traced {} into {} nodes", model.name(), graph.nodes.len());
    Ok(Traced { model: graph, outputs: tvec!(value) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::*;
    use crate::plan::SimplePlan;

    fn block() -> Sequential {
        Sequential::new(vec![
            Conv2d::new(3, 4, 3, 2, 1, false, 0).into(),
            BatchNorm2d::new(4).into(),
            ExportSiLU.into(),
        ])
    }

    #[test]
    fn names_follow_scopes() {
        let model = Sequential::new(vec![block().into(), block_4().into()]);
        let traced = trace(&model, Tensor::random_normal(&[1, 3, 8, 8], 0), "images", "output")
            .unwrap();
        let g = &traced.model;
        assert!(g.node_by_name("/0/0/Conv").is_ok());
        assert!(g.node_by_name("/0/2/Sigmoid").is_ok());
        assert!(g.node_by_name("/1/0/Conv").is_ok());
        assert!(g.node_by_name("0.0.weight").is_ok());
        assert!(g.node_by_name("1.1.running_var").is_ok());
        assert_eq!(g.outlet_label(g.inputs[0]), Some("images"));
        assert_eq!(g.outlet_label(g.outputs[0]), Some("output"));
    }

    fn block_4() -> Sequential {
        Sequential::new(vec![
            Conv2d::new(4, 4, 3, 1, 1, false, 1).into(),
            BatchNorm2d::new(4).into(),
            SiLU.into(),
        ])
    }

    #[test]
    fn repeated_ops_get_suffixes() {
        let mut tracer = Tracer::new();
        let x = tracer.input("x", Tensor::zero(&[2])).unwrap();
        let a = tracer.op1(crate::ops::element_wise::Relu, &[x]).unwrap();
        let b = tracer.op1(crate::ops::element_wise::Relu, &[a]).unwrap();
        let model = tracer.into_model();
        assert_eq!(model.node(a.node).name, "/Relu");
        assert_eq!(model.node(b.node).name, "/Relu_1");
    }

    #[test]
    fn traced_graph_computes_traced_outputs() {
        let model = block();
        let input = Tensor::random_normal(&[1, 3, 8, 8], 3);
        let traced = trace(&model, input.clone(), "images", "output").unwrap();
        let out = SimplePlan::new(&traced.model).unwrap().run(tvec!(input)).unwrap();
        out[0].close_enough(&traced.outputs[0], 1e-5, 1e-6).unwrap();
    }

    #[test]
    fn training_mode_is_rejected() {
        let mut model = block();
        model.set_training(true);
        let err = trace(&model, Tensor::zero(&[1, 3, 8, 8]), "images", "output").unwrap_err();
        assert!(matches!(ExportError::of(&err), Some(ExportError::Trace(_))));
    }

    #[test]
    fn tracing_is_deterministic() {
        let model = block();
        let a = trace(&model, Tensor::random_normal(&[1, 3, 8, 8], 1), "images", "output");
        let b = trace(&model, Tensor::random_normal(&[1, 3, 8, 8], 2), "images", "output");
        let names = |g: &Graph| g.nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        assert_eq!(names(&a.unwrap().model), names(&b.unwrap().model));
    }
}
