use ndarray::Axis;

use super::const_i64s;
use crate::internal::*;
use crate::ops::resolve_axis;

/// Strided slice. Starts, ends, axes and steps are constant inputs 1 to 4.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slice;

#[derive(Debug, Clone, PartialEq)]
struct AxisSlice {
    axis: usize,
    start: usize,
    end: usize,
    step: usize,
}

impl AxisSlice {
    fn len(&self) -> usize {
        if self.end <= self.start { 0 } else { (self.end - self.start).div_ceil(self.step) }
    }
}

fn clamp(ix: i64, dim: usize) -> usize {
    let dim = dim as i64;
    let ix = if ix < 0 { ix + dim } else { ix };
    ix.clamp(0, dim) as usize
}

fn resolve(shape: &[Dim], args: [&[i64]; 4]) -> ExportResult<Vec<AxisSlice>> {
    let [starts, ends, axes, steps] = args;
    ensure!(
        starts.len() == ends.len() && ends.len() == axes.len() && axes.len() == steps.len(),
        "Slice: starts, ends, axes and steps must have the same length"
    );
    let mut slices = vec![];
    for ix in 0..starts.len() {
        let axis = resolve_axis(axes[ix], shape.len())?;
        ensure!(steps[ix] > 0, "Slice: only positive steps are supported, got {}", steps[ix]);
        let dim = shape[axis].to_usize().context("Slice: sliced axis must be known")?;
        slices.push(AxisSlice {
            axis,
            start: clamp(starts[ix], dim),
            end: clamp(ends[ix], dim),
            step: steps[ix] as usize,
        });
    }
    Ok(slices)
}

impl Op for Slice {
    fn name(&self) -> Cow<'_, str> {
        "Slice".into()
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        let (input, starts, ends, axes, steps) = args_5!(inputs);
        let shape: TVec<Dim> = input.shape().iter().map(|d| Dim::Val(*d)).collect();
        let (starts, ends, axes, steps) =
            (starts.to_i64s()?, ends.to_i64s()?, axes.to_i64s()?, steps.to_i64s()?);
        let slices = resolve(&shape, [&starts, &ends, &axes, &steps])?;
        let mut view = input.to_array_view_f32()?;
        for s in slices {
            if s.len() == 0 {
                bail!("Slice: empty slice on axis {}", s.axis)
            }
            let (start, end, step) = (s.start as isize, s.end as isize, s.step as isize);
            view.slice_axis_inplace(Axis(s.axis), ndarray::Slice::new(start, Some(end), step));
        }
        Ok(tvec!(view.to_owned().into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 5, "Slice expects five inputs");
        let starts = const_i64s(inputs[1], "Slice starts")?;
        let ends = const_i64s(inputs[2], "Slice ends")?;
        let axes = const_i64s(inputs[3], "Slice axes")?;
        let steps = const_i64s(inputs[4], "Slice steps")?;
        let mut shape = inputs[0].shape.clone();
        for s in resolve(&shape, [&starts, &ends, &axes, &steps])? {
            ensure!(s.len() > 0, "Slice: empty slice on axis {}", s.axis);
            shape[s.axis] = s.len().into();
        }
        Ok(tvec!(Fact::dt_shape(inputs[0].datum_type, shape)))
    }

    fn declutter(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        let input = model.outlet_fact(node.inputs[0])?;
        if input.shape == node.outputs[0].fact.shape {
            return Ok(Some(GraphPatch::shunt_one_op(model, node)?));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i64s(v: &[i64]) -> Arc<Tensor> {
        Arc::new(Tensor::from_i64s(v))
    }

    #[test]
    fn strided_slice() {
        let x = ndarray::Array::range(0f32, 16.0, 1.0);
        let x = x.into_shape_with_order((1, 1, 4, 4)).unwrap();
        let x = Tensor::from(x.into_dyn());
        let out = Slice
            .eval(tvec!(
                Arc::new(x),
                i64s(&[0, 1]),
                i64s(&[i64::MAX, i64::MAX]),
                i64s(&[2, 3]),
                i64s(&[2, 2])
            ))
            .unwrap();
        assert_eq!(out[0].shape(), &[1, 1, 2, 2]);
        let values: Vec<f32> = out[0].as_f32().unwrap().iter().copied().collect();
        assert_eq!(values, vec![1.0, 3.0, 9.0, 11.0]);
    }

    #[test]
    fn facts_with_symbolic_batch() {
        let x = Fact::dt_shape(DatumType::F32, [Dim::Sym("batch".into()), 1.into(), 4.into()]);
        let args: Vec<Fact> =
            [[0i64], [-1], [-1], [1]].iter().map(|v| Fact::from(i64s(v))).collect();
        let out = Slice.output_facts(&[&x, &args[0], &args[1], &args[2], &args[3]]).unwrap();
        assert_eq!(out[0].shape[2], Dim::Val(3));
        assert!(out[0].shape[0].is_sym());
    }
}
