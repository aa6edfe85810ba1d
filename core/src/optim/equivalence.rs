use crate::internal::*;
use crate::plan::SimplePlan;

/// Compare two graphs by running them on the same seeded random inputs.
///
/// Symbolic dimensions are bound to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceCheck {
    pub runs: usize,
    pub seed: u64,
    pub rtol: f32,
    pub atol: f32,
}

impl Default for EquivalenceCheck {
    fn default() -> EquivalenceCheck {
        EquivalenceCheck { runs: 2, seed: 0, rtol: 1e-3, atol: 1e-4 }
    }
}

impl EquivalenceCheck {
    fn inputs(&self, model: &Graph, run: usize) -> ExportResult<TVec<Tensor>> {
        model
            .input_outlets()?
            .iter()
            .enumerate()
            .map(|(ix, outlet)| {
                let fact = model.outlet_fact(*outlet)?;
                ensure!(fact.datum_type == DatumType::F32, "Unsupported input type {:?}", fact);
                let shape: TVec<usize> =
                    fact.shape.iter().map(|d| d.as_val().unwrap_or(1)).collect();
                let seed = self.seed.wrapping_add((run * 1000 + ix) as u64);
                Ok(Tensor::random_normal(&shape, seed))
            })
            .collect()
    }

    /// Ok(false) when outputs diverge. Errors are kept for graphs that can
    /// not be run at all.
    pub fn check(&self, reference: &Graph, candidate: &Graph) -> ExportResult<bool> {
        let reference_plan = SimplePlan::new(reference)?;
        let candidate_plan = SimplePlan::new(candidate)?;
        if reference.inputs.len() != candidate.inputs.len()
            || reference.outputs.len() != candidate.outputs.len()
        {
            debug!("Graph interfaces differ");
            return Ok(false);
        }
        for run in 0..self.runs {
            let inputs = self.inputs(reference, run)?;
            let expected = reference_plan.run(inputs.clone()).context("Running reference")?;
            let found = candidate_plan.run(inputs).context("Running candidate")?;
            for (ix, (e, f)) in expected.iter().zip(found.iter()).enumerate() {
                if let Err(e) = f.close_enough(e, self.rtol, self.atol) {
                    debug!("Run #{run}, output #{ix}: {e}");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

pub fn check_equivalence(reference: &Graph, candidate: &Graph) -> ExportResult<bool> {
    EquivalenceCheck::default().check(reference, candidate)
}
