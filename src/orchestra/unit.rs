use std::sync::Arc;

use crate::orchestra::error::{PipelineError, Result, Site};

/// One unit of a stage: a shared view of the stage input and its own weight row.
#[derive(Debug, Clone)]
pub struct UnitTask {
    stage: usize,
    id: usize,
    inputs: Arc<[f64]>,
    weights: Vec<f64>,
}

impl UnitTask {
    /// Creates a new `UnitTask`.
    ///
    /// # Arguments
    /// * `stage` - The index of the owning stage, used when reporting faults.
    /// * `id` - The unit's position inside the stage.
    /// * `inputs` - The stage input, shared read-only between all units.
    /// * `weights` - This unit's weight row.
    pub fn new(stage: usize, id: usize, inputs: Arc<[f64]>, weights: Vec<f64>) -> Self {
        Self {
            stage,
            id,
            inputs,
            weights,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn inputs(&self) -> &[f64] {
        &self.inputs
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Computes the dot product of the inputs and the weight row.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if both vectors differ in length.
    pub fn compute(&self) -> Result<f64> {
        if self.inputs.len() != self.weights.len() {
            return Err(PipelineError::invalid(
                Site::Stage(self.stage),
                format!(
                    "unit {}: weight row has {} values but the input has {}",
                    self.id,
                    self.weights.len(),
                    self.inputs.len()
                ),
            ));
        }

        Ok(self
            .inputs
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum())
    }
}

/// Computes the output of a single unit.
///
/// Runs on a blocking thread, implementations may take as long as they need
/// but must not touch any state shared with other units.
pub trait UnitKernel: Send + Sync {
    fn compute(&self, task: &UnitTask) -> Result<f64>;
}

/// The plain weighted sum of a unit's inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProduct;

impl UnitKernel for DotProduct {
    fn compute(&self, task: &UnitTask) -> Result<f64> {
        task.compute()
    }
}
