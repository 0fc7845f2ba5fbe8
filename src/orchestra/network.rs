use crate::orchestra::{
    config::PipelineConfig,
    error::{PipelineError, Result, Site},
    provider::WeightProvider,
    worker::{StageRole, StageSpec},
};

/// The stage specs of a network, fetched once and reused by every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    stages: Vec<StageSpec>,
}

impl Network {
    /// Builds the plan for `config`, asking `provider` for every stage's weights.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the provider fails or returns a matrix
    /// whose row count doesn't match the stage's unit count.
    pub fn from_provider<P>(config: &PipelineConfig, provider: &P) -> Result<Self>
    where
        P: WeightProvider + ?Sized,
    {
        let last = config.stage_count() - 1;

        let stages = (0..config.stage_count())
            .map(|index| {
                let units = config.stage_units(index);
                let role = match index {
                    0 => StageRole::Input,
                    i if i == last => StageRole::Output,
                    _ => StageRole::Hidden,
                };

                let weights = provider.weights(index, units)?;
                if weights.len() != units {
                    return Err(PipelineError::invalid(
                        Site::Stage(index),
                        format!("expected {units} weight rows, got {}", weights.len()),
                    ));
                }

                Ok(StageSpec::new(index, role, units, weights))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { stages })
    }

    /// Builds a plan from already made specs.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` unless there is one input stage first, one
    /// output stage last, hidden stages in between and indices are sequential.
    pub fn from_stages(stages: Vec<StageSpec>) -> Result<Self> {
        if stages.len() < 2 {
            return Err(PipelineError::invalid(
                Site::Setup,
                "a network needs at least an input and an output stage",
            ));
        }

        let last = stages.len() - 1;
        for (i, stage) in stages.iter().enumerate() {
            let expected = match i {
                0 => StageRole::Input,
                i if i == last => StageRole::Output,
                _ => StageRole::Hidden,
            };

            if stage.index() != i || stage.role() != expected {
                return Err(PipelineError::invalid(
                    Site::Stage(i),
                    format!(
                        "expected {expected} stage {i}, got {} stage {}",
                        stage.role(),
                        stage.index()
                    ),
                ));
            }
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn hidden_layers(&self) -> usize {
        self.stages.len() - 2
    }
}
