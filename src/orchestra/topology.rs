use crate::orchestra::{
    error::{PipelineError, Result, Site},
    network::Network,
    worker::{Inbound, InboundLink, StageRole, StageWorker},
};

/// The stages of one pass, wired in sequence by fresh one-shot links.
///
/// Stage `i` writes the only message of link `i`, which stage `i + 1` reads.
/// The output stage's link is the backward channel, read by the driver.
#[derive(Debug)]
pub struct Topology {
    workers: Vec<StageWorker>,
    backward: InboundLink,
}

impl Topology {
    /// Allocates the links of a pass and binds every stage to them.
    ///
    /// # Arguments
    /// * `network` - The stage specs, cloned into the workers.
    /// * `input` - The vector handed to the input stage.
    /// * `capacity` - Bytes buffered by each link.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` for a network without stages.
    pub fn wire(network: &Network, input: Vec<f64>, capacity: usize) -> Result<Self> {
        let stages = network.stages();
        let mut workers = Vec::with_capacity(stages.len());
        let mut inbound = Inbound::Seed(input);

        for spec in stages {
            let (tx, rx) = comms::one_shot_with_capacity(capacity);
            let current = std::mem::replace(&mut inbound, Inbound::Link(rx));
            workers.push(StageWorker::new(spec.clone(), current, tx));
        }

        let Inbound::Link(backward) = inbound else {
            return Err(PipelineError::invalid(Site::Setup, "cannot wire a network without stages"));
        };

        Ok(Self { workers, backward })
    }

    /// The role and unit count of every stage, in order.
    pub fn shape(&self) -> Vec<(StageRole, usize)> {
        self.workers
            .iter()
            .map(|worker| (worker.spec().role(), worker.spec().unit_count()))
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.workers.len()
    }

    /// Links between consecutive stages, the backward channel not included.
    pub fn forward_links(&self) -> usize {
        self.workers.len().saturating_sub(1)
    }

    pub fn into_parts(self) -> (Vec<StageWorker>, InboundLink) {
        (self.workers, self.backward)
    }
}
