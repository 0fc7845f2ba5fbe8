use std::{fmt, sync::Arc, time::Duration};

use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::orchestra::{
    config::PipelineConfig,
    error::{PipelineError, Result, Site},
    network::Network,
    provider::InputProvider,
    report::{Event, ReportSink},
    topology::Topology,
    unit::{DotProduct, UnitKernel},
    worker::{QuadraticReadout, Readout, StageContext},
};

/// Which of the two forward passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    One,
    Two,
}

impl Pass {
    pub fn number(&self) -> usize {
        match self {
            Pass::One => 1,
            Pass::Two => 2,
        }
    }

    /// The heading used for this pass in the results report.
    pub fn heading(&self) -> &'static str {
        match self {
            Pass::One => "FORWARD PASS",
            Pass::Two => "SECOND FORWARD PASS with f(x1) and f(x2)",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {}", self.number())
    }
}

/// The outcome of a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassResult {
    pub pass: Pass,
    pub backward_values: [f64; 2],
}

/// The outcome of both passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub first: PassResult,
    pub second: PassResult,
}

/// The schedule of a run: pass one, then pass two seeded with pass one's
/// backward values, then done.
#[derive(Debug, Clone, PartialEq)]
pub enum PassState {
    PassOne { input: Vec<f64> },
    PassTwo { input: Vec<f64>, first: PassResult },
    Done(RunReport),
}

/// Builds a fresh topology per pass, runs every stage concurrently and relays
/// the backward values.
pub struct Driver {
    network: Network,
    sink: Arc<dyn ReportSink>,
    kernel: Arc<dyn UnitKernel>,
    readout: Arc<dyn Readout>,
    stall_timeout: Duration,
    channel_capacity: usize,
}

impl Driver {
    /// Creates a new `Driver`.
    ///
    /// # Arguments
    /// * `network` - The stage specs, shared by both passes.
    /// * `config` - Provides the stall timeout and the link capacity.
    /// * `sink` - Receives the events of both passes.
    pub fn new(network: Network, config: &PipelineConfig, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            network,
            sink,
            kernel: Arc::new(DotProduct),
            readout: Arc::new(QuadraticReadout),
            stall_timeout: config.stall_timeout(),
            channel_capacity: config.channel_capacity,
        }
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn UnitKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_readout(mut self, readout: Arc<dyn Readout>) -> Self {
        self.readout = readout;
        self
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Runs both passes.
    ///
    /// # Arguments
    /// * `input` - Provides the input vector of the first pass.
    ///
    /// # Returns
    /// The backward values of each pass.
    ///
    /// # Errors
    /// Returns the root cause of the first pass that fails, the second pass
    /// isn't attempted if the first one fails.
    pub async fn run<I>(&self, input: &I) -> Result<RunReport>
    where
        I: InputProvider + ?Sized,
    {
        let mut state = PassState::PassOne {
            input: input.initial_input()?,
        };

        loop {
            state = match self.step(state).await? {
                PassState::Done(report) => return Ok(report),
                next => next,
            };
        }
    }

    /// Advances the schedule by one pass.
    pub async fn step(&self, state: PassState) -> Result<PassState> {
        match state {
            PassState::PassOne { input } => {
                let first = self.run_pass(Pass::One, input).await?;
                Ok(PassState::PassTwo {
                    input: first.backward_values.to_vec(),
                    first,
                })
            }
            PassState::PassTwo { input, first } => {
                let second = self.run_pass(Pass::Two, input).await?;
                Ok(PassState::Done(RunReport { first, second }))
            }
            done @ PassState::Done(_) => Ok(done),
        }
    }

    /// Runs a single pass over a freshly wired topology.
    ///
    /// Every stage is spawned at once, the driver then joins all of them while
    /// reading the backward channel. The first stage fault cancels the rest of
    /// the pass. Only the units of a stage and its outbound send are bounded by
    /// the stall timeout, so a long pipeline of healthy stages never stalls.
    ///
    /// # Arguments
    /// * `pass` - Which pass this is, used for reporting.
    /// * `input` - The vector handed to the input stage.
    ///
    /// # Returns
    /// The two backward values produced by the output stage.
    pub async fn run_pass(&self, pass: Pass, input: Vec<f64>) -> Result<PassResult> {
        let ret = self.execute_pass(pass, input).await;
        if let Err(e) = &ret {
            error!(pass = pass.number(); "pass aborted: {e}");
        }
        ret
    }

    async fn execute_pass(&self, pass: Pass, input: Vec<f64>) -> Result<PassResult> {
        self.sink.record(Event::PassStarted {
            pass,
            input: input.clone(),
        });

        let topology = Topology::wire(&self.network, input, self.channel_capacity)?;
        info!(
            pass = pass.number(), stages = topology.stage_count(), links = topology.forward_links();
            "launching stages"
        );

        let cancel = CancellationToken::new();
        let ctx = StageContext::new(pass, Arc::clone(&self.sink), self.stall_timeout)
            .with_kernel(Arc::clone(&self.kernel))
            .with_readout(Arc::clone(&self.readout))
            .with_cancel(cancel.clone());

        let (workers, backward) = topology.into_parts();
        let mut join_set = JoinSet::new();
        for worker in workers {
            let index = worker.spec().index();
            let ctx = ctx.clone();
            join_set.spawn(async move { (index, worker.run(ctx).await) });
        }

        // The backward link resolves once the output stage sends or is dropped.
        let (joined, received) =
            tokio::join!(join_stages(&mut join_set, &cancel), backward.recv());
        joined?;

        let values = received.map_err(|source| PipelineError::TransportFault {
            site: Site::Driver,
            source,
        })?;
        let backward_values: [f64; 2] = values.as_slice().try_into().map_err(|_| {
            PipelineError::invalid(
                Site::Driver,
                format!("expected 2 backward values, got {}", values.len()),
            )
        })?;

        for layer in (0..=self.network.hidden_layers()).rev() {
            self.sink.record(Event::Backward {
                pass,
                layer,
                values: backward_values,
            });
        }
        self.sink.record(Event::PassFinished { pass });

        Ok(PassResult {
            pass,
            backward_values,
        })
    }
}

/// Joins every stage of a pass, cancelling the remaining ones after the first fault.
async fn join_stages(
    join_set: &mut JoinSet<(usize, Result<()>)>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut faults = Vec::new();

    while let Some(joined) = join_set.join_next().await {
        let fault = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((index, Err(e))) => {
                warn!(stage = index; "stage failed: {e}");
                e
            }
            Err(e) => PipelineError::Io(e.into()),
        };

        cancel.cancel();
        faults.push(fault);
    }

    match root_cause(faults) {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

/// Picks the fault that explains the others: primary faults before secondary
/// ones, and the earliest stage first since faults only travel downstream.
fn root_cause(faults: Vec<PipelineError>) -> Option<PipelineError> {
    faults.into_iter().min_by_key(|fault| {
        let stage = match fault.site() {
            Some(Site::Stage(index)) => index,
            _ => usize::MAX,
        };
        (fault.is_secondary(), stage)
    })
}
