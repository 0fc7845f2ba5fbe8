use std::{fmt, future::Future, sync::Arc, time::Duration};

use comms::{OnoReceiver, OnoSender};
use futures::future::join_all;
use log::debug;
use serde::Serialize;
use tokio::{io::DuplexStream, task, time};
use tokio_util::sync::CancellationToken;

use crate::orchestra::{
    driver::Pass,
    error::{PipelineError, Result, Site},
    report::{Event, ReportSink},
    unit::{DotProduct, UnitKernel, UnitTask},
};

/// One row of weights per unit, each as wide as the stage input.
pub type WeightMatrix = Vec<Vec<f64>>;

/// The producer end of a link between two stages.
pub type Outbound = OnoSender<DuplexStream>;

/// The consumer end of a link between two stages.
pub type InboundLink = OnoReceiver<DuplexStream>;

/// The position a stage takes in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Input,
    Hidden,
    Output,
}

impl StageRole {
    /// The heading used for this role in the results report.
    pub fn label(&self) -> &'static str {
        match self {
            StageRole::Input => "INPUT",
            StageRole::Hidden => "HIDDEN",
            StageRole::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRole::Input => f.write_str("input"),
            StageRole::Hidden => f.write_str("hidden"),
            StageRole::Output => f.write_str("output"),
        }
    }
}

/// Static description of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    index: usize,
    role: StageRole,
    units: usize,
    weights: WeightMatrix,
}

impl StageSpec {
    /// Creates a new `StageSpec`.
    ///
    /// # Arguments
    /// * `index` - The stage position, `0` being the input stage.
    /// * `role` - Whether the stage is the input, a hidden or the output stage.
    /// * `units` - The amount of units the stage runs.
    /// * `weights` - A row per unit.
    pub fn new(index: usize, role: StageRole, units: usize, weights: WeightMatrix) -> Self {
        Self {
            index,
            role,
            units,
            weights,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn role(&self) -> StageRole {
        self.role
    }

    pub fn unit_count(&self) -> usize {
        self.units
    }

    pub fn weights(&self) -> &WeightMatrix {
        &self.weights
    }

    /// Whether this stage feeds the backward channel.
    pub fn is_terminal(&self) -> bool {
        self.role == StageRole::Output
    }
}

/// Turns the terminal stage's output vector into the two backward values.
pub trait Readout: Send + Sync {
    fn apply(&self, outputs: &[f64]) -> [f64; 2];
}

/// `f(x1) = (s² + s + 1) / 2` and `f(x2) = (s² - s) / 2` over the sum `s` of the outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticReadout;

impl Readout for QuadraticReadout {
    fn apply(&self, outputs: &[f64]) -> [f64; 2] {
        let sum: f64 = outputs.iter().sum();
        let fx1 = (sum * sum + sum + 1.0) / 2.0;
        let fx2 = (sum * sum - sum) / 2.0;
        [fx1, fx2]
    }
}

/// Everything a stage needs from its pass besides its own spec and links.
#[derive(Clone)]
pub struct StageContext {
    pass: Pass,
    sink: Arc<dyn ReportSink>,
    kernel: Arc<dyn UnitKernel>,
    readout: Arc<dyn Readout>,
    stall_timeout: Duration,
    cancel: CancellationToken,
}

impl StageContext {
    /// Creates a context computing dot products and the quadratic readout.
    ///
    /// # Arguments
    /// * `pass` - The pass the stage belongs to.
    /// * `sink` - Where the stage reports what it computes.
    /// * `stall_timeout` - Upper bound of every wait inside the stage.
    pub fn new(pass: Pass, sink: Arc<dyn ReportSink>, stall_timeout: Duration) -> Self {
        Self {
            pass,
            sink,
            kernel: Arc::new(DotProduct),
            readout: Arc::new(QuadraticReadout),
            stall_timeout,
            cancel: CancellationToken::new(),
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

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Where a stage takes its input vector from.
#[derive(Debug)]
pub enum Inbound {
    /// The input stage is handed its vector directly.
    Seed(Vec<f64>),
    /// Every other stage reads the single message of the previous link.
    Link(InboundLink),
}

/// Runs one stage of a pass.
///
/// The worker owns both of its link ends for its whole execution. If it fails
/// the outbound end is dropped unwritten and the next stage sees the link close.
#[derive(Debug)]
pub struct StageWorker {
    spec: StageSpec,
    inbound: Inbound,
    outbound: Outbound,
}

impl StageWorker {
    pub fn new(spec: StageSpec, inbound: Inbound, outbound: Outbound) -> Self {
        Self {
            spec,
            inbound,
            outbound,
        }
    }

    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    /// Receives the input, fans out a unit task per configured unit, waits for
    /// all of them and sends the ordered outputs on the outbound link.
    ///
    /// # Arguments
    /// * `ctx` - The pass-wide context.
    ///
    /// # Errors
    /// * `InvalidConfiguration` if the weights don't fit the input.
    /// * `TransportFault` if a link closes early.
    /// * `StallFault` if the units or the outbound send exceed the stall timeout.
    ///
    /// The inbound receive isn't bounded: upstream either sends, or fails and
    /// drops the link, or is cancelled along with this stage.
    /// * `Cancelled` if the pass is aborted while the stage runs.
    pub async fn run(self, ctx: StageContext) -> Result<()> {
        let site = Site::Stage(self.spec.index);
        let cancel = ctx.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { site }),
            ret = self.execute(&ctx) => ret,
        }
    }

    async fn execute(self, ctx: &StageContext) -> Result<()> {
        let Self {
            spec,
            inbound,
            outbound,
        } = self;
        let site = Site::Stage(spec.index);

        let input = match inbound {
            Inbound::Seed(values) => values,
            Inbound::Link(rx) => rx
                .recv()
                .await
                .map_err(|source| PipelineError::TransportFault { site, source })?,
        };
        debug!(stage = spec.index; "received {} inputs", input.len());

        let outputs = fan_out(&spec, input, ctx).await?;
        ctx.sink.record(Event::StageOutput {
            pass: ctx.pass,
            stage: spec.index,
            role: spec.role,
            values: outputs.clone(),
        });

        let message = if spec.is_terminal() {
            let values = ctx.readout.apply(&outputs);
            ctx.sink.record(Event::Readout {
                pass: ctx.pass,
                values,
            });
            values.to_vec()
        } else {
            outputs
        };

        bounded(site, ctx.stall_timeout, outbound.send(&message))
            .await?
            .map_err(|source| PipelineError::TransportFault { site, source })
    }
}

/// Spawns one blocking task per unit and joins all of them.
///
/// Outputs come back in unit order whatever order the tasks finish in. On a
/// stall the remaining tasks are detached and left to finish on their own.
async fn fan_out(spec: &StageSpec, input: Vec<f64>, ctx: &StageContext) -> Result<Vec<f64>> {
    let site = Site::Stage(spec.index);

    if spec.weights.len() != spec.units {
        return Err(PipelineError::invalid(
            site,
            format!(
                "expected {} weight rows, got {}",
                spec.units,
                spec.weights.len()
            ),
        ));
    }

    let inputs: Arc<[f64]> = input.into();
    let handles: Vec<_> = spec
        .weights
        .iter()
        .enumerate()
        .map(|(id, row)| {
            let unit = UnitTask::new(spec.index, id, Arc::clone(&inputs), row.clone());
            let kernel = Arc::clone(&ctx.kernel);
            let sink = Arc::clone(&ctx.sink);
            let pass = ctx.pass;

            task::spawn_blocking(move || -> Result<f64> {
                let value = kernel.compute(&unit)?;
                sink.record(Event::UnitComputed {
                    pass,
                    stage: unit.stage(),
                    unit: unit.id(),
                    value,
                });
                Ok(value)
            })
        })
        .collect();

    let joined = bounded(site, ctx.stall_timeout, join_all(handles)).await?;

    joined
        .into_iter()
        .enumerate()
        .map(|(unit, ret)| match ret {
            Ok(value) => value,
            Err(e) if e.is_panic() => Err(PipelineError::UnitPanicked {
                stage: spec.index,
                unit,
            }),
            Err(_) => Err(PipelineError::Cancelled { site }),
        })
        .collect()
}

/// Awaits `fut` for at most `limit`.
async fn bounded<F: Future>(site: Site, limit: Duration, fut: F) -> Result<F::Output> {
    time::timeout(limit, fut)
        .await
        .map_err(|_| PipelineError::StallFault {
            site,
            waited: limit,
        })
}
