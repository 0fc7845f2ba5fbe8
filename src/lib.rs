//! A feed-forward pass over a layered network, run as a pipeline of
//! concurrent stages.
//!
//! Every layer is a stage task. Stages are chained by one-shot links that
//! carry a single length-prefixed vector each, and every stage fans its units
//! out to blocking tasks and joins them before forwarding its output. The
//! output stage turns its vector into two backward values, which the
//! [`Driver`] reports and then feeds into a second pass over a freshly wired
//! topology.

pub mod orchestra;

pub use orchestra::{
    config::{PipelineConfig, INPUT_UNITS},
    driver::{Driver, Pass, PassResult, PassState, RunReport},
    error::{PipelineError, Result, Site},
    network::Network,
    provider::{InlineWeights, InputProvider, WeightFile, WeightProvider},
    report::{Event, LogSink, ReportSink, Tee, Transcript},
    runtime::block_on_detached,
    topology::Topology,
    unit::{DotProduct, UnitKernel, UnitTask},
    worker::{
        Inbound, QuadraticReadout, Readout, StageContext, StageRole, StageSpec, StageWorker,
        WeightMatrix,
    },
};
