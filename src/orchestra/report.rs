//! Observation side of the pipeline.
//!
//! Stages and the driver describe what they compute as [`Event`]s handed to a
//! [`ReportSink`]. Sinks never feed anything back into the data path, and the
//! ones here serialize concurrent writers on their own.

use std::{fs, path::Path, sync::Arc};

use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;

use crate::orchestra::{
    config::PipelineConfig,
    driver::Pass,
    error::{PipelineError, Result, Site},
    worker::StageRole,
};

/// Something that happened during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    PassStarted {
        pass: Pass,
        input: Vec<f64>,
    },
    UnitComputed {
        pass: Pass,
        stage: usize,
        unit: usize,
        value: f64,
    },
    StageOutput {
        pass: Pass,
        stage: usize,
        role: StageRole,
        values: Vec<f64>,
    },
    Readout {
        pass: Pass,
        values: [f64; 2],
    },
    Backward {
        pass: Pass,
        layer: usize,
        values: [f64; 2],
    },
    PassFinished {
        pass: Pass,
    },
}

/// Receives the events of every pass.
///
/// `record` is called from stage tasks and blocking unit threads at the same
/// time and must return quickly.
pub trait ReportSink: Send + Sync {
    fn record(&self, event: Event);
}

impl<S: ReportSink + ?Sized> ReportSink for Arc<S> {
    fn record(&self, event: Event) {
        (**self).record(event);
    }
}

/// Writes every event through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn record(&self, event: Event) {
        match event {
            Event::PassStarted { pass, input } => {
                info!(pass = pass.number(); "forward pass started with input [{}]", fmt_values(&input));
            }
            Event::UnitComputed {
                pass,
                stage,
                unit,
                value,
            } => {
                debug!(pass = pass.number(), stage = stage, unit = unit; "unit computed {value:.4}");
            }
            Event::StageOutput {
                pass,
                stage,
                role,
                values,
            } => {
                debug!(pass = pass.number(), stage = stage; "{role} stage output [{}]", fmt_values(&values));
            }
            Event::Readout { pass, values } => {
                info!(pass = pass.number(); "f(x1) = {:.4}, f(x2) = {:.4}", values[0], values[1]);
            }
            Event::Backward {
                pass,
                layer,
                values,
            } => {
                info!(pass = pass.number(), layer = layer; "[backward] received [{}]", fmt_values(&values));
            }
            Event::PassFinished { pass } => {
                info!(pass = pass.number(); "forward pass finished");
            }
        }
    }
}

/// Forwards every event to each of its sinks, in order.
#[derive(Clone, Default)]
pub struct Tee {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink at the end of the chain.
    pub fn with(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl ReportSink for Tee {
    fn record(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

/// Keeps every event in memory to build the results file afterwards.
///
/// Clones share the same underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the recorded events in arrival order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Renders the events as a JSON array.
    pub fn render_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.events.lock())
            .map_err(|e| PipelineError::invalid(Site::Setup, format!("cannot encode events: {e}")))
    }

    /// Renders the human readable results report.
    ///
    /// Unit level events are left out, their arrival order depends on scheduling.
    pub fn render_text(&self, config: &PipelineConfig) -> String {
        let events = self.events.lock();
        let mut out = String::from("=== NEURAL NETWORK SIMULATION ===\nConfiguration:\n");
        out.push_str(&format!("  Hidden Layers: {}\n", config.hidden_layers));
        out.push_str(&format!("  Neurons per layer: {}\n", config.units_per_layer));

        let mut backward_header = None;
        for event in events.iter() {
            match event {
                Event::PassStarted { pass, .. } => {
                    out.push_str(&format!("\n*** {} ***\n", pass.heading()));
                }
                Event::StageOutput {
                    stage, role, values, ..
                } => {
                    let heading = match role {
                        StageRole::Input => "INPUT LAYER".to_string(),
                        StageRole::Hidden | StageRole::Output => {
                            format!("{} LAYER {stage}", role.label())
                        }
                    };
                    out.push_str(&format!("\n=== {heading} ===\n"));
                    out.push_str(&format!("Outputs: {}\n", fmt_values(values)));
                }
                Event::Readout { values, .. } => {
                    out.push_str(&format!("f(x1) = {:.4}\nf(x2) = {:.4}\n", values[0], values[1]));
                }
                Event::Backward {
                    pass,
                    layer,
                    values,
                } => {
                    if backward_header != Some(*pass) {
                        backward_header = Some(*pass);
                        out.push_str("\n*** BACKWARD PASS ***\n");
                    }
                    out.push_str(&format!("Layer {layer} backward: {}\n", fmt_values(values)));
                }
                Event::UnitComputed { .. } | Event::PassFinished { .. } => {}
            }
        }

        out.push_str("\n=== SIMULATION COMPLETED ===\n");
        out
    }

    /// Writes the results file, as JSON when `path` ends in `.json` and as text otherwise.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>, config: &PipelineConfig) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => self.render_json()?,
            _ => self.render_text(config),
        };

        fs::write(path, content)?;
        Ok(())
    }
}

impl ReportSink for Transcript {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

fn fmt_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format!("{value:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}
