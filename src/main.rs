use std::{env, process, sync::Arc};

use anyhow::Context;
use log::info;

use neural_pipeline::{
    block_on_detached, Driver, LogSink, Network, PipelineConfig, Tee, Transcript, WeightFile,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <weights-file> [config.json]", args[0]);
        process::exit(1);
    }

    block_on_detached(run(&args)).context("failed to start the runtime")?
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    let config = match args.get(2) {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides()?;
    config.validate()?;

    info!(
        hidden_layers = config.hidden_layers, units_per_layer = config.units_per_layer.get();
        "configuration loaded"
    );

    let weights = WeightFile::open(&args[1])
        .with_context(|| format!("failed to load weights from '{}'", args[1]))?;
    let network = Network::from_provider(&config, &weights)?;

    let transcript = Transcript::new();
    let sink = Tee::new().with(LogSink).with(transcript.clone());
    let driver = Driver::new(network, &config, Arc::new(sink));

    let outcome = driver.run(&weights).await;

    if let Some(path) = &config.results_path {
        transcript
            .write_to(path, &config)
            .with_context(|| format!("failed to write results to '{}'", path.display()))?;
        info!("results saved to {}", path.display());
    }

    let report = outcome.context("simulation aborted")?;
    info!(
        "simulation completed: pass 1 -> [{:.4}, {:.4}], pass 2 -> [{:.4}, {:.4}]",
        report.first.backward_values[0],
        report.first.backward_values[1],
        report.second.backward_values[0],
        report.second.backward_values[1],
    );

    Ok(())
}
