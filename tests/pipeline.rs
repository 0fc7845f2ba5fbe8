use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use neural_pipeline::{
    block_on_detached, Driver, Event, InlineWeights, Network, Pass, PassState, PipelineConfig,
    PipelineError, ReportSink, Site, StageRole, Topology, Transcript, UnitKernel, UnitTask,
    WeightFile,
};

fn config(hidden: usize, units: usize) -> PipelineConfig {
    PipelineConfig::new(hidden, NonZeroUsize::new(units).unwrap())
}

fn driver(config: &PipelineConfig, matrices: Vec<Vec<Vec<f64>>>, sink: &Transcript) -> Driver {
    let network = Network::from_provider(config, &InlineWeights::new(matrices)).unwrap();
    Driver::new(network, config, Arc::new(sink.clone()))
}

fn sample_matrices() -> Vec<Vec<Vec<f64>>> {
    vec![vec![vec![0.5, 0.5], vec![1.0, 0.0]], vec![vec![1.0, 1.0]]]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_passes_relay_backward_values() -> Result<(), PipelineError> {
    let config = config(0, 1);
    let sink = Transcript::new();
    let driver = driver(&config, sample_matrices(), &sink);

    let report = driver.run(&vec![1.0, 2.0]).await?;

    assert_eq!(report.first.pass, Pass::One);
    assert_eq!(report.first.backward_values, [5.125, 2.25]);
    assert_eq!(report.second.pass, Pass::Two);
    assert_eq!(report.second.backward_values, [43.736328125, 34.423828125]);

    let events = sink.events();
    assert!(events.contains(&Event::StageOutput {
        pass: Pass::One,
        stage: 0,
        role: StageRole::Input,
        values: vec![1.5, 1.0],
    }));
    assert!(events.contains(&Event::StageOutput {
        pass: Pass::One,
        stage: 1,
        role: StageRole::Output,
        values: vec![2.5],
    }));
    assert!(events.contains(&Event::PassStarted {
        pass: Pass::Two,
        input: vec![5.125, 2.25],
    }));
    assert!(events.contains(&Event::Backward {
        pass: Pass::One,
        layer: 0,
        values: [5.125, 2.25],
    }));

    Ok(())
}

#[tokio::test]
async fn hidden_stages_chain_in_order() -> Result<(), PipelineError> {
    let config = config(2, 2);
    let sink = Transcript::new();
    let identity = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let swap = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
    let matrices = vec![
        vec![vec![0.5, 0.5], vec![1.0, 0.0]],
        swap,
        identity,
        vec![vec![1.0, 1.0], vec![0.0, 0.0]],
    ];
    let driver = driver(&config, matrices, &sink);

    let first = driver.run_pass(Pass::One, vec![1.0, 2.0]).await?;
    assert_eq!(first.backward_values, [5.125, 2.25]);

    let outputs: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::StageOutput { stage, values, .. } => Some((stage, values)),
            _ => None,
        })
        .collect();

    assert_eq!(
        outputs,
        vec![
            (0, vec![1.5, 1.0]),
            (1, vec![1.0, 1.5]),
            (2, vec![1.0, 1.5]),
            (3, vec![2.5, 0.0]),
        ]
    );

    let layers: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Backward { layer, .. } => Some(layer),
            _ => None,
        })
        .collect();
    assert_eq!(layers, vec![2, 1, 0]);

    Ok(())
}

#[tokio::test]
async fn state_machine_steps_through_both_passes() -> Result<(), PipelineError> {
    let config = config(0, 1);
    let sink = Transcript::new();
    let driver = driver(&config, sample_matrices(), &sink);

    let state = driver
        .step(PassState::PassOne {
            input: vec![1.0, 2.0],
        })
        .await?;
    let PassState::PassTwo { input, first } = &state else {
        panic!("expected pass two, got {state:?}");
    };
    assert_eq!(input, &vec![5.125, 2.25]);
    assert_eq!(first.backward_values, [5.125, 2.25]);

    let state = driver.step(state).await?;
    assert!(matches!(state, PassState::Done(_)));
    assert_eq!(driver.step(state.clone()).await?, state);

    Ok(())
}

#[test]
fn topology_shape_is_rebuilt_identically() {
    let config = config(3, 2);
    let mut matrices = vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]]];
    matrices.extend((0..4).map(|_| vec![vec![1.0, 1.0]; 2]));
    let network = Network::from_provider(&config, &InlineWeights::new(matrices)).unwrap();

    let first = Topology::wire(&network, vec![1.0, 2.0], 64).unwrap();
    let second = Topology::wire(&network, vec![5.125, 2.25], 64).unwrap();

    assert_eq!(first.stage_count(), config.stage_count());
    assert_eq!(first.forward_links(), config.hidden_layers + 1);
    assert_eq!(first.shape(), second.shape());
}

#[tokio::test]
async fn bad_row_fails_the_owning_stage() {
    let config = config(1, 2);
    let sink = Transcript::new();
    let matrices = vec![
        vec![vec![0.5, 0.5], vec![1.0, 0.0]],
        vec![vec![1.0, 0.0], vec![1.0, 0.0, 3.0]],
        vec![vec![1.0, 1.0], vec![1.0, 1.0]],
    ];
    let driver = driver(&config, matrices, &sink);

    let err = driver.run(&vec![1.0, 2.0]).await.unwrap_err();

    assert!(
        matches!(err, PipelineError::InvalidConfiguration { site: Site::Stage(1), .. }),
        "unexpected error: {err}"
    );

    let events = sink.events();
    assert!(!events.iter().any(|event| matches!(
        event,
        Event::StageOutput { stage: 1 | 2, .. } | Event::Readout { .. }
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::PassStarted { pass: Pass::Two, .. })));
}

#[tokio::test]
async fn input_width_mismatch_surfaces_in_pass_two() {
    let config = config(0, 1);
    let sink = Transcript::new();
    let matrices = vec![
        vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
        vec![vec![1.0, 1.0]],
    ];
    let driver = driver(&config, matrices, &sink);

    let err = driver.run(&vec![1.0, 2.0, 3.0]).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::InvalidConfiguration { site: Site::Stage(0), .. }
    ));
    assert!(sink
        .events()
        .contains(&Event::PassFinished { pass: Pass::One }));
}

/// Sleeps before computing, optionally only in one stage.
struct Slow {
    delay: Duration,
    stage: Option<usize>,
}

impl UnitKernel for Slow {
    fn compute(&self, task: &UnitTask) -> neural_pipeline::Result<f64> {
        if self.stage.is_none_or(|stage| stage == task.stage()) {
            thread::sleep(self.delay);
        }
        task.compute()
    }
}

fn identity_matrices(hidden: usize) -> Vec<Vec<Vec<f64>>> {
    let identity = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let mut matrices = vec![vec![vec![0.5, 0.5], vec![1.0, 0.0]]];
    matrices.extend((0..hidden).map(|_| identity.clone()));
    matrices.push(vec![vec![1.0, 1.0], vec![0.0, 0.0]]);
    matrices
}

#[tokio::test]
async fn stalled_unit_is_reported_at_its_stage() {
    let config = PipelineConfig {
        stall_timeout_ms: 50,
        ..config(2, 2)
    };

    for _ in 0..5 {
        let sink = Transcript::new();
        let kernel = Slow {
            delay: Duration::from_millis(400),
            stage: Some(0),
        };
        let driver = driver(&config, identity_matrices(2), &sink).with_kernel(Arc::new(kernel));

        let err = driver.run_pass(Pass::One, vec![1.0, 2.0]).await.unwrap_err();

        assert!(
            matches!(err, PipelineError::StallFault { site: Site::Stage(0), .. }),
            "unexpected error: {err}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_stages_within_the_timeout_complete() -> Result<(), PipelineError> {
    let config = PipelineConfig {
        stall_timeout_ms: 200,
        ..config(3, 2)
    };
    let sink = Transcript::new();
    let kernel = Slow {
        delay: Duration::from_millis(80),
        stage: None,
    };
    let driver = driver(&config, identity_matrices(3), &sink).with_kernel(Arc::new(kernel));

    let result = driver.run_pass(Pass::One, vec![1.0, 2.0]).await?;

    assert_eq!(result.backward_values, [5.125, 2.25]);
    Ok(())
}

#[test]
fn stalled_run_returns_without_waiting_for_stuck_units() {
    let config = PipelineConfig {
        stall_timeout_ms: 50,
        ..config(0, 1)
    };
    let sink = Transcript::new();
    let kernel = Slow {
        delay: Duration::from_secs(3),
        stage: Some(0),
    };
    let driver = driver(&config, sample_matrices(), &sink).with_kernel(Arc::new(kernel));

    let started = Instant::now();
    let outcome = block_on_detached(driver.run(&vec![1.0, 2.0])).unwrap();

    assert!(matches!(outcome, Err(PipelineError::StallFault { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn weights_file_drives_the_pipeline() -> Result<(), PipelineError> {
    let file = WeightFile::parse("1.0, 2.0\n0.5, 0.5\n1.0, 0.0\n1.0, 1.0\n")?;
    let config = config(0, 1);
    let sink = Transcript::new();
    let network = Network::from_provider(&config, &file)?;
    let driver = Driver::new(network, &config, Arc::new(sink.clone()));

    let report = driver.run(&file).await?;
    assert_eq!(report.first.backward_values, [5.125, 2.25]);

    let text = sink.render_text(&config);
    assert!(text.contains("f(x1) = 5.1250"));
    assert!(text.contains("*** SECOND FORWARD PASS with f(x1) and f(x2) ***"));

    Ok(())
}

#[derive(Default)]
struct UnitCounter(AtomicUsize);

impl ReportSink for UnitCounter {
    fn record(&self, event: Event) {
        if matches!(event, Event::UnitComputed { .. }) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sink_sees_every_unit() -> Result<(), PipelineError> {
    const UNITS: usize = 16;

    let config = config(1, UNITS);
    let matrices = vec![
        vec![vec![0.5, 0.5], vec![1.0, 0.0]],
        vec![vec![1.0, 1.0]; UNITS],
        vec![vec![1.0; UNITS]; UNITS],
    ];
    let network = Network::from_provider(&config, &InlineWeights::new(matrices))?;
    let counter = Arc::new(UnitCounter::default());
    let driver = Driver::new(network, &config, counter.clone());

    driver.run(&vec![1.0, 2.0]).await?;
    assert_eq!(counter.0.load(Ordering::Relaxed), 2 * (2 + UNITS + UNITS));

    Ok(())
}
