// End-to-end engine behavior: lifecycle, ordering, rates and local sub-models
mod common;

use common::{registry, values_of, wait_for, TickLog};
use std::sync::Arc;
use std::time::Duration;
use tickgraph_core::{Engine, EngineState, Model, StopFlag, TickError, WorkloadRegistry};

/// source -> doubler -> sink inside one sequenced group
fn pipeline_model(rate_hz: f64) -> Model {
    let mut model = Model::new("pipeline");
    let source = model.add("SourceWorkload", "source").unwrap();
    let doubler = model.add("DoublerWorkload", "doubler").unwrap();
    let sink = model.add("SinkWorkload", "sink").unwrap();
    let group = model
        .add_group(
            WorkloadRegistry::SEQUENCED_GROUP,
            "main_loop",
            &[source, doubler, sink],
            rate_hz,
        )
        .unwrap();
    model.set_root(group).unwrap();
    model
        .connect("source.outputs.value", "doubler.inputs.in")
        .unwrap()
        .connect("doubler.outputs.out", "sink.inputs.in")
        .unwrap();
    model
}

#[test]
fn test_preset_stop_ticks_nothing() {
    let log = TickLog::default();
    let mut engine = Engine::new(registry(&log));
    engine.load(&pipeline_model(100.0)).unwrap();

    let stop = StopFlag::new();
    stop.set();
    engine.run(&stop).unwrap();

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.root_ticks(), 0);
    assert!(log.lock().is_empty());
}

#[test]
fn test_sequenced_values_propagate_within_one_tick() {
    let log = TickLog::default();
    let mut engine = Engine::new(registry(&log));
    engine.load(&pipeline_model(500.0)).unwrap();

    let stop = StopFlag::new();
    let hook_stop = stop.clone();
    engine.set_tick_hook(move |tick| {
        if tick == 50 {
            hook_stop.set();
        }
    });
    engine.run(&stop).unwrap();

    let expected: Vec<f64> = (1..=50).map(|n| 2.0 * n as f64).collect();
    assert_eq!(values_of(&log, "sink"), expected);
    let order: Vec<String> = log.lock().iter().take(4).map(|(n, _)| n.clone()).collect();
    assert_eq!(order, ["source", "sink", "source", "sink"]);
}

#[test]
fn test_unresolved_port_fails_load_without_ticking() {
    let log = TickLog::default();
    let mut model = pipeline_model(100.0);
    model.connect("source.outputs.missing", "sink.inputs.in").unwrap();

    let mut engine = Engine::new(registry(&log));
    let err = engine.load(&model).unwrap_err();
    assert!(err.is_configuration(), "unexpected {:?}", err);
    assert!(matches!(err, TickError::UnresolvedPort { .. }));
    assert_eq!(engine.state(), EngineState::Empty);
    assert!(log.lock().is_empty());
}

#[test]
fn test_second_writer_is_rejected() {
    let log = TickLog::default();
    let mut model = pipeline_model(100.0);
    model.connect("source.outputs.value", "sink.inputs.in").unwrap();

    let engine = Engine::new(registry(&log));
    assert!(matches!(
        engine.check(&model),
        Err(TickError::MultipleWriters { .. })
    ));
}

#[test]
fn test_synced_children_keep_their_own_rates() {
    let log = TickLog::default();
    let mut model = Model::new("rates");
    let fast = model.add_with_rate("SourceWorkload", "fast", 100.0).unwrap();
    let slow = model.add_with_rate("SourceWorkload", "slow", 10.0).unwrap();
    model.set_config(fast, "label", "fast").unwrap();
    model.set_config(slow, "label", "slow").unwrap();
    let group = model
        .add_group(WorkloadRegistry::SYNCED_GROUP, "workers", &[fast, slow], 100.0)
        .unwrap();
    model.set_root(group).unwrap();

    let mut engine = Engine::new(registry(&log));
    engine.load(&model).unwrap();

    let stop = StopFlag::new();
    let timer_stop = stop.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(1));
        timer_stop.set();
    });
    engine.run(&stop).unwrap();
    timer.join().unwrap();

    let fast = values_of(&log, "fast").len();
    let slow = values_of(&log, "slow").len();
    assert!((70..=110).contains(&fast), "fast ticked {}", fast);
    assert!((6..=12).contains(&slow), "slow ticked {}", slow);
}

#[test]
fn test_local_sub_model_runs_on_its_own_thread() {
    let log = TickLog::default();

    let mut device = Model::new("device");
    let doubler = device.add_with_rate("DoublerWorkload", "doubler", 200.0).unwrap();
    device.set_root(doubler).unwrap();

    let mut host = Model::new("host");
    let source = host.add("SourceWorkload", "source").unwrap();
    let sink = host.add("SinkWorkload", "sink").unwrap();
    host.set_config(source, "value", "21").unwrap();
    let group = host
        .add_group(WorkloadRegistry::SEQUENCED_GROUP, "host_loop", &[source, sink], 200.0)
        .unwrap();
    host.set_root(group).unwrap();
    host.add_remote_model(device, "dev", "local").unwrap();
    host.connect("source.outputs.value", "|dev|doubler.inputs.in")
        .unwrap()
        .connect("|dev|doubler.outputs.out", "sink.inputs.in")
        .unwrap();

    let mut engine = Engine::new(registry(&log));
    let summary = engine.check(&host).unwrap();
    assert_eq!(summary.local_models, vec!["dev".to_string()]);
    assert!(summary.links.is_empty());

    engine.load(&host).unwrap();
    assert!(engine.metrics().iter().any(|m| m.name == "|dev|doubler"));

    let stop = StopFlag::new();
    let hook_stop = stop.clone();
    let hook_log = Arc::clone(&log);
    engine.set_tick_hook(move |tick| {
        let seen = values_of(&hook_log, "sink").last().copied();
        if seen == Some(42.0) || tick >= 2000 {
            hook_stop.set();
        }
    });
    engine.run(&stop).unwrap();

    assert_eq!(values_of(&log, "sink").last().copied(), Some(42.0));
}

#[test]
fn test_stop_from_another_thread() {
    let log = TickLog::default();
    let mut engine = Engine::new(registry(&log));
    engine.load(&pipeline_model(200.0)).unwrap();

    let stop = StopFlag::new();
    let remote_stop = stop.clone();
    let watcher_log = Arc::clone(&log);
    let watcher = std::thread::spawn(move || {
        let started = wait_for(Duration::from_secs(2), || !watcher_log.lock().is_empty());
        remote_stop.set();
        started
    });
    engine.run(&stop).unwrap();
    assert!(watcher.join().unwrap());
    assert_eq!(engine.state(), EngineState::Stopped);
}
