// Host and device engines bridged over the in-process memory network
mod common;

use common::{registry, values_of, wait_for, TickLog};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tickgraph_core::{
    DefaultTransportFactory, Engine, EngineConfig, EngineState, LinkState, MemoryNetwork, Model,
    PortValue, StalenessPolicy, StopFlag, TickError, TickResult, WorkloadRegistry,
};

fn device_model(rate_hz: f64) -> Model {
    let mut model = Model::new("device");
    let doubler = model.add("DoublerWorkload", "doubler").unwrap();
    let group = model
        .add_group(WorkloadRegistry::SEQUENCED_GROUP, "device_loop", &[doubler], rate_hz)
        .unwrap();
    model.set_root(group).unwrap();
    model
}

fn host_model(device: Model, address: &str) -> Model {
    host_model_with_source(device, address, Some("21"))
}

/// With no `constant` the source emits its own tick count
fn host_model_with_source(device: Model, address: &str, constant: Option<&str>) -> Model {
    let mut host = Model::new("host");
    let source = host.add("SourceWorkload", "source").unwrap();
    let sink = host.add("SinkWorkload", "sink").unwrap();
    if let Some(value) = constant {
        host.set_config(source, "value", value).unwrap();
    }
    let group = host
        .add_group(WorkloadRegistry::SEQUENCED_GROUP, "host_loop", &[source, sink], 200.0)
        .unwrap();
    host.set_root(group).unwrap();
    host.add_remote_model(device, "dev", address).unwrap();
    host.connect("source.outputs.value", "|dev|doubler.inputs.in")
        .unwrap()
        .connect("|dev|doubler.outputs.out", "sink.inputs.in")
        .unwrap();
    host
}

fn fast_bridge() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.bridge.heartbeat_interval_ms = 20;
    config.bridge.link_timeout_ms = 100;
    config.bridge.handshake_timeout_ms = 1000;
    config.bridge.reconnect.fast_delay_ms = 20;
    config.bridge.reconnect.base_delay_ms = 50;
    config.bridge.reconnect.max_delay_ms = 200;
    config
}

struct Device {
    stop: StopFlag,
    thread: JoinHandle<TickResult<()>>,
}

impl Device {
    fn shutdown(self) -> TickResult<()> {
        self.stop.set();
        self.thread.join().unwrap()
    }
}

/// Load `model` on a device engine, serve it on `memory:<name>` and run it
/// on a background thread
fn spawn_device(network: &MemoryNetwork, name: &str, model: Model, config: EngineConfig) -> Device {
    let log = TickLog::default();
    let mut engine = Engine::new(registry(&log))
        .with_config(config)
        .with_transports(Arc::new(DefaultTransportFactory::with_memory_network(
            network.clone(),
        )));
    engine.load(&model).unwrap();
    engine.serve(&format!("memory:{}", name)).unwrap();

    let stop = StopFlag::new();
    let device_stop = stop.clone();
    let thread = std::thread::spawn(move || engine.run(&device_stop));
    Device { stop, thread }
}

fn host_engine(network: &MemoryNetwork, log: &TickLog, config: EngineConfig) -> Engine {
    Engine::new(registry(log))
        .with_config(config)
        .with_transports(Arc::new(DefaultTransportFactory::with_memory_network(
            network.clone(),
        )))
}

#[test]
fn test_memory_bridge_matches_local_result() {
    let network = MemoryNetwork::new();
    let device = spawn_device(&network, "spine", device_model(200.0), fast_bridge());

    let log = TickLog::default();
    let mut host = host_engine(&network, &log, fast_bridge());
    let model = host_model(device_model(200.0), "memory:spine");
    let summary = host.check(&model).unwrap();
    assert_eq!(summary.links, vec!["dev @ memory:spine".to_string()]);

    host.load(&model).unwrap();
    assert_eq!(host.link_status("dev").unwrap().state, LinkState::Synced);

    let stop = StopFlag::new();
    let hook_stop = stop.clone();
    let hook_log = Arc::clone(&log);
    host.set_tick_hook(move |tick| {
        let seen = values_of(&hook_log, "sink").last().copied();
        if seen == Some(42.0) || tick >= 2000 {
            hook_stop.set();
        }
    });
    host.run(&stop).unwrap();

    assert_eq!(values_of(&log, "sink").last().copied(), Some(42.0));
    device.shutdown().unwrap();
}

#[test]
fn test_fingerprint_mismatch_fails_load() {
    let network = MemoryNetwork::new();
    // Device runs a different revision of the sub-model
    let device = spawn_device(&network, "spine", device_model(100.0), fast_bridge());

    let log = TickLog::default();
    let mut host = host_engine(&network, &log, fast_bridge());
    let err = host
        .load(&host_model(device_model(200.0), "memory:spine"))
        .unwrap_err();
    assert!(matches!(err, TickError::Handshake { ref tag, .. } if tag == "dev"), "{:?}", err);
    assert!(log.lock().is_empty());
    device.shutdown().unwrap();
}

#[test]
fn test_unreachable_device_fails_load() {
    let network = MemoryNetwork::new();
    let mut config = fast_bridge();
    config.bridge.initial_connect_attempts = 2;

    let log = TickLog::default();
    let mut host = host_engine(&network, &log, config);
    let err = host
        .load(&host_model(device_model(200.0), "memory:nobody"))
        .unwrap_err();
    assert!(matches!(err, TickError::Link { .. }), "{:?}", err);
}

#[test]
fn test_stop_cuts_initial_connect_short() {
    let network = MemoryNetwork::new();
    let mut config = fast_bridge();
    config.bridge.initial_connect_attempts = 100;
    config.bridge.reconnect.fast_attempts = 0;
    config.bridge.reconnect.base_delay_ms = 200;
    config.bridge.reconnect.factor = 1.0;

    let log = TickLog::default();
    let mut host = host_engine(&network, &log, config);
    let stop = StopFlag::new();
    let timer_stop = stop.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        timer_stop.set();
    });

    let started = Instant::now();
    let err = host
        .load_until(&host_model(device_model(200.0), "memory:nobody"), &stop)
        .unwrap_err();
    timer.join().unwrap();
    assert!(matches!(err, TickError::Link { ref tag, .. } if tag == "dev"), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(host.state(), EngineState::Empty);
}

#[test]
fn test_serve_on_ephemeral_ip_port_reports_bound_port() {
    let log = TickLog::default();
    let mut device = Engine::new(registry(&log)).with_config(fast_bridge());
    device.load(&device_model(200.0)).unwrap();
    let label = device.serve("ip:127.0.0.1:0").unwrap();
    let port: u16 = label.rsplit(':').next().unwrap().parse().unwrap();
    assert_ne!(port, 0, "{}", label);
}

#[test]
fn test_link_degrades_holds_last_value_and_reconnects() {
    let network = MemoryNetwork::new();
    let device = spawn_device(&network, "spine", device_model(200.0), fast_bridge());

    let log = TickLog::default();
    let mut host = host_engine(&network, &log, fast_bridge());
    host.load(&host_model_with_source(
        device_model(200.0),
        "memory:spine",
        None,
    ))
    .unwrap();
    let monitor = host.link_monitor("dev").unwrap();
    let sink_in = host.port("sink.inputs.in").unwrap();
    let sink_value = || match sink_in.get() {
        PortValue::F64(v) => v,
        other => panic!("unexpected sink value {:?}", other),
    };

    let stop = StopFlag::new();
    let host_stop = stop.clone();
    let host_thread = std::thread::spawn(move || host.run(&host_stop));

    assert!(wait_for(Duration::from_secs(3), || sink_value() > 0.0));

    network.sever("spine");
    assert!(wait_for(Duration::from_secs(2), || monitor.state()
        == LinkState::Degraded));
    let held = sink_value();
    assert!(held > 0.0);
    std::thread::sleep(Duration::from_millis(200));
    // The source keeps counting, but nothing new crosses the link
    assert_eq!(sink_value(), held);
    assert!(values_of(&log, "source").last().copied().unwrap() * 2.0 > held);

    network.restore("spine");
    assert!(wait_for(Duration::from_secs(5), || monitor.state()
        == LinkState::Synced));
    assert!(monitor.snapshot().reconnects >= 1);
    assert!(
        wait_for(Duration::from_secs(3), || sink_value() > held),
        "sink stuck at {} after reconnect",
        held
    );

    stop.set();
    host_thread.join().unwrap().unwrap();
    device.shutdown().unwrap();
    assert_eq!(monitor.state(), LinkState::Disconnected);
}

#[test]
fn test_reset_after_policy_falls_back_to_defaults() {
    let network = MemoryNetwork::new();
    let device = spawn_device(&network, "spine", device_model(200.0), fast_bridge());

    let mut config = fast_bridge();
    config.bridge.staleness = StalenessPolicy::ResetAfter { ms: 50 };
    let log = TickLog::default();
    let mut host = host_engine(&network, &log, config);
    host.load(&host_model(device_model(200.0), "memory:spine"))
        .unwrap();
    let sink_in = host.port("sink.inputs.in").unwrap();

    let stop = StopFlag::new();
    let host_stop = stop.clone();
    let host_thread = std::thread::spawn(move || host.run(&host_stop));

    assert!(wait_for(Duration::from_secs(3), || sink_in.get()
        == PortValue::F64(42.0)));
    network.sever("spine");
    assert!(wait_for(Duration::from_secs(2), || sink_in.get()
        == PortValue::F64(0.0)));

    stop.set();
    host_thread.join().unwrap().unwrap();
    device.shutdown().unwrap();
}
