use crate::watchdog::Watchdog;
use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tickgraph_core::{
    install_signal_handler, Engine, EngineConfig, MetricsSnapshot, Model, ModelSummary, StopFlag,
    TransportAddress, WorkloadRegistry,
};
use tickgraph_library::{register_workloads, Platform};

/// Everything `tickgraph run` needs, as parsed from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub platform: Platform,
    pub model: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub serve: Option<String>,
    /// `(tag, address)` overrides for embedded remote models
    pub remotes: Vec<(String, String)>,
    pub core: Option<usize>,
}

/// Parse a `TAG=ADDR` remote override
pub fn parse_remote(raw: &str) -> Result<(String, String)> {
    let (tag, address) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected TAG=ADDR, got '{}'", raw))?;
    let (tag, address) = (tag.trim(), address.trim());
    if tag.is_empty() {
        bail!("remote tag is empty in '{}'", raw);
    }
    TransportAddress::parse(address)?;
    Ok((tag.to_string(), address.to_string()))
}

pub fn standard_registry() -> Result<WorkloadRegistry> {
    let mut registry = WorkloadRegistry::new();
    register_workloads(&mut registry).context("registering standard workloads")?;
    Ok(registry)
}

/// Config file if given, else the platform preset; `--core` overrides either
pub fn resolve_config(options: &RunOptions) -> Result<EngineConfig> {
    let mut config = match &options.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => options.platform.engine_config(),
    };
    if let Some(core) = options.core {
        config.runtime.core_affinity = Some(core);
    }
    Ok(config)
}

/// Model file if given, else the platform's built-in topology, with remote
/// address overrides applied
pub fn resolve_model(options: &RunOptions) -> Result<Model> {
    let mut model = match &options.model {
        Some(path) => Model::from_file(path)
            .with_context(|| format!("loading model {}", path.display()))?,
        None => {
            // The built-in host embeds its device under a fixed tag; take
            // the address from the matching override up front
            let device_address = options
                .remotes
                .iter()
                .find(|(tag, _)| tag == tickgraph_library::DEVICE_TAG)
                .map(|(_, address)| address.as_str());
            options.platform.build_model(device_address)?
        }
    };
    for (tag, address) in &options.remotes {
        model
            .set_remote_address(tag, address)
            .with_context(|| format!("--remote {}={}", tag, address))?;
    }
    Ok(model)
}

/// Default listener for a device started without `--serve`
fn default_serve_address(config: &EngineConfig) -> String {
    format!("ip:0.0.0.0:{}", config.bridge.default_ip_port)
}

fn watchdog_timeout(root_rate_hz: f64) -> Duration {
    let period = if root_rate_hz > 0.0 {
        Duration::from_secs_f64(1.0 / root_rate_hz)
    } else {
        Duration::ZERO
    };
    (period * 10).max(Duration::from_secs(1))
}

pub fn print_summary(summary: &ModelSummary) {
    println!(
        "{} {} ({})",
        "Model:".cyan().bold(),
        summary.name.bold(),
        summary.fingerprint.dimmed()
    );
    println!("  {:<14} {} Hz", "root rate".dimmed(), summary.root_rate_hz);
    println!("  {:<14} {}", "workloads".dimmed(), summary.workloads);
    println!("  {:<14} {}", "port cells".dimmed(), summary.port_cells);
    println!("  {:<14} {}", "bindings".dimmed(), summary.bindings);
    for tag in &summary.local_models {
        println!("  {:<14} {} (in-process)", "local model".dimmed(), tag.yellow());
    }
    for link in &summary.links {
        println!("  {:<14} {}", "link".dimmed(), link.yellow());
    }
}

fn print_metrics(metrics: &[MetricsSnapshot]) {
    println!("\n{}", "Workload metrics".cyan().bold());
    println!(
        "  {:<32} {:>8} {:>8} {:>8} {:>10}",
        "NAME", "TICKS", "FAILED", "OVERRUN", "MAX (us)"
    );
    for m in metrics {
        let failures = if m.failures > 0 {
            m.failures.to_string().red().to_string()
        } else {
            m.failures.to_string()
        };
        println!(
            "  {:<32} {:>8} {:>8} {:>8} {:>10}",
            m.name,
            m.ticks,
            failures,
            m.overruns,
            m.max_tick.as_micros()
        );
    }
}

/// `tickgraph run`: install the stop handler, build, load, run, report
pub fn execute(options: RunOptions) -> Result<()> {
    let stop = StopFlag::new();
    install_signal_handler(&stop)?;

    let config = resolve_config(&options)?;
    let model = resolve_model(&options)?;
    let mut engine = Engine::new(standard_registry()?).with_config(config.clone());

    println!(
        "{} {} platform",
        "Loading".green().bold(),
        options.platform.to_string().bold()
    );
    let summary = engine.check(&model)?;
    print_summary(&summary);
    engine.load_until(&model, &stop)?;

    let serve = match (&options.serve, options.platform) {
        (Some(address), _) => Some(address.clone()),
        (None, Platform::Device) => Some(default_serve_address(&config)),
        (None, _) => None,
    };
    if let Some(address) = serve {
        let listening = engine.serve(&address)?;
        println!("{} {}", "Serving on".green().bold(), listening);
    }

    let mut watchdog = None;
    if config.runtime.watchdog {
        let dog = Watchdog::spawn(watchdog_timeout(summary.root_rate_hz), &stop)?;
        let feeder = dog.feeder();
        engine.set_tick_hook(move |_| feeder.feed());
        watchdog = Some(dog);
    }

    println!("{} (Ctrl+C to stop)", "Running".green().bold());
    let outcome = engine.run(&stop);

    if let Some(mut dog) = watchdog {
        dog.stop();
        if dog.expirations() > 0 {
            println!(
                "{} watchdog expired {} times",
                "[WARNING]".yellow(),
                dog.expirations()
            );
        }
    }
    print_metrics(&engine.metrics());
    for status in engine.link_statuses() {
        println!(
            "  link {} @ {}: {} sent, {} received, {} dropped, {} reconnects",
            status.tag.yellow(),
            status.address,
            status.frames_sent,
            status.frames_received,
            status.frames_dropped,
            status.reconnects
        );
    }

    match outcome {
        Ok(()) => {
            println!(
                "\n{} after {} root ticks",
                "Stopped cleanly".green().bold(),
                engine.root_ticks()
            );
            Ok(())
        }
        Err(e) => Err(anyhow!(e).context("engine stopped on error")),
    }
}
