use crate::commands::run::standard_registry;
use anyhow::Result;
use colored::*;
use tickgraph_core::{PortDescriptor, WorkloadDescriptor};

fn describe_ports(ports: &[PortDescriptor]) -> String {
    if ports.is_empty() {
        return "-".dimmed().to_string();
    }
    ports
        .iter()
        .map(|p| format!("{}: {}", p.name, p.port_type))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One block per registered type
pub fn format_descriptor(descriptor: &WorkloadDescriptor) -> String {
    let rate = descriptor
        .default_tick_rate_hz
        .map(|hz| format!("{} Hz", hz))
        .unwrap_or_else(|| "inherits".to_string());
    format!(
        "{} ({}, {})\n    inputs:  {}\n    outputs: {}",
        descriptor.type_name.bold(),
        descriptor.kind,
        rate,
        describe_ports(&descriptor.schema.inputs),
        describe_ports(&descriptor.schema.outputs)
    )
}

/// `tickgraph types`: list every registered workload type with its ports
pub fn execute() -> Result<()> {
    let registry = standard_registry()?;
    println!(
        "{} ({} registered)\n",
        "Workload types".cyan().bold(),
        registry.len()
    );
    for descriptor in registry.descriptors() {
        println!("  {}", format_descriptor(descriptor));
    }
    Ok(())
}
