use crate::core::WorkloadConfig;
use crate::model::path::PortPath;
use crate::model::WorkloadHandle;
use std::fmt;

/// Declarative description of one workload instance
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSeed {
    pub type_name: String,
    pub name: String,
    /// `None` means "driven by parent"
    pub tick_rate_hz: Option<f64>,
    pub children: Vec<WorkloadHandle>,
    pub config: WorkloadConfig,
}

impl WorkloadSeed {
    pub fn new(type_name: &str, name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: name.to_string(),
            tick_rate_hz: None,
            children: Vec::new(),
            config: WorkloadConfig::new(),
        }
    }

    /// A rate of 0 is the same as leaving it unset.
    pub fn with_tick_rate_hz(mut self, hz: f64) -> Self {
        self.tick_rate_hz = normalize_rate(hz);
        self
    }

    pub fn with_children(mut self, children: &[WorkloadHandle]) -> Self {
        self.children = children.to_vec();
        self
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }
}

pub(crate) fn normalize_rate(hz: f64) -> Option<f64> {
    if hz == 0.0 {
        None
    } else {
        Some(hz)
    }
}

/// A recorded `source -> destination` port connection, parsed but not yet resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataConnectionSeed {
    pub source: PortPath,
    pub destination: PortPath,
}

impl fmt::Display for DataConnectionSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}
