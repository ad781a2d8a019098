//! Declarative model files
//!
//! A [`ModelDocument`] is the serialized form of a [`Model`]: workloads refer
//! to their children by instance name and connections are plain path pairs.
//!
//! ```yaml
//! name: standalone
//! root: main
//! workloads:
//!   - { type: SyncedGroupWorkload, name: main, tick_rate_hz: 30, children: [control, telemetry] }
//!   - { type: SequencedGroupWorkload, name: control, children: [steering_mixer, basex] }
//!   - { type: SteeringMixerWorkload, name: steering_mixer }
//!   - { type: MotorDriverWorkload, name: basex, config: { max_speed: 0.8 } }
//!   - { type: ConsoleTelemetryWorkload, name: telemetry, tick_rate_hz: 5 }
//! connections:
//!   - { from: steering_mixer.outputs.left_motor, to: basex.inputs.motor1_speed }
//! ```

use crate::error::{TickError, TickResult};
use crate::model::{Model, WorkloadSeed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub name: String,
    pub root: String,
    #[serde(default)]
    pub workloads: Vec<WorkloadEntry>,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
    #[serde(default)]
    pub remotes: Vec<RemoteEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_rate_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, ConfigScalar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub tag: String,
    pub address: String,
    pub model: ModelDocument,
}

/// Config values may be written as bare numbers or booleans in YAML/TOML;
/// they are stored as strings on the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ConfigScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl ModelDocument {
    pub fn from_yaml_str(raw: &str) -> TickResult<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_toml_str(raw: &str) -> TickResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a file, picking the format from its extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> TickResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| TickError::config(format!("JSON parse error: {}", e))),
            _ => Err(TickError::config(format!(
                "unsupported model file '{}': expected .yaml, .yml, .toml or .json",
                path.display()
            ))),
        }
    }

    /// Build the [`Model`]. Children may be declared after their group.
    pub fn build(&self) -> TickResult<Model> {
        let mut model = Model::new(&self.name);

        let mut handles = Vec::with_capacity(self.workloads.len());
        for entry in &self.workloads {
            let mut seed = WorkloadSeed::new(&entry.type_name, &entry.name);
            if let Some(hz) = entry.tick_rate_hz {
                seed = seed.with_tick_rate_hz(hz);
            }
            for (key, value) in &entry.config {
                seed.config.set(key, &value.to_string());
            }
            handles.push(model.add_seed(seed)?);
        }

        for (entry, handle) in self.workloads.iter().zip(&handles) {
            if entry.children.is_empty() {
                continue;
            }
            let children = entry
                .children
                .iter()
                .map(|child| {
                    model.find(child).ok_or_else(|| {
                        TickError::topology(format!(
                            "'{}' lists unknown child '{}'",
                            entry.name, child
                        ))
                    })
                })
                .collect::<TickResult<Vec<_>>>()?;
            model.set_children(*handle, &children)?;
        }

        let root = model.find(&self.root).ok_or_else(|| {
            TickError::topology(format!(
                "root '{}' is not declared in model '{}'",
                self.root, self.name
            ))
        })?;
        model.set_root(root)?;

        for connection in &self.connections {
            model.connect(&connection.from, &connection.to)?;
        }

        for remote in &self.remotes {
            let sub = remote.model.build()?;
            model.add_remote_model(sub, &remote.tag, &remote.address)?;
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STANDALONE: &str = r#"
name: standalone
root: main
workloads:
  - { type: SyncedGroupWorkload, name: main, tick_rate_hz: 30, children: [control, telemetry] }
  - { type: SequencedGroupWorkload, name: control, children: [mixer] }
  - { type: SteeringMixerWorkload, name: mixer, config: { gain: 0.5, invert: true } }
  - { type: ConsoleTelemetryWorkload, name: telemetry, tick_rate_hz: 5 }
connections:
  - { from: mixer.outputs.left_motor, to: telemetry.inputs.left }
"#;

    #[test]
    fn test_yaml_document_builds_model() {
        let model = ModelDocument::from_yaml_str(STANDALONE).unwrap().build().unwrap();
        let root = model.root().unwrap();
        assert_eq!(model.seed(root).unwrap().name, "main");
        assert_eq!(model.seed(root).unwrap().children.len(), 2);
        let mixer = model.seed(model.find("mixer").unwrap()).unwrap();
        assert_eq!(mixer.config.get_f64("gain").unwrap(), Some(0.5));
        assert_eq!(mixer.config.get_bool("invert").unwrap(), Some(true));
        assert_eq!(model.connections().len(), 1);
    }

    #[test]
    fn test_toml_document_with_remote() {
        let raw = r#"
name = "host"
root = "main"

[[workloads]]
type = "SequencedGroupWorkload"
name = "main"
tick_rate_hz = 30.0

[[remotes]]
tag = "spine"
address = "local"

[remotes.model]
name = "spine"
root = "basex"

[[remotes.model.workloads]]
type = "MotorDriverWorkload"
name = "basex"
tick_rate_hz = 30.0
"#;
        let model = ModelDocument::from_toml_str(raw).unwrap().build().unwrap();
        let remote = model.remote("spine").unwrap();
        assert!(remote.address.is_local());
        assert!(remote.model.root().is_some());
    }

    #[test]
    fn test_unknown_child_or_root_rejected() {
        let mut doc = ModelDocument::from_yaml_str(STANDALONE).unwrap();
        doc.workloads[1].children.push("ghost".into());
        assert!(doc.build().unwrap_err().is_configuration());

        let mut doc = ModelDocument::from_yaml_str(STANDALONE).unwrap();
        doc.root = "nope".into();
        assert!(doc.build().unwrap_err().is_configuration());
    }

    #[test]
    fn test_from_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(STANDALONE.as_bytes()).unwrap();
        let doc = ModelDocument::from_file(file.path()).unwrap();
        assert_eq!(doc.name, "standalone");

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ModelDocument::from_file(other.path()).is_err());
    }
}
