//! Typed, named, directional data slots on a workload

use crate::error::{TickError, TickResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type tag of a port. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Text,
    Bytes,
}

impl PortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }

    /// Whether a value of type `self` can be copied into a port of type `dst`.
    ///
    /// Exact matches always can; lossless numeric widening is also allowed.
    pub fn can_feed(&self, dst: PortType) -> bool {
        if *self == dst {
            return true;
        }
        matches!(
            (self, dst),
            (PortType::I32, PortType::I64)
                | (PortType::I32, PortType::F64)
                | (PortType::F32, PortType::F64)
        )
    }

    /// Zero value used when a descriptor does not specify a default
    pub fn zero(&self) -> PortValue {
        match self {
            Self::Bool => PortValue::Bool(false),
            Self::I32 => PortValue::I32(0),
            Self::I64 => PortValue::I64(0),
            Self::F32 => PortValue::F32(0.0),
            Self::F64 => PortValue::F64(0.0),
            Self::Text => PortValue::Text(String::new()),
            Self::Bytes => PortValue::Bytes(Vec::new()),
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete value held by a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl PortValue {
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::I32(_) => PortType::I32,
            Self::I64(_) => PortType::I64,
            Self::F32(_) => PortType::F32,
            Self::F64(_) => PortType::F64,
            Self::Text(_) => PortType::Text,
            Self::Bytes(_) => PortType::Bytes,
        }
    }

    /// Convert into `target`, applying the widening rules of [`PortType::can_feed`].
    pub fn coerce(&self, target: PortType) -> Option<PortValue> {
        match (self, target) {
            (v, t) if v.port_type() == t => Some(v.clone()),
            (PortValue::I32(v), PortType::I64) => Some(PortValue::I64(*v as i64)),
            (PortValue::I32(v), PortType::F64) => Some(PortValue::F64(*v as f64)),
            (PortValue::F32(v), PortType::F64) => Some(PortValue::F64(*v as f64)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of any integer or float value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I32(v) => Some(*v as f64),
            Self::I64(v) => Some(*v as f64),
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => self.as_f64().map(|v| v as f32),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{:.3}", v),
            Self::F64(v) => write!(f, "{:.3}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "Bytes[{}]", v.len()),
        }
    }
}

impl From<bool> for PortValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PortValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for PortValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for PortValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for PortValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<String> for PortValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for PortValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for PortValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    /// Section keyword used in port paths
    pub fn section(&self) -> &'static str {
        match self {
            Self::Input => "inputs",
            Self::Output => "outputs",
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// Static description of one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub port_type: PortType,
    pub direction: PortDirection,
    pub default: PortValue,
}

impl PortDescriptor {
    pub fn input(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            direction: PortDirection::Input,
            default: port_type.zero(),
        }
    }

    pub fn output(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            direction: PortDirection::Output,
            default: port_type.zero(),
        }
    }

    /// Override the default value. The value must match the port type.
    pub fn with_default(mut self, value: impl Into<PortValue>) -> Self {
        self.default = value.into();
        self
    }
}

/// Ordered input and output port lists of one workload type.
///
/// Port indices used by [`TickContext`](crate::core::TickContext) are the
/// positions in these lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSchema {
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}

impl PortSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: &str, port_type: PortType) -> Self {
        self.inputs.push(PortDescriptor::input(name, port_type));
        self
    }

    pub fn output(mut self, name: &str, port_type: PortType) -> Self {
        self.outputs.push(PortDescriptor::output(name, port_type));
        self
    }

    /// Add a fully specified descriptor to the list matching its direction
    pub fn port(mut self, descriptor: PortDescriptor) -> Self {
        match descriptor.direction {
            PortDirection::Input => self.inputs.push(descriptor),
            PortDirection::Output => self.outputs.push(descriptor),
        }
        self
    }

    pub fn ports(&self, direction: PortDirection) -> &[PortDescriptor] {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    pub fn index_of(&self, direction: PortDirection, name: &str) -> Option<usize> {
        self.ports(direction).iter().position(|p| p.name == name)
    }

    pub fn find(&self, direction: PortDirection, name: &str) -> Option<&PortDescriptor> {
        self.ports(direction).iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Check name uniqueness and default/type agreement
    pub fn validate(&self, type_name: &str) -> TickResult<()> {
        let mut seen = std::collections::HashSet::new();
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            if port.name.is_empty() {
                return Err(TickError::config(format!(
                    "workload type '{}' declares a port with an empty name",
                    type_name
                )));
            }
            if !seen.insert(port.name.as_str()) {
                return Err(TickError::config(format!(
                    "workload type '{}' declares port '{}' more than once",
                    type_name, port.name
                )));
            }
            if port.default.port_type() != port.port_type {
                return Err(TickError::config(format!(
                    "workload type '{}' port '{}' has a {} default for a {} port",
                    type_name,
                    port.name,
                    port.default.port_type(),
                    port.port_type
                )));
            }
        }
        Ok(())
    }
}
