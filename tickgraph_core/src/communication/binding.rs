//! Resolved connection endpoints
//!
//! `Engine::load` turns every `DataConnectionSeed` into a [`Binding`] exactly
//! once. The `|tag|` prefix of a port path becomes a [`PortEndpoint::Remote`]
//! here and is never re-parsed while ticking.

use crate::core::port::PortType;
use crate::model::PortPath;
use std::fmt;

/// Port living in a remote sub-model, addressed in that model's namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteBinding {
    pub tag: String,
    pub path: PortPath,
}

impl RemoteBinding {
    /// Path as the remote side knows it, without the `|tag|` prefix
    pub fn remote_path(&self) -> String {
        self.path.local_part().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEndpoint {
    /// Index of a cell in the engine's port block
    Local(usize),
    Remote(RemoteBinding),
}

impl PortEndpoint {
    pub fn is_local(&self) -> bool {
        matches!(self, PortEndpoint::Local(_))
    }

    pub fn local_cell(&self) -> Option<usize> {
        match self {
            PortEndpoint::Local(cell) => Some(*cell),
            PortEndpoint::Remote(_) => None,
        }
    }
}

impl fmt::Display for PortEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortEndpoint::Local(cell) => write!(f, "cell#{}", cell),
            PortEndpoint::Remote(remote) => write!(f, "{}", remote.path),
        }
    }
}

/// One resolved data connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub source: PortEndpoint,
    pub destination: PortEndpoint,
    pub source_type: PortType,
    pub destination_type: PortType,
}

impl Binding {
    /// Both ends live in the engine's own port block
    pub fn is_local(&self) -> bool {
        self.source.is_local() && self.destination.is_local()
    }

    /// Tag of the remote link this binding travels over, if any
    pub fn remote_tag(&self) -> Option<&str> {
        match (&self.source, &self.destination) {
            (PortEndpoint::Remote(r), _) | (_, PortEndpoint::Remote(r)) => Some(&r.tag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_tag_and_locality() {
        let remote = RemoteBinding {
            tag: "device".into(),
            path: PortPath::parse("|device|mixer.inputs.speed").unwrap(),
        };
        assert_eq!(remote.remote_path(), "mixer.inputs.speed");

        let binding = Binding {
            source: PortEndpoint::Local(3),
            destination: PortEndpoint::Remote(remote),
            source_type: PortType::F32,
            destination_type: PortType::F64,
        };
        assert!(!binding.is_local());
        assert_eq!(binding.remote_tag(), Some("device"));
        assert_eq!(binding.source.local_cell(), Some(3));
    }
}
