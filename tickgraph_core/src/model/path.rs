//! Port address parsing
//!
//! Grammar: `[|<remote-tag>|]<workload>.<inputs|outputs>.<port>`. The port
//! name is everything after the section and may itself contain dots
//! (`remote_control.outputs.left.x` names port `left.x`).

use crate::core::PortDirection;
use crate::error::{TickError, TickResult};
use std::fmt;
use std::str::FromStr;

/// A parsed port address. Parsing happens once, when the connection is
/// recorded; nothing re-parses path strings per tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortPath {
    pub remote: Option<String>,
    pub workload: String,
    pub direction: PortDirection,
    pub port: String,
}

impl PortPath {
    pub fn parse(raw: &str) -> TickResult<Self> {
        let invalid = |reason: &str| TickError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let (remote, rest) = if let Some(stripped) = raw.strip_prefix('|') {
            let end = stripped
                .find('|')
                .ok_or_else(|| invalid("remote tag is missing its closing '|'"))?;
            let tag = &stripped[..end];
            validate_name(tag).map_err(|reason| invalid(&reason))?;
            (Some(tag.to_string()), &stripped[end + 1..])
        } else {
            (None, raw)
        };

        let mut parts = rest.splitn(3, '.');
        let workload = parts.next().unwrap_or_default();
        let section = parts
            .next()
            .ok_or_else(|| invalid("expected <workload>.<inputs|outputs>.<port>"))?;
        let port = parts
            .next()
            .ok_or_else(|| invalid("expected <workload>.<inputs|outputs>.<port>"))?;

        validate_name(workload).map_err(|reason| invalid(&reason))?;
        let direction = match section {
            "inputs" => PortDirection::Input,
            "outputs" => PortDirection::Output,
            other => {
                return Err(invalid(&format!(
                    "section must be 'inputs' or 'outputs', found '{}'",
                    other
                )))
            }
        };
        if port.is_empty() || port.split('.').any(|segment| segment.is_empty()) {
            return Err(invalid("port name is empty"));
        }
        if port.contains('|') {
            return Err(invalid("port name must not contain '|'"));
        }

        Ok(Self {
            remote,
            workload: workload.to_string(),
            direction,
            port: port.to_string(),
        })
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The same address without the remote prefix, as seen from inside the
    /// remote model.
    pub fn local_part(&self) -> PortPath {
        PortPath {
            remote: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for PortPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.remote {
            write!(f, "|{}|", tag)?;
        }
        write!(
            f,
            "{}.{}.{}",
            self.workload,
            self.direction.section(),
            self.port
        )
    }
}

impl FromStr for PortPath {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PortPath::parse(s)
    }
}

/// Instance names and remote tags: non-empty, no '.', '|' or whitespace.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is empty".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| *c == '.' || *c == '|' || c.is_whitespace())
    {
        return Err(format!("name '{}' contains forbidden character '{}'", name, c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_path() {
        let path = PortPath::parse("steering_mixer.outputs.left_motor").unwrap();
        assert_eq!(path.remote, None);
        assert_eq!(path.workload, "steering_mixer");
        assert_eq!(path.direction, PortDirection::Output);
        assert_eq!(path.port, "left_motor");
    }

    #[test]
    fn test_parse_remote_path_with_dotted_port() {
        let path = PortPath::parse("|spine|remote_control.inputs.left.x").unwrap();
        assert_eq!(path.remote.as_deref(), Some("spine"));
        assert_eq!(path.direction, PortDirection::Input);
        assert_eq!(path.port, "left.x");
        assert_eq!(path.to_string(), "|spine|remote_control.inputs.left.x");
        assert_eq!(path.local_part().to_string(), "remote_control.inputs.left.x");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for raw in [
            "",
            "mixer",
            "mixer.outputs",
            "mixer.state.x",
            "mixer.outputs.",
            "mixer.outputs.a..b",
            "|spine mixer.outputs.x",
            "||mixer.outputs.x",
            ".outputs.x",
        ] {
            let err = PortPath::parse(raw).unwrap_err();
            assert!(
                matches!(err, TickError::InvalidPath { .. }),
                "{} should be invalid",
                raw
            );
        }
    }
}
