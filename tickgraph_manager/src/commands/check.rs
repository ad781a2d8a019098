use crate::commands::run::{print_summary, standard_registry};
use anyhow::{Context, Result};
use colored::*;
use std::path::Path;
use tickgraph_core::{Engine, Model};
use tickgraph_library::Platform;

/// Validate a model without instantiating any workload. With no file, the
/// platform's built-in topology is checked.
pub fn execute(model_path: Option<&Path>, platform: Platform, quiet: bool) -> Result<()> {
    let model = match model_path {
        Some(path) => {
            Model::from_file(path).with_context(|| format!("loading model {}", path.display()))?
        }
        None => platform.build_model(None)?,
    };
    let engine = Engine::new(standard_registry()?);
    let summary = engine.check(&model)?;
    if !quiet {
        print_summary(&summary);
    }
    println!("{} '{}' is valid", "OK".green().bold(), summary.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_checks_model_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "name: tiny\n\
             root: heart\n\
             workloads:\n  \
               - {{ type: HeartbeatWorkload, name: heart, tick_rate_hz: 10 }}"
        )
        .unwrap();
        execute(Some(file.path()), Platform::Standalone, true).unwrap();
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "name: tiny\n\
             root: ghost\n\
             workloads:\n  \
               - {{ type: GhostWorkload, name: ghost, tick_rate_hz: 10 }}"
        )
        .unwrap();
        let err = execute(Some(file.path()), Platform::Standalone, true).unwrap_err();
        assert!(err.to_string().contains("GhostWorkload"), "{:#}", err);
    }

    #[test]
    fn test_builtin_platforms_are_valid() {
        for platform in [Platform::Host, Platform::Device, Platform::Standalone] {
            execute(None, platform, true).unwrap();
        }
    }
}
