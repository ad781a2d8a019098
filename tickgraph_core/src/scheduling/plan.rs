//! Load-time resolution
//!
//! Everything `Engine::load` needs to know before it instantiates a single
//! workload: the port block layout, every connection resolved to a
//! [`Binding`], and one [`LinkPlan`] per bridged remote model. `Engine::check`
//! stops here, so a topology that plans cleanly is one that loads, apart
//! from transports and workload `setup`.

use crate::communication::binding::{Binding, PortEndpoint, RemoteBinding};
use crate::communication::bridge::{ExportBinding, ImportBinding, LinkPlan};
use crate::core::{PortDirection, PortType};
use crate::error::{TickError, TickResult};
use crate::memory::{PortBlock, PortBlockBuilder, PortSpan};
use crate::model::{DataConnectionSeed, Model, PortPath, Topology};
use crate::registry::WorkloadRegistry;
use std::collections::{HashMap, HashSet};

/// One model materialized into the engine's block: the host model itself, or
/// a remote model forced in-process with `local`.
#[derive(Debug)]
pub(crate) struct PlannedUnit<'m> {
    /// Remote tag for a merged `local` sub-model
    pub tag: Option<String>,
    pub model: &'m Model,
    pub topology: Topology,
    /// Port span per seed index
    pub spans: Vec<PortSpan>,
}

impl PlannedUnit<'_> {
    pub fn prefix(&self) -> String {
        match &self.tag {
            Some(tag) => format!("|{}|", tag),
            None => String::new(),
        }
    }

    pub fn root_rate(&self) -> f64 {
        self.model
            .root()
            .map(|root| self.topology.rates[root.index()])
            .unwrap_or(0.0)
    }
}

#[derive(Debug)]
pub(crate) struct LoadPlan<'m> {
    pub units: Vec<PlannedUnit<'m>>,
    pub block: PortBlock,
    pub bindings: Vec<Binding>,
    /// Destination input cell -> source output cell, for in-block bindings
    pub input_sources: HashMap<usize, usize>,
    pub links: Vec<LinkPlan>,
}

impl LoadPlan<'_> {
    /// Input cells with a writer inside the block
    pub fn driven_inputs(&self) -> Vec<bool> {
        let mut driven = vec![false; self.block.len()];
        for &destination in self.input_sources.keys() {
            driven[destination] = true;
        }
        driven
    }
}

pub(crate) fn plan<'m>(model: &'m Model, registry: &WorkloadRegistry) -> TickResult<LoadPlan<'m>> {
    model.validate(registry)?;

    let mut units = vec![PlannedUnit {
        tag: None,
        model,
        topology: model.analyze(registry)?,
        spans: Vec::new(),
    }];
    for remote in model.remotes() {
        if remote.address.is_local() {
            units.push(PlannedUnit {
                tag: Some(remote.tag.clone()),
                model: &remote.model,
                topology: remote.model.analyze(registry)?,
                spans: Vec::new(),
            });
        }
    }

    // Pre-order per unit keeps a workload's ports and a group's children adjacent
    let mut builder = PortBlockBuilder::new();
    for unit in &mut units {
        let prefix = unit.prefix();
        let mut spans = vec![PortSpan::default(); unit.model.seeds().len()];
        for &index in &unit.topology.order {
            let seed = &unit.model.seeds()[index];
            let schema = &registry.resolve(&seed.type_name)?.schema;
            spans[index] = builder.push_workload(&prefix, &seed.name, schema);
        }
        unit.spans = spans;
    }
    let block = builder.build();

    let mut resolver = Resolver {
        registry,
        host: model,
        units: &units,
        writers: HashSet::new(),
        bindings: Vec::new(),
    };
    for connection in model.connections() {
        resolver.resolve(connection, None)?;
    }
    for remote in model.remotes() {
        for connection in remote.model.connections() {
            resolver.resolve(connection, Some(&remote.tag))?;
        }
    }
    let bindings = resolver.bindings;

    let mut input_sources = HashMap::new();
    for binding in &bindings {
        if let (PortEndpoint::Local(src), PortEndpoint::Local(dst)) =
            (&binding.source, &binding.destination)
        {
            input_sources.insert(*dst, *src);
        }
    }

    let links = model
        .remotes()
        .iter()
        .filter(|remote| !remote.address.is_local())
        .map(|remote| {
            let mut link = LinkPlan {
                tag: remote.tag.clone(),
                address: remote.address.clone(),
                fingerprint: remote.model.fingerprint(),
                imports: Vec::new(),
                exports: Vec::new(),
            };
            for binding in &bindings {
                match (&binding.source, &binding.destination) {
                    (PortEndpoint::Local(source), PortEndpoint::Remote(dst)) if dst.tag == remote.tag => {
                        link.imports.push(ImportBinding {
                            remote_path: dst.remote_path(),
                            source: *source,
                        });
                    }
                    (PortEndpoint::Remote(src), PortEndpoint::Local(destination))
                        if src.tag == remote.tag =>
                    {
                        let remote_path = src.remote_path();
                        match link.exports.iter_mut().find(|e| e.remote_path == remote_path) {
                            Some(export) => export.destinations.push(*destination),
                            None => link.exports.push(ExportBinding {
                                remote_path,
                                destinations: vec![*destination],
                            }),
                        }
                    }
                    _ => {}
                }
            }
            link
        })
        .collect();

    Ok(LoadPlan {
        units,
        block,
        bindings,
        input_sources,
        links,
    })
}

struct Resolver<'a, 'm> {
    registry: &'a WorkloadRegistry,
    host: &'m Model,
    units: &'a [PlannedUnit<'m>],
    /// Fully qualified destination paths already written
    writers: HashSet<String>,
    bindings: Vec<Binding>,
}

impl Resolver<'_, '_> {
    /// Resolve one connection. `within` is the tag of the sub-model that
    /// declared it, whose paths are relative to that sub-model.
    fn resolve(&mut self, connection: &DataConnectionSeed, within: Option<&str>) -> TickResult<()> {
        let qualify = |path: &PortPath| -> PortPath {
            match (within, &path.remote) {
                (Some(tag), None) => PortPath {
                    remote: Some(tag.to_string()),
                    ..path.clone()
                },
                _ => path.clone(),
            }
        };
        let source = qualify(&connection.source);
        let destination = qualify(&connection.destination);

        if source.direction != PortDirection::Output {
            return Err(TickError::DirectionMismatch {
                path: source.to_string(),
                expected: "an output port as connection source".to_string(),
            });
        }
        if destination.direction != PortDirection::Input {
            return Err(TickError::DirectionMismatch {
                path: destination.to_string(),
                expected: "an input port as connection destination".to_string(),
            });
        }

        let (src_endpoint, source_type) = self.endpoint(&source)?;
        let (dst_endpoint, destination_type) = self.endpoint(&destination)?;

        if !source_type.can_feed(destination_type) {
            return Err(TickError::TypeMismatch {
                src: source.to_string(),
                dst: destination.to_string(),
                src_type: source_type.to_string(),
                dst_type: destination_type.to_string(),
            });
        }

        if !self.writers.insert(destination.to_string()) {
            return Err(TickError::MultipleWriters {
                path: destination.to_string(),
            });
        }

        match (&src_endpoint, &dst_endpoint) {
            // Device-internal wiring: checked here, executed on the device
            (PortEndpoint::Remote(a), PortEndpoint::Remote(b))
                if within.is_some() && a.tag == b.tag => {}
            (PortEndpoint::Remote(a), PortEndpoint::Remote(b)) => {
                return Err(TickError::topology(format!(
                    "'{}' -> '{}' connects two bridged ports ('{}' and '{}'); \
                     declare it inside the remote model instead",
                    source, destination, a.tag, b.tag
                )));
            }
            _ => {}
        }

        self.bindings.push(Binding {
            source: src_endpoint,
            destination: dst_endpoint,
            source_type,
            destination_type,
        });
        Ok(())
    }

    fn endpoint(&self, path: &PortPath) -> TickResult<(PortEndpoint, PortType)> {
        let unit = self
            .units
            .iter()
            .find(|unit| unit.tag.as_deref() == path.remote.as_deref());
        if let Some(unit) = unit {
            let (seed, port, port_type) = port_in(unit.model, self.registry, path)?;
            let cell = unit.spans[seed]
                .cell(path.direction, port)
                .ok_or_else(|| unresolved(path, "port has no cell"))?;
            return Ok((PortEndpoint::Local(cell), port_type));
        }

        let tag = path
            .remote
            .as_deref()
            .ok_or_else(|| unresolved(path, "no such model"))?;
        let remote = self
            .host
            .remote(tag)
            .ok_or_else(|| unresolved(path, &format!("no remote model tagged '{}'", tag)))?;
        let (_, _, port_type) = port_in(&remote.model, self.registry, path)?;
        Ok((
            PortEndpoint::Remote(RemoteBinding {
                tag: tag.to_string(),
                path: path.clone(),
            }),
            port_type,
        ))
    }
}

/// Seed index, port index and type of `path` inside `model`
fn port_in(
    model: &Model,
    registry: &WorkloadRegistry,
    path: &PortPath,
) -> TickResult<(usize, usize, PortType)> {
    let seed = model
        .index_of(&path.workload)
        .ok_or_else(|| unresolved(path, &format!("no workload named '{}'", path.workload)))?;
    let type_name = &model.seeds()[seed].type_name;
    let schema = &registry.resolve(type_name)?.schema;
    let port = schema.index_of(path.direction, &path.port).ok_or_else(|| {
        unresolved(
            path,
            &format!("{} has no {} port '{}'", type_name, path.direction, path.port),
        )
    })?;
    let port_type = schema.ports(path.direction)[port].port_type;
    Ok((seed, port, port_type))
}

fn unresolved(path: &PortPath, reason: &str) -> TickError {
    TickError::UnresolvedPort {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PortSchema, TickContext, Workload};
    use crate::registry::WorkloadDescriptor;

    struct Idle;

    impl Workload for Idle {
        fn tick(&mut self, _ctx: &mut TickContext<'_>) -> TickResult<()> {
            Ok(())
        }
    }

    fn registry() -> WorkloadRegistry {
        let mut registry = WorkloadRegistry::new();
        registry
            .register(WorkloadDescriptor::new(
                "SourceWorkload",
                PortSchema::new()
                    .output("x", PortType::F32)
                    .output("label", PortType::Text),
                |_| Ok(Box::new(Idle)),
            ))
            .unwrap();
        registry
            .register(WorkloadDescriptor::new(
                "SinkWorkload",
                PortSchema::new()
                    .input("y", PortType::F64)
                    .output("echo", PortType::F64),
                |_| Ok(Box::new(Idle)),
            ))
            .unwrap();
        registry
    }

    fn pair() -> Model {
        let mut model = Model::new("pair");
        let a = model.add("SourceWorkload", "a").unwrap();
        let b = model.add("SinkWorkload", "b").unwrap();
        let root = model
            .add_group(WorkloadRegistry::SEQUENCED_GROUP, "root", &[a, b], 50.0)
            .unwrap();
        model.set_root(root).unwrap();
        model
    }

    #[test]
    fn test_local_connection_binds_cells_with_widening() {
        let registry = registry();
        let mut model = pair();
        model.connect("a.outputs.x", "b.inputs.y").unwrap();
        let plan = plan(&model, &registry).unwrap();

        assert_eq!(plan.bindings.len(), 1);
        let src = plan.block.lookup("a.outputs.x").unwrap();
        let dst = plan.block.lookup("b.inputs.y").unwrap();
        assert_eq!(plan.input_sources.get(&dst), Some(&src));
        assert!(plan.driven_inputs()[dst]);
        // pre-order layout: group first, then a, then b
        assert!(src < dst);
    }

    #[test]
    fn test_bad_connections_rejected() {
        let registry = registry();
        let cases = [
            ("a.outputs.missing", "b.inputs.y"),
            ("b.inputs.y", "a.outputs.x"),
            ("a.outputs.label", "b.inputs.y"),
            ("ghost.outputs.x", "b.inputs.y"),
        ];
        for (src, dst) in cases {
            let mut model = pair();
            model.connect(src, dst).unwrap();
            let err = plan(&model, &registry).unwrap_err();
            assert!(err.is_configuration(), "{} -> {}: {}", src, dst, err);
        }

        let mut model = pair();
        model.connect("a.outputs.x", "b.inputs.y").unwrap();
        model.connect("b.outputs.echo", "b.inputs.y").unwrap();
        assert!(matches!(
            plan(&model, &registry).unwrap_err(),
            TickError::MultipleWriters { .. }
        ));
    }

    #[test]
    fn test_local_remote_is_merged_and_bridged_remote_is_planned() {
        let registry = registry();

        for (address, merged) in [("local", true), ("memory:device", false)] {
            let mut host = pair();
            host.add_remote_model(pair(), "dev", address).unwrap();
            host.connect("a.outputs.x", "|dev|b.inputs.y").unwrap();
            host.connect("|dev|b.outputs.echo", "b.inputs.y").unwrap();
            let plan = plan(&host, &registry).unwrap();

            if merged {
                assert_eq!(plan.units.len(), 2);
                assert!(plan.links.is_empty());
                assert!(plan.block.lookup("|dev|b.inputs.y").is_some());
                assert!(plan.bindings.iter().all(|b| b.is_local()));
            } else {
                assert_eq!(plan.units.len(), 1);
                let link = &plan.links[0];
                assert_eq!(link.fingerprint, pair().fingerprint());
                assert_eq!(link.imports[0].remote_path, "b.inputs.y");
                assert_eq!(link.exports[0].remote_path, "b.outputs.echo");
                assert_eq!(
                    link.exports[0].destinations,
                    vec![plan.block.lookup("b.inputs.y").unwrap()]
                );
                assert!(plan.input_sources.is_empty());
            }
        }
    }

    #[test]
    fn test_writer_inside_remote_conflicts_with_host_writer() {
        let registry = registry();
        let mut device = pair();
        device.connect("a.outputs.x", "b.inputs.y").unwrap();
        let mut host = pair();
        host.add_remote_model(device, "dev", "memory:device").unwrap();
        host.connect("a.outputs.x", "|dev|b.inputs.y").unwrap();
        assert!(matches!(
            plan(&host, &registry).unwrap_err(),
            TickError::MultipleWriters { .. }
        ));
    }
}
