//! # Model - the declarative workload graph
//!
//! A [`Model`] collects workload seeds, the group nesting between them, named
//! data connections between their ports and an optional table of remote
//! sub-models with their transport addresses. It is pure data: nothing is
//! instantiated until [`Engine::load`](crate::Engine::load).
//!
//! ```rust,ignore
//! let mut model = Model::new("spine");
//! let mixer = model.add("SteeringMixerWorkload", "steering_mixer")?;
//! let basex = model.add("MotorDriverWorkload", "basex")?;
//! let root = model.add_seed(
//!     WorkloadSeed::new("SequencedGroupWorkload", "control")
//!         .with_children(&[mixer, basex])
//!         .with_tick_rate_hz(30.0),
//! )?;
//! model.connect("steering_mixer.outputs.left_motor", "basex.inputs.motor1_speed")?;
//! model.set_root(root)?;
//! ```

pub mod address;
pub mod document;
pub mod path;
pub mod seed;

pub use address::TransportAddress;
pub use document::ModelDocument;
pub use path::PortPath;
pub use seed::{DataConnectionSeed, WorkloadSeed};

use crate::error::{TickError, TickResult};
use crate::registry::{WorkloadKind, WorkloadRegistry};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use uuid::Uuid;

/// Opaque reference to a seed inside the model that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkloadHandle {
    model: Uuid,
    index: usize,
}

impl WorkloadHandle {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

/// An embedded sub-model and the transport that reaches it
#[derive(Debug, Clone)]
pub struct RemoteModelSeed {
    pub tag: String,
    pub model: Model,
    pub address: TransportAddress,
}

#[derive(Debug, Clone)]
pub struct Model {
    id: Uuid,
    name: String,
    seeds: Vec<WorkloadSeed>,
    names: HashMap<String, usize>,
    connections: Vec<DataConnectionSeed>,
    remotes: Vec<RemoteModelSeed>,
    root: Option<WorkloadHandle>,
}

/// Result of structural validation: pre-order from the root plus the
/// effective tick rate and kind of every seed.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    pub order: Vec<usize>,
    pub rates: Vec<f64>,
    pub kinds: Vec<WorkloadKind>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new("model")
    }
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            seeds: Vec::new(),
            names: HashMap::new(),
            connections: Vec::new(),
            remotes: Vec::new(),
            root: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// Add a workload with no explicit rate, children or configuration
    pub fn add(&mut self, type_name: &str, name: &str) -> TickResult<WorkloadHandle> {
        self.add_seed(WorkloadSeed::new(type_name, name))
    }

    pub fn add_with_rate(
        &mut self,
        type_name: &str,
        name: &str,
        tick_rate_hz: f64,
    ) -> TickResult<WorkloadHandle> {
        self.add_seed(WorkloadSeed::new(type_name, name).with_tick_rate_hz(tick_rate_hz))
    }

    /// Add a group workload owning `children`, in declaration order
    pub fn add_group(
        &mut self,
        type_name: &str,
        name: &str,
        children: &[WorkloadHandle],
        tick_rate_hz: f64,
    ) -> TickResult<WorkloadHandle> {
        self.add_seed(
            WorkloadSeed::new(type_name, name)
                .with_children(children)
                .with_tick_rate_hz(tick_rate_hz),
        )
    }

    pub fn add_seed(&mut self, seed: WorkloadSeed) -> TickResult<WorkloadHandle> {
        path::validate_name(&seed.name).map_err(|reason| TickError::InvalidName {
            name: seed.name.clone(),
            reason,
        })?;
        if self.names.contains_key(&seed.name) {
            return Err(TickError::DuplicateName { name: seed.name });
        }
        if let Some(hz) = seed.tick_rate_hz {
            check_rate(&seed.name, hz)?;
        }
        for child in &seed.children {
            self.check_handle(child)?;
        }

        let index = self.seeds.len();
        self.names.insert(seed.name.clone(), index);
        self.seeds.push(seed);
        Ok(WorkloadHandle {
            model: self.id,
            index,
        })
    }

    pub fn set_tick_rate_hz(&mut self, handle: WorkloadHandle, hz: f64) -> TickResult<()> {
        self.check_handle(&handle)?;
        let seed = &mut self.seeds[handle.index];
        check_rate(&seed.name, hz)?;
        seed.tick_rate_hz = seed::normalize_rate(hz);
        Ok(())
    }

    pub fn set_children(
        &mut self,
        handle: WorkloadHandle,
        children: &[WorkloadHandle],
    ) -> TickResult<()> {
        self.check_handle(&handle)?;
        for child in children {
            self.check_handle(child)?;
        }
        self.seeds[handle.index].children = children.to_vec();
        Ok(())
    }

    pub fn set_config(&mut self, handle: WorkloadHandle, key: &str, value: &str) -> TickResult<()> {
        self.check_handle(&handle)?;
        self.seeds[handle.index].config.set(key, value);
        Ok(())
    }

    /// Record a pending connection. Paths are parsed now; resolution
    /// against real ports is deferred to `Engine::load`.
    pub fn connect(&mut self, source: &str, destination: &str) -> TickResult<&mut Self> {
        let source = PortPath::parse(source)?;
        let destination = PortPath::parse(destination)?;
        self.connections.push(DataConnectionSeed {
            source,
            destination,
        });
        Ok(self)
    }

    /// Embed a fully built sub-model reachable over `address`
    pub fn add_remote_model(&mut self, model: Model, tag: &str, address: &str) -> TickResult<()> {
        path::validate_name(tag).map_err(|reason| TickError::InvalidName {
            name: tag.to_string(),
            reason,
        })?;
        if self.remotes.iter().any(|r| r.tag == tag) {
            return Err(TickError::DuplicateTag {
                tag: tag.to_string(),
            });
        }
        let address = TransportAddress::parse(address)?;
        self.remotes.push(RemoteModelSeed {
            tag: tag.to_string(),
            model,
            address,
        });
        Ok(())
    }

    /// Replace the transport address of an already embedded sub-model
    pub fn set_remote_address(&mut self, tag: &str, address: &str) -> TickResult<()> {
        let address = TransportAddress::parse(address)?;
        let remote = self
            .remotes
            .iter_mut()
            .find(|r| r.tag == tag)
            .ok_or_else(|| TickError::config(format!("no remote model tagged '{}'", tag)))?;
        remote.address = address;
        Ok(())
    }

    pub fn set_root(&mut self, handle: WorkloadHandle) -> TickResult<()> {
        self.check_handle(&handle)?;
        self.root = Some(handle);
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn root(&self) -> Option<WorkloadHandle> {
        self.root
    }

    pub fn seed(&self, handle: WorkloadHandle) -> Option<&WorkloadSeed> {
        if handle.model != self.id {
            return None;
        }
        self.seeds.get(handle.index)
    }

    pub fn find(&self, name: &str) -> Option<WorkloadHandle> {
        self.names.get(name).map(|&index| WorkloadHandle {
            model: self.id,
            index,
        })
    }

    pub fn seeds(&self) -> &[WorkloadSeed] {
        &self.seeds
    }

    pub fn connections(&self) -> &[DataConnectionSeed] {
        &self.connections
    }

    pub fn remotes(&self) -> &[RemoteModelSeed] {
        &self.remotes
    }

    pub fn remote(&self, tag: &str) -> Option<&RemoteModelSeed> {
        self.remotes.iter().find(|r| r.tag == tag)
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    fn check_handle(&self, handle: &WorkloadHandle) -> TickResult<()> {
        if handle.model != self.id || handle.index >= self.seeds.len() {
            return Err(TickError::config(format!(
                "workload handle does not belong to model '{}'",
                self.name
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Structural validation against a registry: root present, every type
    /// known, the group tree acyclic with no seed used twice, every seed
    /// reachable from the root, and child rates never above their parent's.
    /// Remote sub-models are validated recursively.
    pub fn validate(&self, registry: &WorkloadRegistry) -> TickResult<()> {
        self.analyze(registry)?;
        for remote in &self.remotes {
            if !remote.model.remotes.is_empty() {
                return Err(TickError::topology(format!(
                    "remote model '{}' embeds further remote models, which is not supported",
                    remote.tag
                )));
            }
            remote.model.analyze(registry)?;
        }
        for connection in &self.connections {
            for path in [&connection.source, &connection.destination] {
                if let Some(tag) = &path.remote {
                    if self.remote(tag).is_none() {
                        return Err(TickError::UnresolvedPort {
                            path: path.to_string(),
                            reason: format!("no remote model tagged '{}'", tag),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn analyze(&self, registry: &WorkloadRegistry) -> TickResult<Topology> {
        let root = self.root.ok_or_else(|| TickError::NoRoot {
            model: self.name.clone(),
        })?;

        let mut kinds = Vec::with_capacity(self.seeds.len());
        for seed in &self.seeds {
            let descriptor = registry.resolve(&seed.type_name)?;
            if !descriptor.kind.is_group() && !seed.children.is_empty() {
                return Err(TickError::topology(format!(
                    "'{}' ({}) is not a group workload but declares children",
                    seed.name, seed.type_name
                )));
            }
            kinds.push(descriptor.kind);
        }

        let root_seed = &self.seeds[root.index];
        let root_rate = root_seed
            .tick_rate_hz
            .or(registry.resolve(&root_seed.type_name)?.default_tick_rate_hz)
            .filter(|hz| *hz > 0.0)
            .ok_or_else(|| TickError::InvalidRate {
                workload: root_seed.name.clone(),
                message: "the root workload needs a tick rate".to_string(),
            })?;

        let count = self.seeds.len();
        let mut rates = vec![0.0; count];
        let mut visited = vec![false; count];
        let mut order = Vec::with_capacity(count);

        // Iterative pre-order walk; a seed reached twice is either shared
        // between groups or part of a cycle.
        let mut stack = vec![root.index];
        rates[root.index] = root_rate;
        visited[root.index] = true;
        while let Some(index) = stack.pop() {
            order.push(index);
            let seed = &self.seeds[index];
            for child in seed.children.iter().rev() {
                let child_seed = &self.seeds[child.index];
                if visited[child.index] {
                    return Err(TickError::topology(format!(
                        "'{}' appears more than once in the workload tree (under '{}')",
                        child_seed.name, seed.name
                    )));
                }
                visited[child.index] = true;
                rates[child.index] = match child_seed.tick_rate_hz {
                    Some(hz) if hz > rates[index] => {
                        return Err(TickError::InvalidRate {
                            workload: child_seed.name.clone(),
                            message: format!(
                                "{} Hz exceeds the {} Hz of its parent '{}'",
                                hz, rates[index], seed.name
                            ),
                        })
                    }
                    Some(hz) => hz,
                    None => rates[index],
                };
                stack.push(child.index);
            }
        }

        if let Some(orphan) = visited.iter().position(|v| !v) {
            return Err(TickError::topology(format!(
                "'{}' is not reachable from root '{}'",
                self.seeds[orphan].name, root_seed.name
            )));
        }

        Ok(Topology {
            order,
            rates,
            kinds,
        })
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Stable identity of the model's structure, used by the bridge
    /// handshake. Transport addresses are deliberately excluded so a host
    /// and a device agree regardless of how they reach each other.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct CanonicalSeed<'a> {
            type_name: &'a str,
            name: &'a str,
            tick_rate_hz: Option<f64>,
            children: Vec<&'a str>,
            config: BTreeMap<&'a str, &'a str>,
        }

        #[derive(Serialize)]
        struct CanonicalModel<'a> {
            root: Option<&'a str>,
            seeds: Vec<CanonicalSeed<'a>>,
            connections: Vec<String>,
            remotes: Vec<(String, String)>,
        }

        let canonical = CanonicalModel {
            root: self.root.map(|h| self.seeds[h.index].name.as_str()),
            seeds: self
                .seeds
                .iter()
                .map(|s| CanonicalSeed {
                    type_name: &s.type_name,
                    name: &s.name,
                    tick_rate_hz: s.tick_rate_hz,
                    children: s
                        .children
                        .iter()
                        .map(|c| self.seeds[c.index].name.as_str())
                        .collect(),
                    config: s.config.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
                })
                .collect(),
            connections: self.connections.iter().map(|c| c.to_string()).collect(),
            remotes: self
                .remotes
                .iter()
                .map(|r| (r.tag.clone(), r.model.fingerprint()))
                .collect(),
        };

        // Serializing plain structs of strings and numbers cannot fail
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    // ========================================================================
    // Declarative documents
    // ========================================================================

    pub fn from_document(document: &ModelDocument) -> TickResult<Self> {
        document.build()
    }

    /// Load a model from a YAML, TOML or JSON [`ModelDocument`] file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TickResult<Self> {
        ModelDocument::from_file(path)?.build()
    }
}

fn check_rate(name: &str, hz: f64) -> TickResult<()> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(TickError::InvalidRate {
            workload: name.to_string(),
            message: format!("{} is not a valid rate", hz),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PortSchema, PortType, TickContext, Workload};
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
                "IdleWorkload",
                PortSchema::new().output("x", PortType::F32),
                |_| Ok(Box::new(Idle)),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_name_fails_at_build_time() {
        let mut model = Model::new("m");
        model.add("IdleWorkload", "a").unwrap();
        let err = model.add("IdleWorkload", "a").unwrap_err();
        assert!(matches!(err, TickError::DuplicateName { ref name } if name == "a"));
    }

    #[test]
    fn test_duplicate_tag_fails() {
        let mut model = Model::new("m");
        model.add_remote_model(Model::new("s1"), "spine", "local").unwrap();
        let err = model
            .add_remote_model(Model::new("s2"), "spine", "ip:10.0.0.1")
            .unwrap_err();
        assert!(matches!(err, TickError::DuplicateTag { .. }));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut model = Model::new("m");
        assert!(matches!(
            model.add("IdleWorkload", "a.b"),
            Err(TickError::InvalidName { .. })
        ));
        assert!(model.add_remote_model(Model::new("s"), "bad|tag", "local").is_err());
    }

    #[test]
    fn test_validate_requires_root() {
        let mut model = Model::new("m");
        model.add("IdleWorkload", "a").unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::NoRoot { .. })
        ));
    }

    #[test]
    fn test_validate_unknown_type() {
        let mut model = Model::new("m");
        let a = model.add_with_rate("NoSuchWorkload", "a", 10.0).unwrap();
        model.set_root(a).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_child_faster_than_parent_rejected() {
        let mut model = Model::new("m");
        let fast = model.add_with_rate("IdleWorkload", "fast", 100.0).unwrap();
        let root = model
            .add_group(WorkloadRegistry::SEQUENCED_GROUP, "root", &[fast], 30.0)
            .unwrap();
        model.set_root(root).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::InvalidRate { ref workload, .. }) if workload == "fast"
        ));
    }

    #[test]
    fn test_rates_inherit_from_parent() {
        let mut model = Model::new("m");
        let a = model.add("IdleWorkload", "a").unwrap();
        let b = model.add_with_rate("IdleWorkload", "b", 5.0).unwrap();
        let root = model
            .add_group(WorkloadRegistry::SYNCED_GROUP, "root", &[a, b], 30.0)
            .unwrap();
        model.set_root(root).unwrap();
        let topology = model.analyze(&registry()).unwrap();
        assert_eq!(topology.order, vec![root.index(), a.index(), b.index()]);
        assert_eq!(topology.rates[a.index()], 30.0);
        assert_eq!(topology.rates[b.index()], 5.0);
        assert!(topology.kinds[root.index()].is_group());
        assert!(!topology.kinds[a.index()].is_group());
    }

    #[test]
    fn test_shared_child_and_orphans_rejected() {
        let mut model = Model::new("m");
        let a = model.add("IdleWorkload", "a").unwrap();
        let g1 = model
            .add_group(WorkloadRegistry::SEQUENCED_GROUP, "g1", &[a], 0.0)
            .unwrap();
        let g2 = model
            .add_group(WorkloadRegistry::SEQUENCED_GROUP, "g2", &[a], 0.0)
            .unwrap();
        let root = model
            .add_group(WorkloadRegistry::SYNCED_GROUP, "root", &[g1, g2], 10.0)
            .unwrap();
        model.set_root(root).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::Topology(_))
        ));

        let mut model = Model::new("m");
        let a = model.add_with_rate("IdleWorkload", "a", 10.0).unwrap();
        model.add("IdleWorkload", "orphan").unwrap();
        model.set_root(a).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::Topology(_))
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut model = Model::new("m");
        let g1 = model
            .add(WorkloadRegistry::SEQUENCED_GROUP, "g1")
            .unwrap();
        let g2 = model
            .add_group(WorkloadRegistry::SEQUENCED_GROUP, "g2", &[g1], 0.0)
            .unwrap();
        model.set_children(g1, &[g2]).unwrap();
        model.set_tick_rate_hz(g1, 10.0).unwrap();
        model.set_root(g1).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::Topology(_))
        ));
    }

    #[test]
    fn test_leaf_with_children_rejected() {
        let mut model = Model::new("m");
        let a = model.add("IdleWorkload", "a").unwrap();
        let b = model
            .add_seed(
                WorkloadSeed::new("IdleWorkload", "b")
                    .with_children(&[a])
                    .with_tick_rate_hz(10.0),
            )
            .unwrap();
        model.set_root(b).unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::Topology(_))
        ));
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = Model::new("first");
        let mut second = Model::new("second");
        let handle = first.add("IdleWorkload", "a").unwrap();
        assert!(second.set_root(handle).is_err());
    }

    #[test]
    fn test_connection_to_unknown_tag_rejected() {
        let mut model = Model::new("m");
        let a = model.add_with_rate("IdleWorkload", "a", 10.0).unwrap();
        model.set_root(a).unwrap();
        model
            .connect("a.outputs.x", "|ghost|b.inputs.y")
            .unwrap();
        assert!(matches!(
            model.validate(&registry()),
            Err(TickError::UnresolvedPort { .. })
        ));
    }

    #[test]
    fn test_fingerprint_ignores_address_but_tracks_structure() {
        let build = |address: &str, rate: f64| {
            let mut sub = Model::new("spine");
            let a = sub.add_with_rate("IdleWorkload", "a", rate).unwrap();
            sub.set_root(a).unwrap();
            let mut host = Model::new("host");
            let r = host.add_with_rate("IdleWorkload", "r", 10.0).unwrap();
            host.set_root(r).unwrap();
            host.add_remote_model(sub, "spine", address).unwrap();
            host
        };
        assert_eq!(
            build("local", 30.0).fingerprint(),
            build("ip:10.0.0.2", 30.0).fingerprint()
        );
        assert_ne!(
            build("local", 30.0).fingerprint(),
            build("local", 15.0).fingerprint()
        );
        assert_eq!(build("local", 30.0).fingerprint().len(), 16);
    }
}
