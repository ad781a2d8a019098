//! Workload registry - type name to factory and port schema
//!
//! The registry is populated once by an explicit initialization function
//! that the entry point calls (for example `tickgraph_library::register_workloads`),
//! then shared read-only with the engine behind an `Arc`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = WorkloadRegistry::new(); // includes the two group types
//! registry.register_type::<SteeringMixer>()?;
//! registry.register(
//!     WorkloadDescriptor::new("CounterWorkload", PortSchema::new().output("n", PortType::I64),
//!         |_config| Ok(Box::new(Counter::default()))),
//! )?;
//! let engine = Engine::new(Arc::new(registry));
//! ```

use crate::core::{PortSchema, Workload, WorkloadConfig, WorkloadType};
use crate::error::{TickError, TickResult};
use crate::scheduling::groups::{SequencedGroup, SyncedGroup};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Constructs a workload instance from its seed configuration
pub type WorkloadFactory =
    Arc<dyn Fn(&WorkloadConfig) -> TickResult<Box<dyn Workload>> + Send + Sync>;

/// Scheduling role of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Leaf,
    SequencedGroup,
    SyncedGroup,
}

impl WorkloadKind {
    pub fn is_group(&self) -> bool {
        !matches!(self, WorkloadKind::Leaf)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::SequencedGroup => write!(f, "sequenced group"),
            Self::SyncedGroup => write!(f, "synced group"),
        }
    }
}

/// Factory plus metadata for one workload type
#[derive(Clone)]
pub struct WorkloadDescriptor {
    pub type_name: String,
    pub kind: WorkloadKind,
    pub schema: Arc<PortSchema>,
    pub default_tick_rate_hz: Option<f64>,
    factory: WorkloadFactory,
}

impl WorkloadDescriptor {
    pub fn new<F>(type_name: &str, schema: PortSchema, factory: F) -> Self
    where
        F: Fn(&WorkloadConfig) -> TickResult<Box<dyn Workload>> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.to_string(),
            kind: WorkloadKind::Leaf,
            schema: Arc::new(schema),
            default_tick_rate_hz: None,
            factory: Arc::new(factory),
        }
    }

    pub fn with_default_tick_rate_hz(mut self, hz: f64) -> Self {
        self.default_tick_rate_hz = Some(hz);
        self
    }

    pub fn with_kind(mut self, kind: WorkloadKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn create(&self, config: &WorkloadConfig) -> TickResult<Box<dyn Workload>> {
        (self.factory)(config)
    }

    fn same_shape(&self, other: &WorkloadDescriptor) -> bool {
        self.kind == other.kind && self.schema == other.schema
    }
}

impl fmt::Debug for WorkloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadDescriptor")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("inputs", &self.schema.inputs.len())
            .field("outputs", &self.schema.outputs.len())
            .field("default_tick_rate_hz", &self.default_tick_rate_hz)
            .finish()
    }
}

/// Catalog of workload types known to this process
#[derive(Debug, Clone)]
pub struct WorkloadRegistry {
    entries: BTreeMap<String, WorkloadDescriptor>,
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadRegistry {
    pub const SEQUENCED_GROUP: &'static str = "SequencedGroupWorkload";
    pub const SYNCED_GROUP: &'static str = "SyncedGroupWorkload";

    /// Registry pre-populated with the two group workload types
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.entries.insert(
            Self::SEQUENCED_GROUP.to_string(),
            WorkloadDescriptor::new(Self::SEQUENCED_GROUP, PortSchema::new(), |_| {
                Ok(Box::new(SequencedGroup::new()))
            })
            .with_kind(WorkloadKind::SequencedGroup),
        );
        registry.entries.insert(
            Self::SYNCED_GROUP.to_string(),
            WorkloadDescriptor::new(Self::SYNCED_GROUP, PortSchema::new(), |_| {
                Ok(Box::new(SyncedGroup::new()))
            })
            .with_kind(WorkloadKind::SyncedGroup),
        );
        registry
    }

    /// Registry without the built-in group types
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a type. Registering the same name again with an identical
    /// schema is a no-op; a different schema is a configuration error.
    pub fn register(&mut self, descriptor: WorkloadDescriptor) -> TickResult<()> {
        if descriptor.type_name.is_empty() {
            return Err(TickError::config("workload type name must not be empty"));
        }
        descriptor.schema.validate(&descriptor.type_name)?;
        if let Some(hz) = descriptor.default_tick_rate_hz {
            if !hz.is_finite() || hz < 0.0 {
                return Err(TickError::config(format!(
                    "workload type '{}' has invalid default tick rate {}",
                    descriptor.type_name, hz
                )));
            }
        }

        match self.entries.get(&descriptor.type_name) {
            Some(existing) if existing.same_shape(&descriptor) => Ok(()),
            Some(_) => Err(TickError::ConflictingRegistration {
                type_name: descriptor.type_name,
            }),
            None => {
                self.entries
                    .insert(descriptor.type_name.clone(), descriptor);
                Ok(())
            }
        }
    }

    /// Register a [`WorkloadType`] implementor
    pub fn register_type<T: WorkloadType>(&mut self) -> TickResult<()> {
        let mut descriptor = WorkloadDescriptor::new(T::TYPE_NAME, T::ports(), |config| {
            Ok(Box::new(T::create(config)?) as Box<dyn Workload>)
        });
        descriptor.default_tick_rate_hz = T::default_tick_rate_hz();
        self.register(descriptor)
    }

    pub fn resolve(&self, type_name: &str) -> TickResult<&WorkloadDescriptor> {
        self.entries
            .get(type_name)
            .ok_or_else(|| TickError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WorkloadDescriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
