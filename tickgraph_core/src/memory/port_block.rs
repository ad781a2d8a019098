// Port storage - one contiguous block per engine
//
// Cells are laid out at load time in construction (pre-)order: for each
// workload its inputs, then its outputs. A workload's ports are therefore
// adjacent, and a sequenced group's children sit next to each other.

use crate::core::{PortDescriptor, PortDirection, PortSchema, PortType, PortValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// One port slot. The value is only ever replaced whole, so readers never
/// see a partially written value even across SyncedGroup worker threads.
#[derive(Debug)]
pub struct PortCell {
    path: String,
    port_type: PortType,
    default: PortValue,
    value: Mutex<PortValue>,
    /// Bumped on every publish
    version: AtomicU64,
}

impl PortCell {
    fn new(path: String, descriptor: &PortDescriptor) -> Self {
        Self {
            path,
            port_type: descriptor.port_type,
            default: descriptor.default.clone(),
            value: Mutex::new(descriptor.default.clone()),
            version: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Contiguous store of every port value owned by one engine
#[derive(Debug)]
pub struct PortBlock {
    cells: Box<[PortCell]>,
    index: HashMap<String, usize>,
}

/// Cell ranges of one workload inside the block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpan {
    pub inputs: Range<usize>,
    pub outputs: Range<usize>,
}

impl PortSpan {
    pub fn cell(&self, direction: PortDirection, port: usize) -> Option<usize> {
        let range = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        let cell = range.start + port;
        (cell < range.end).then_some(cell)
    }
}

#[derive(Debug, Default)]
pub struct PortBlockBuilder {
    cells: Vec<PortCell>,
    index: HashMap<String, usize>,
}

impl PortBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve cells for one workload. `prefix` is the `|tag|` namespace of
    /// an in-process sub-model, empty for the host model.
    pub fn push_workload(&mut self, prefix: &str, workload: &str, schema: &PortSchema) -> PortSpan {
        let inputs = self.push_ports(prefix, workload, PortDirection::Input, &schema.inputs);
        let outputs = self.push_ports(prefix, workload, PortDirection::Output, &schema.outputs);
        PortSpan { inputs, outputs }
    }

    fn push_ports(
        &mut self,
        prefix: &str,
        workload: &str,
        direction: PortDirection,
        ports: &[PortDescriptor],
    ) -> Range<usize> {
        let start = self.cells.len();
        for port in ports {
            let path = format!(
                "{}{}.{}.{}",
                prefix,
                workload,
                direction.section(),
                port.name
            );
            self.index.insert(path.clone(), self.cells.len());
            self.cells.push(PortCell::new(path, port));
        }
        start..self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn build(self) -> PortBlock {
        PortBlock {
            cells: self.cells.into_boxed_slice(),
            index: self.index,
        }
    }
}

impl PortBlock {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell index for a fully qualified path such as `|spine|basex.inputs.motor1_speed`
    pub fn lookup(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn cell(&self, index: usize) -> &PortCell {
        &self.cells[index]
    }

    pub fn get(&self, index: usize) -> PortValue {
        self.cells[index].value.lock().clone()
    }

    /// Copy a cell into `dst` without reallocating when the variant matches
    pub fn read_into(&self, index: usize, dst: &mut PortValue) {
        dst.clone_from(&self.cells[index].value.lock());
    }

    /// Store a value, coercing it to the cell type. Returns false if the value
    /// cannot be represented in the cell's type.
    pub fn set(&self, index: usize, value: &PortValue) -> bool {
        let cell = &self.cells[index];
        match value.coerce(cell.port_type) {
            Some(coerced) => {
                *cell.value.lock() = coerced;
                cell.version.fetch_add(1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Copy `src` into `dst`, applying widening
    pub fn copy(&self, src: usize, dst: usize) -> bool {
        if src == dst {
            return true;
        }
        let value = self.get(src);
        self.set(dst, &value)
    }

    pub fn reset(&self, index: usize) {
        let cell = &self.cells[index];
        *cell.value.lock() = cell.default.clone();
        cell.version.fetch_add(1, Ordering::Release);
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> PortSchema {
        PortSchema::new()
            .input("speed", PortType::F32)
            .output("left", PortType::F64)
    }

    #[test]
    fn test_layout_is_contiguous_per_workload() {
        let mut builder = PortBlockBuilder::new();
        let a = builder.push_workload("", "a", &schema());
        let b = builder.push_workload("|spine|", "b", &schema());
        assert_eq!(a.inputs, 0..1);
        assert_eq!(a.outputs, 1..2);
        assert_eq!(b.inputs, 2..3);
        let block = builder.build();
        assert_eq!(block.lookup("a.outputs.left"), Some(1));
        assert_eq!(block.lookup("|spine|b.inputs.speed"), Some(2));
        assert_eq!(b.cell(PortDirection::Output, 0), Some(3));
        assert_eq!(b.cell(PortDirection::Output, 1), None);
    }

    #[test]
    fn test_set_coerces_and_rejects() {
        let mut builder = PortBlockBuilder::new();
        builder.push_workload("", "a", &schema());
        let block = builder.build();
        assert!(block.set(1, &PortValue::F32(0.5)));
        assert_eq!(block.get(1), PortValue::F64(0.5));
        assert!(!block.set(0, &PortValue::Bool(true)));
        assert_eq!(block.cell(1).version(), 1);

        block.reset(1);
        assert_eq!(block.get(1), PortValue::F64(0.0));
    }
}
