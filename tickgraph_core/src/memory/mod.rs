//! Port value storage shared by every workload of one engine

pub mod port_block;

pub use port_block::{PortBlock, PortBlockBuilder, PortCell, PortSpan};
