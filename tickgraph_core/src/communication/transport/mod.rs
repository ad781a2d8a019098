//! Bridge transports
//!
//! A [`Transport`] moves whole [`Frame`]s and never blocks the caller beyond
//! an explicit timeout. Concrete channels:
//!
//! - `ip:` - TCP through a shared tokio runtime ([`ip`])
//! - `uart:` - serial line through `serialport` ([`uart`], feature `uart`)
//! - `memory:` - in-process network for simulation and tests ([`memory`])
//!
//! `local` never reaches this layer: the engine merges a local sub-model
//! into its own port block instead.

pub mod channel;
pub mod ip;
pub mod memory;
pub mod uart;

use crate::communication::frame::Frame;
use crate::error::{TickError, TickResult};
use crate::model::TransportAddress;
use crate::scheduling::config::BridgeConfig;
use std::time::Duration;

pub use channel::ChannelTransport;
pub use memory::MemoryNetwork;

/// A connected, bidirectional frame channel
pub trait Transport: Send {
    /// Queue a frame. Fails if the channel is closed or its queue is full.
    fn send(&mut self, frame: &Frame) -> TickResult<()>;

    /// Next received frame, without blocking. `Err` once the channel is closed.
    fn try_recv(&mut self) -> TickResult<Option<Frame>>;

    /// Wait up to `timeout` for a frame
    fn recv_timeout(&mut self, timeout: Duration) -> TickResult<Option<Frame>>;

    fn is_open(&self) -> bool;

    /// Peer description for logs
    fn describe(&self) -> String;

    fn close(&mut self) {}
}

/// Device-side acceptor
pub trait Listener: Send {
    /// A newly connected peer, if one is waiting. Never blocks.
    fn accept(&mut self) -> TickResult<Option<Box<dyn Transport>>>;

    fn describe(&self) -> String;
}

/// Opens transports for parsed addresses. The engine owns one behind an `Arc`
/// so reconnect threads can reopen links.
pub trait TransportFactory: Send + Sync {
    fn connect(
        &self,
        address: &TransportAddress,
        config: &BridgeConfig,
    ) -> TickResult<Box<dyn Transport>>;

    fn listen(
        &self,
        address: &TransportAddress,
        config: &BridgeConfig,
    ) -> TickResult<Box<dyn Listener>>;
}

/// Factory for every built-in transport
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    memory: MemoryNetwork,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `memory:` addresses against `network`
    pub fn with_memory_network(network: MemoryNetwork) -> Self {
        Self { memory: network }
    }

    pub fn memory_network(&self) -> &MemoryNetwork {
        &self.memory
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn connect(
        &self,
        address: &TransportAddress,
        config: &BridgeConfig,
    ) -> TickResult<Box<dyn Transport>> {
        match address {
            TransportAddress::Ip { port: Some(0), .. } => Err(TickError::InvalidAddress {
                address: address.to_string(),
                reason: "port 0 can only be served, not connected to".to_string(),
            }),
            TransportAddress::Ip { host, port } => Ok(Box::new(ip::connect(
                host,
                port.unwrap_or(config.default_ip_port),
                config.connect_timeout(),
            )?)),
            TransportAddress::Uart { device } => Ok(Box::new(uart::open(
                device,
                config.uart_baud_rate,
            )?)),
            TransportAddress::Memory { name } => Ok(Box::new(self.memory.connect(name)?)),
            TransportAddress::Local => Err(TickError::transport(
                "'local' is merged in-process and has no transport",
            )),
        }
    }

    fn listen(
        &self,
        address: &TransportAddress,
        config: &BridgeConfig,
    ) -> TickResult<Box<dyn Listener>> {
        match address {
            TransportAddress::Ip { host, port } => Ok(Box::new(ip::listen(
                host,
                port.unwrap_or(config.default_ip_port),
            )?)),
            TransportAddress::Uart { device } => Ok(Box::new(uart::SerialListener::new(
                device,
                config.uart_baud_rate,
            ))),
            TransportAddress::Memory { name } => Ok(Box::new(self.memory.listen(name)?)),
            TransportAddress::Local => Err(TickError::transport(
                "cannot serve on 'local'; use a uart:, ip: or memory: address",
            )),
        }
    }
}
