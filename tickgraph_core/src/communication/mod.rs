//! # Remote bridging for tickgraph
//!
//! Keeps a host-side proxy of a remote sub-model and the device that really
//! runs it consistent over an unreliable transport:
//!
//! - **Binding**: resolved connection endpoints, local cell or remote port
//! - **Frame**: wire format with sequence numbers and stream framing
//! - **RemoteLink**: host-side link state machine with heartbeats and reconnect
//! - **ServeEndpoint**: device side, answering handshakes and exchanging values
//! - **Transport**: `ip:`, `uart:` and in-process `memory:` channels
//!
//! ```rust,ignore
//! let mut host = Engine::new(registry.clone());
//! host.load(&host_model)?;           // opens and handshakes every remote link
//! host.run(&stop)?;                  // link values exchanged at root-tick boundaries
//! ```

pub mod backoff;
pub mod binding;
pub mod bridge;
pub mod endpoint;
pub mod frame;
pub mod transport;

pub use backoff::Backoff;
pub use binding::{Binding, PortEndpoint, RemoteBinding};
pub use bridge::{
    ExportBinding, ImportBinding, LinkMonitor, LinkPlan, LinkState, LinkStatus, RemoteLink,
};
pub use endpoint::ServeEndpoint;
pub use frame::{Frame, FrameBody, PROTOCOL_VERSION};
pub use transport::{
    DefaultTransportFactory, Listener, MemoryNetwork, Transport, TransportFactory,
};
