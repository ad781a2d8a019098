//! In-process network for `memory:<name>` addresses
//!
//! Lets a host engine and a device engine run in one process over a real
//! bridge, and lets tests cut a link mid-run:
//!
//! ```rust,ignore
//! let network = MemoryNetwork::new();
//! let factory = Arc::new(DefaultTransportFactory::with_memory_network(network.clone()));
//! // ... device serves on memory:spine, host connects to memory:spine ...
//! network.sever("spine");   // both ends see the transport close
//! network.restore("spine"); // new connections succeed again
//! ```

use crate::communication::transport::{ChannelTransport, Listener, Transport};
use crate::error::{TickError, TickResult};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const QUEUE_SIZE: usize = 256;

#[derive(Default)]
struct NetworkState {
    listeners: HashMap<String, Sender<ChannelTransport>>,
    severed: HashSet<String>,
    live: HashMap<String, Vec<Arc<AtomicBool>>>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryNetwork")
            .field("listeners", &state.listeners.keys().collect::<Vec<_>>())
            .field("severed", &state.severed)
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, name: &str) -> TickResult<MemoryListener> {
        // A newer listener replaces an older one on the same name
        let mut state = self.state.lock();
        let (tx, rx) = bounded(QUEUE_SIZE);
        state.listeners.insert(name.to_string(), tx);
        Ok(MemoryListener {
            name: name.to_string(),
            accepted: rx,
        })
    }

    pub fn connect(&self, name: &str) -> TickResult<ChannelTransport> {
        let mut state = self.state.lock();
        if state.severed.contains(name) {
            return Err(TickError::transport(format!("memory:{} is unreachable", name)));
        }
        let listener = state
            .listeners
            .get(name)
            .cloned()
            .ok_or_else(|| TickError::transport(format!("nothing listening on memory:{}", name)))?;

        let open = Arc::new(AtomicBool::new(true));
        let (to_server, server_rx) = bounded(QUEUE_SIZE);
        let (to_client, client_rx) = bounded(QUEUE_SIZE);
        let label = format!("memory:{}", name);
        let server = ChannelTransport::new(label.clone(), to_client, server_rx, Arc::clone(&open));
        let client = ChannelTransport::new(label, to_server, client_rx, Arc::clone(&open));

        listener
            .try_send(server)
            .map_err(|_| TickError::transport(format!("memory:{} is not accepting", name)))?;
        state.live.entry(name.to_string()).or_default().push(open);
        Ok(client)
    }

    /// Close every live connection on `name` and refuse new ones
    pub fn sever(&self, name: &str) {
        let mut state = self.state.lock();
        state.severed.insert(name.to_string());
        if let Some(flags) = state.live.remove(name) {
            for flag in flags {
                flag.store(false, Ordering::Release);
            }
        }
        log::debug!("[Memory] memory:{} severed", name);
    }

    pub fn restore(&self, name: &str) {
        self.state.lock().severed.remove(name);
        log::debug!("[Memory] memory:{} restored", name);
    }

    pub fn is_severed(&self, name: &str) -> bool {
        self.state.lock().severed.contains(name)
    }
}

pub struct MemoryListener {
    name: String,
    accepted: Receiver<ChannelTransport>,
}

impl Listener for MemoryListener {
    fn accept(&mut self) -> TickResult<Option<Box<dyn Transport>>> {
        loop {
            match self.accepted.try_recv() {
                // Skip connections severed before they were picked up
                Ok(transport) if !transport.is_open() => continue,
                Ok(transport) => return Ok(Some(Box::new(transport))),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(TickError::transport(format!(
                        "memory:{} listener closed",
                        self.name
                    )))
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::frame::{Frame, FrameBody};

    #[test]
    fn test_connect_and_exchange() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("spine").unwrap();
        let mut client = network.connect("spine").unwrap();
        let mut server = listener.accept().unwrap().unwrap();

        client.send(&Frame::new(1, FrameBody::Heartbeat)).unwrap();
        assert_eq!(server.try_recv().unwrap().unwrap().seq, 1);
        server.send(&Frame::new(1, FrameBody::Goodbye)).unwrap();
        assert_eq!(client.try_recv().unwrap().unwrap().body, FrameBody::Goodbye);
    }

    #[test]
    fn test_sever_closes_both_ends_until_restored() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("spine").unwrap();
        let mut client = network.connect("spine").unwrap();
        let mut server = listener.accept().unwrap().unwrap();

        network.sever("spine");
        assert!(!client.is_open());
        assert!(server.try_recv().is_err());
        assert!(client.send(&Frame::new(2, FrameBody::Heartbeat)).is_err());
        assert!(network.connect("spine").is_err());

        network.restore("spine");
        let _again = network.connect("spine").unwrap();
        assert!(listener.accept().unwrap().is_some());
    }

    #[test]
    fn test_connect_without_listener_fails() {
        let network = MemoryNetwork::new();
        assert!(network.connect("nobody").is_err());
    }
}
