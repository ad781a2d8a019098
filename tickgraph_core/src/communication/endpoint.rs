//! Device side of a remote link
//!
//! A [`ServeEndpoint`] listens on a transport and answers host handshakes
//! against the fingerprint of the model the device engine loaded. Once a
//! host is accepted, its `imports` are written into the device's input cells
//! before every root tick and the requested `exports` are sent after it.
//!
//! A newer handshake replaces the current session, so a host that lost its
//! link and reconnects simply takes over.

use crate::communication::bridge::{LinkMonitor, LinkState, LinkStatus, SeqTracker};
use crate::communication::frame::{Frame, FrameBody, PROTOCOL_VERSION};
use crate::communication::transport::{Listener, Transport};
use crate::core::PortDirection;
use crate::memory::PortBlock;
use crate::model::PortPath;
use crate::scheduling::config::{BridgeConfig, StalenessPolicy};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Pending {
    transport: Box<dyn Transport>,
    since: Instant,
}

struct Session {
    transport: Box<dyn Transport>,
    peer: String,
    imports: Vec<usize>,
    exports: Vec<usize>,
    send_seq: u64,
    recv: SeqTracker,
    last_rx: Instant,
    last_tx: Instant,
}

pub struct ServeEndpoint {
    listener: Box<dyn Listener>,
    fingerprint: String,
    block: Arc<PortBlock>,
    /// Input cells already fed by a connection inside the device model
    driven: Vec<bool>,
    config: BridgeConfig,
    monitor: Arc<LinkMonitor>,
    pending: Vec<Pending>,
    session: Option<Session>,
    sessions_opened: u64,
    stale_imports: Vec<usize>,
    stale_since: Option<Instant>,
}

impl ServeEndpoint {
    pub(crate) fn new(
        listener: Box<dyn Listener>,
        fingerprint: String,
        block: Arc<PortBlock>,
        driven: Vec<bool>,
        config: BridgeConfig,
    ) -> Self {
        let label = listener.describe();
        info!("[Serve] listening on {} for model {}", label, fingerprint);
        Self {
            listener,
            fingerprint,
            block,
            driven,
            config,
            monitor: Arc::new(LinkMonitor::new("serve", &label)),
            pending: Vec::new(),
            session: None,
            sessions_opened: 0,
            stale_imports: Vec::new(),
            stale_since: None,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.monitor.snapshot()
    }

    pub fn monitor(&self) -> Arc<LinkMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Accept peers, finish handshakes and apply received host values.
    /// Called before the root tick.
    pub(crate) fn receive(&mut self, now: Instant) {
        self.accept_new(now);
        self.advance_handshakes(now);

        let mut ended = None;
        if let Some(session) = self.session.as_mut() {
            loop {
                match session.transport.try_recv() {
                    Ok(Some(frame)) => {
                        let Some(gap) = session.recv.observe(frame.seq) else {
                            self.monitor.on_out_of_order();
                            continue;
                        };
                        if gap > 0 {
                            self.monitor.on_dropped(gap);
                        }
                        self.monitor.on_received();
                        session.last_rx = now;
                        match frame.body {
                            FrameBody::Values { entries } => {
                                for (index, value) in entries {
                                    if let Some(&cell) = session.imports.get(index as usize) {
                                        self.block.set(cell, &value);
                                    }
                                }
                            }
                            FrameBody::Goodbye => {
                                ended = Some("host said goodbye".to_string());
                                break;
                            }
                            FrameBody::Heartbeat => {}
                            other => debug!("[Serve] ignoring unexpected {}", other.kind()),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        ended = Some(e.to_string());
                        break;
                    }
                }
            }

            if ended.is_none() {
                let silence = now.saturating_duration_since(session.last_rx);
                let timeout = self.config.link_timeout();
                match self.monitor.state() {
                    LinkState::Synced if silence > timeout => {
                        warn!("[Serve] host {} silent for {:?}", session.peer, silence);
                        self.monitor.set_state(LinkState::Degraded);
                        self.stale_since.get_or_insert(now);
                    }
                    LinkState::Degraded if silence <= timeout => {
                        info!("[Serve] host {} resumed", session.peer);
                        self.monitor.set_state(LinkState::Synced);
                        self.stale_since = None;
                    }
                    // Same limit as the host side: open but silent is dead
                    LinkState::Degraded if silence > timeout * 2 => {
                        ended = Some(format!("host silent for {:?}", silence));
                    }
                    _ => {}
                }
            }
        }

        if let Some(reason) = ended {
            self.end_session(&reason, now);
        }
        self.apply_staleness(now);
    }

    fn accept_new(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok(Some(transport)) => {
                    debug!("[Serve] connection from {}", transport.describe());
                    self.pending.push(Pending {
                        transport,
                        since: now,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("[Serve] accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn advance_handshakes(&mut self, now: Instant) {
        let timeout = self.config.handshake_timeout();
        let mut index = 0;
        while index < self.pending.len() {
            let pending = &mut self.pending[index];
            let hello = match pending.transport.try_recv() {
                Ok(Some(Frame {
                    body:
                        FrameBody::Hello {
                            protocol,
                            fingerprint,
                            imports,
                            exports,
                        },
                    ..
                })) => Some((protocol, fingerprint, imports, exports)),
                Ok(Some(other)) => {
                    debug!("[Serve] expected Hello, got {}", other.body.kind());
                    None
                }
                Ok(None) if now.saturating_duration_since(pending.since) <= timeout => {
                    index += 1;
                    continue;
                }
                Ok(None) | Err(_) => {
                    let mut dropped = self.pending.swap_remove(index);
                    dropped.transport.close();
                    continue;
                }
            };

            let Some((protocol, fingerprint, imports, exports)) = hello else {
                index += 1;
                continue;
            };
            let mut pending = self.pending.swap_remove(index);
            match self.resolve_hello(protocol, &fingerprint, &imports, &exports) {
                Ok((import_cells, export_cells)) => {
                    let reply = Frame::new(
                        0,
                        FrameBody::Welcome {
                            fingerprint: self.fingerprint.clone(),
                        },
                    );
                    if let Err(e) = pending.transport.send(&reply) {
                        warn!("[Serve] failed to welcome {}: {}", pending.transport.describe(), e);
                        continue;
                    }
                    self.begin_session(pending.transport, import_cells, export_cells, now);
                }
                Err(reason) => {
                    warn!(
                        "[Serve] rejecting {}: {}",
                        pending.transport.describe(),
                        reason
                    );
                    let _ = pending
                        .transport
                        .send(&Frame::new(0, FrameBody::Reject { reason }));
                    pending.transport.close();
                }
            }
        }
    }

    fn resolve_hello(
        &self,
        protocol: u16,
        fingerprint: &str,
        imports: &[String],
        exports: &[String],
    ) -> Result<(Vec<usize>, Vec<usize>), String> {
        if protocol != PROTOCOL_VERSION {
            return Err(format!(
                "protocol {} not supported (expected {})",
                protocol, PROTOCOL_VERSION
            ));
        }
        if fingerprint != self.fingerprint {
            return Err(format!(
                "model fingerprint {} does not match {}",
                fingerprint, self.fingerprint
            ));
        }

        let resolve = |raw: &String, direction: PortDirection| -> Result<usize, String> {
            let path = PortPath::parse(raw).map_err(|e| e.to_string())?;
            if path.direction != direction {
                return Err(format!("'{}' is not an {} port", raw, direction));
            }
            self.block
                .lookup(raw)
                .ok_or_else(|| format!("no port '{}' in this model", raw))
        };

        let mut import_cells = Vec::with_capacity(imports.len());
        for raw in imports {
            let cell = resolve(raw, PortDirection::Input)?;
            if self.driven.get(cell).copied().unwrap_or(false) {
                return Err(format!("input '{}' already has a writer", raw));
            }
            import_cells.push(cell);
        }
        let export_cells = exports
            .iter()
            .map(|raw| resolve(raw, PortDirection::Output))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((import_cells, export_cells))
    }

    fn begin_session(
        &mut self,
        transport: Box<dyn Transport>,
        imports: Vec<usize>,
        exports: Vec<usize>,
        now: Instant,
    ) {
        if let Some(mut old) = self.session.take() {
            info!("[Serve] {} replaces session with {}", transport.describe(), old.peer);
            old.transport.close();
        }
        if self.sessions_opened > 0 {
            self.monitor.on_reconnect();
        }
        self.sessions_opened += 1;

        let peer = transport.describe();
        info!(
            "[Serve] synced with {} ({} imports, {} exports)",
            peer,
            imports.len(),
            exports.len()
        );
        self.stale_imports = imports.clone();
        self.stale_since = None;
        self.monitor.set_state(LinkState::Synced);
        self.session = Some(Session {
            transport,
            peer,
            imports,
            exports,
            send_seq: 0,
            recv: SeqTracker::default(),
            last_rx: now,
            last_tx: now,
        });
    }

    fn end_session(&mut self, reason: &str, now: Instant) {
        if let Some(mut session) = self.session.take() {
            warn!("[Serve] session with {} ended: {}", session.peer, reason);
            session.transport.close();
        }
        self.stale_since.get_or_insert(now);
        self.monitor.set_state(LinkState::Disconnected);
    }

    fn apply_staleness(&mut self, now: Instant) {
        let StalenessPolicy::ResetAfter { ms } = self.config.staleness else {
            return;
        };
        let Some(since) = self.stale_since else {
            return;
        };
        if self.stale_imports.is_empty() || now.saturating_duration_since(since) < Duration::from_millis(ms) {
            return;
        }
        for &cell in &self.stale_imports {
            self.block.reset(cell);
        }
        self.stale_imports.clear();
        warn!("[Serve] host values stale for {}ms, reset to defaults", ms);
    }

    /// Send requested outputs, or a heartbeat when there are none. Called
    /// after the root tick.
    pub(crate) fn send(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let body = if !session.exports.is_empty() {
            FrameBody::Values {
                entries: session
                    .exports
                    .iter()
                    .enumerate()
                    .map(|(i, &cell)| (i as u32, self.block.get(cell)))
                    .collect(),
            }
        } else if now.saturating_duration_since(session.last_tx) >= self.config.heartbeat_interval() {
            FrameBody::Heartbeat
        } else {
            return;
        };

        session.send_seq += 1;
        match session.transport.send(&Frame::new(session.send_seq, body)) {
            Ok(()) => {
                session.last_tx = now;
                self.monitor.on_sent();
            }
            Err(_) if session.transport.is_open() => self.monitor.on_dropped(1),
            Err(e) => {
                let reason = e.to_string();
                self.end_session(&reason, now);
            }
        }
    }

    pub(crate) fn close(&mut self) {
        for mut pending in self.pending.drain(..) {
            pending.transport.close();
        }
        if let Some(mut session) = self.session.take() {
            session.send_seq += 1;
            let _ = session
                .transport
                .send(&Frame::new(session.send_seq, FrameBody::Goodbye));
            session.transport.close();
            info!("[Serve] closed session with {}", session.peer);
        }
        self.monitor.set_state(LinkState::Disconnected);
    }
}

impl Drop for ServeEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ServeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeEndpoint")
            .field("listener", &self.listener.describe())
            .field("fingerprint", &self.fingerprint)
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::transport::MemoryNetwork;
    use crate::core::{PortSchema, PortType, PortValue};
    use crate::memory::PortBlockBuilder;

    fn endpoint(network: &MemoryNetwork) -> ServeEndpoint {
        let mut builder = PortBlockBuilder::new();
        builder.push_workload(
            "",
            "motor",
            &PortSchema::new()
                .input("command", PortType::F64)
                .output("speed", PortType::F64),
        );
        let block = Arc::new(builder.build());
        let listener = network.listen("device").unwrap();
        ServeEndpoint::new(
            Box::new(listener),
            "abcdabcdabcdabcd".into(),
            block,
            vec![false, false],
            BridgeConfig::default(),
        )
    }

    fn hello(fingerprint: &str, imports: &[&str], exports: &[&str]) -> Frame {
        Frame::new(
            0,
            FrameBody::Hello {
                protocol: PROTOCOL_VERSION,
                fingerprint: fingerprint.into(),
                imports: imports.iter().map(|s| s.to_string()).collect(),
                exports: exports.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    #[test]
    fn test_welcome_then_exchange_values() {
        let network = MemoryNetwork::new();
        let mut device = endpoint(&network);
        let mut host = network.connect("device").unwrap();

        host.send(&hello(
            "abcdabcdabcdabcd",
            &["motor.inputs.command"],
            &["motor.outputs.speed"],
        ))
        .unwrap();
        device.receive(Instant::now());
        assert!(device.is_connected());
        let reply = host.try_recv().unwrap().unwrap();
        assert!(matches!(reply.body, FrameBody::Welcome { .. }));

        host.send(&Frame::new(
            1,
            FrameBody::Values {
                entries: vec![(0, PortValue::F64(0.25))],
            },
        ))
        .unwrap();
        device.receive(Instant::now());
        assert_eq!(device.block.get(0), PortValue::F64(0.25));

        device.block.set(1, &PortValue::F64(9.0));
        device.send(Instant::now());
        let values = host.try_recv().unwrap().unwrap();
        assert_eq!(values.seq, 1);
        assert_eq!(
            values.body,
            FrameBody::Values {
                entries: vec![(0, PortValue::F64(9.0))]
            }
        );
        assert_eq!(device.status().state, LinkState::Synced);
    }

    #[test]
    fn test_silent_host_degrades_then_drops_session() {
        let network = MemoryNetwork::new();
        let mut device = endpoint(&network);
        let mut host = network.connect("device").unwrap();
        let timeout = BridgeConfig::default().link_timeout();

        let start = Instant::now();
        host.send(&hello("abcdabcdabcdabcd", &["motor.inputs.command"], &[]))
            .unwrap();
        device.receive(start);
        assert!(device.is_connected());

        device.receive(start + timeout + Duration::from_millis(10));
        assert_eq!(device.status().state, LinkState::Degraded);
        assert!(device.is_connected());

        device.receive(start + timeout * 2 + Duration::from_millis(10));
        assert_eq!(device.status().state, LinkState::Disconnected);
        assert!(!device.is_connected());
    }

    #[test]
    fn test_mismatched_fingerprint_and_wrong_direction_are_rejected() {
        let network = MemoryNetwork::new();
        let mut device = endpoint(&network);

        let mut host = network.connect("device").unwrap();
        host.send(&hello("ffffffffffffffff", &[], &[])).unwrap();
        device.receive(Instant::now());
        let reply = host.try_recv().unwrap().unwrap();
        assert!(matches!(reply.body, FrameBody::Reject { .. }));

        let mut host = network.connect("device").unwrap();
        host.send(&hello("abcdabcdabcdabcd", &["motor.outputs.speed"], &[]))
            .unwrap();
        device.receive(Instant::now());
        let reply = host.try_recv().unwrap().unwrap();
        match reply.body {
            FrameBody::Reject { reason } => assert!(reason.contains("not an input")),
            other => panic!("expected Reject, got {:?}", other),
        }
        assert!(!device.is_connected());
    }
}
