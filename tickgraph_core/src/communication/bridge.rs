//! Host side of a remote link
//!
//! A [`RemoteLink`] keeps the host's proxy ports for one remote sub-model in
//! step with the device that actually runs it. It is pumped from the root
//! tick loop: [`RemoteLink::receive`] before the root tick applies the latest
//! device outputs, [`RemoteLink::send`] after it ships the host outputs the
//! device consumes.
//!
//! ```text
//! Disconnected -> Connecting -> Synced <-> Degraded -> Disconnected
//! ```
//!
//! All transport waits happen either at load (bounded by the handshake
//! timeout) or on a background reconnect thread. The scheduler thread only
//! ever polls.

use crate::communication::backoff::Backoff;
use crate::communication::frame::{Frame, FrameBody, PROTOCOL_VERSION};
use crate::communication::transport::{Transport, TransportFactory};
use crate::error::{TickError, TickResult};
use crate::memory::PortBlock;
use crate::model::TransportAddress;
use crate::scheduling::config::{BridgeConfig, StalenessPolicy};
use crate::scheduling::stop::StopFlag;
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const RECONNECT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Synced,
    Degraded,
}

impl LinkState {
    fn into_u8(self) -> u8 {
        match self {
            LinkState::Disconnected => 0,
            LinkState::Connecting => 1,
            LinkState::Synced => 2,
            LinkState::Degraded => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connecting,
            2 => LinkState::Synced,
            3 => LinkState::Degraded,
            _ => LinkState::Disconnected,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Synced => "Synced",
            LinkState::Degraded => "Degraded",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub tag: String,
    pub address: String,
    pub state: LinkState,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames lost in transit (sequence gaps) or refused by a full queue
    pub frames_dropped: u64,
    pub out_of_order: u64,
    pub reconnects: u64,
}

/// Lock-free link counters, readable from any thread while the engine runs
#[derive(Debug)]
#[repr(align(64))]
pub struct LinkMonitor {
    tag: String,
    address: String,
    state: AtomicU8,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    out_of_order: AtomicU64,
    reconnects: AtomicU64,
}

impl LinkMonitor {
    pub(crate) fn new(tag: &str, address: &str) -> Self {
        Self {
            tag: tag.to_string(),
            address: address.to_string(),
            state: AtomicU8::new(LinkState::Disconnected.into_u8()),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> LinkStatus {
        LinkStatus {
            tag: self.tag.clone(),
            address: self.address.clone(),
            state: self.state(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.store(state.into_u8(), Ordering::Release);
    }

    pub(crate) fn on_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn on_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-direction sequence check. Sequence numbers start at 1 after every
/// handshake.
#[derive(Debug, Default)]
pub(crate) struct SeqTracker {
    last: u64,
}

impl SeqTracker {
    /// `Some(gap)` for a fresh frame, `None` for a stale or duplicate one
    pub(crate) fn observe(&mut self, seq: u64) -> Option<u64> {
        if seq <= self.last {
            return None;
        }
        let gap = seq - self.last - 1;
        self.last = seq;
        Some(gap)
    }

    pub(crate) fn reset(&mut self) {
        self.last = 0;
    }
}

/// Host output feeding one remote input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub remote_path: String,
    pub source: usize,
}

/// Remote output feeding one or more host inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBinding {
    pub remote_path: String,
    pub destinations: Vec<usize>,
}

/// Everything load resolved for one bridged remote model
#[derive(Debug, Clone)]
pub struct LinkPlan {
    pub tag: String,
    pub address: TransportAddress,
    pub fingerprint: String,
    pub imports: Vec<ImportBinding>,
    pub exports: Vec<ExportBinding>,
}

impl LinkPlan {
    fn hello(&self) -> FrameBody {
        FrameBody::Hello {
            protocol: PROTOCOL_VERSION,
            fingerprint: self.fingerprint.clone(),
            imports: self.imports.iter().map(|i| i.remote_path.clone()).collect(),
            exports: self.exports.iter().map(|e| e.remote_path.clone()).collect(),
        }
    }
}

/// Open a transport and complete the Hello/Welcome exchange
fn open_session(
    factory: &dyn TransportFactory,
    plan: &LinkPlan,
    hello: &FrameBody,
    config: &BridgeConfig,
) -> TickResult<Box<dyn Transport>> {
    let mut transport = factory.connect(&plan.address, config)?;
    match handshake(transport.as_mut(), plan, hello, config.handshake_timeout()) {
        Ok(()) => Ok(transport),
        Err(e) => {
            transport.close();
            Err(e)
        }
    }
}

fn handshake(
    transport: &mut dyn Transport,
    plan: &LinkPlan,
    hello: &FrameBody,
    timeout: Duration,
) -> TickResult<()> {
    transport.send(&Frame::new(0, hello.clone()))?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TickError::Timeout(format!(
                "no handshake reply from '{}' on {}",
                plan.tag, plan.address
            )));
        }
        let Some(frame) = transport.recv_timeout(remaining)? else {
            continue;
        };
        match frame.body {
            FrameBody::Welcome { fingerprint } if fingerprint == plan.fingerprint => return Ok(()),
            FrameBody::Welcome { fingerprint } => {
                return Err(TickError::Handshake {
                    tag: plan.tag.clone(),
                    message: format!(
                        "device runs model {} but {} was expected",
                        fingerprint, plan.fingerprint
                    ),
                })
            }
            FrameBody::Reject { reason } => {
                return Err(TickError::Handshake {
                    tag: plan.tag.clone(),
                    message: reason,
                })
            }
            // Leftovers from a previous session
            other => debug!("[Bridge:{}] ignoring {} during handshake", plan.tag, other.kind()),
        }
    }
}

struct ReconnectJob {
    cancel: StopFlag,
    result: Receiver<TickResult<Box<dyn Transport>>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconnectJob {
    fn spawn(
        plan: LinkPlan,
        config: BridgeConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> TickResult<Self> {
        let cancel = StopFlag::new();
        let (tx, rx) = bounded(1);
        let thread_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("tg-link-{}", plan.tag))
            .spawn(move || {
                let hello = plan.hello();
                let mut backoff = Backoff::new(config.reconnect.clone());
                loop {
                    let Some(delay) = backoff.next_delay() else {
                        let _ = tx.send(Err(TickError::link(
                            &plan.tag,
                            format!("gave up after {} reconnect attempts", backoff.attempts()),
                        )));
                        return;
                    };
                    if !thread_cancel.sleep_until(Instant::now() + delay, RECONNECT_POLL) {
                        return;
                    }
                    match open_session(factory.as_ref(), &plan, &hello, &config) {
                        Ok(transport) => {
                            let _ = tx.send(Ok(transport));
                            return;
                        }
                        Err(e) => debug!(
                            "[Bridge:{}] reconnect attempt {} failed: {}",
                            plan.tag,
                            backoff.attempts(),
                            e
                        ),
                    }
                }
            })?;
        Ok(Self {
            cancel,
            result: rx,
            handle: Some(handle),
        })
    }

    fn cancel(&mut self) {
        self.cancel.set();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct RemoteLink {
    plan: LinkPlan,
    block: Arc<PortBlock>,
    config: BridgeConfig,
    factory: Arc<dyn TransportFactory>,
    monitor: Arc<LinkMonitor>,
    state: LinkState,
    transport: Option<Box<dyn Transport>>,
    reconnect: Option<ReconnectJob>,
    send_seq: u64,
    recv: SeqTracker,
    last_rx: Instant,
    last_tx: Instant,
    stale_since: Option<Instant>,
    stale_reset_done: bool,
}

impl RemoteLink {
    /// Connect and handshake, retrying up to `initial_connect_attempts`.
    /// A refused handshake is not retried.
    pub(crate) fn open(
        plan: LinkPlan,
        block: Arc<PortBlock>,
        config: BridgeConfig,
        factory: Arc<dyn TransportFactory>,
        stop: &StopFlag,
    ) -> TickResult<Self> {
        let monitor = Arc::new(LinkMonitor::new(&plan.tag, &plan.address.to_string()));
        monitor.set_state(LinkState::Connecting);
        info!("[Bridge:{}] connecting to {}", plan.tag, plan.address);

        let hello = plan.hello();
        let mut backoff = Backoff::new(config.reconnect.clone());
        let attempts = config.initial_connect_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if stop.is_set() {
                break;
            }
            match open_session(factory.as_ref(), &plan, &hello, &config) {
                Ok(transport) => {
                    info!(
                        "[Bridge:{}] synced with {} ({} imports, {} exports)",
                        plan.tag,
                        transport.describe(),
                        plan.imports.len(),
                        plan.exports.len()
                    );
                    monitor.set_state(LinkState::Synced);
                    let now = Instant::now();
                    return Ok(Self {
                        plan,
                        block,
                        config,
                        factory,
                        monitor,
                        state: LinkState::Synced,
                        transport: Some(transport),
                        reconnect: None,
                        send_seq: 0,
                        recv: SeqTracker::default(),
                        last_rx: now,
                        last_tx: now,
                        stale_since: None,
                        stale_reset_done: false,
                    });
                }
                Err(e @ TickError::Handshake { .. }) => {
                    monitor.set_state(LinkState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "[Bridge:{}] connect attempt {}/{} failed: {}",
                        plan.tag, attempt, attempts, e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                let delay = backoff
                    .next_delay()
                    .unwrap_or(Duration::from_millis(config.reconnect.fast_delay_ms));
                if !stop.sleep_until(Instant::now() + delay, RECONNECT_POLL) {
                    break;
                }
            }
        }

        monitor.set_state(LinkState::Disconnected);
        Err(TickError::link(
            &plan.tag,
            match last_error {
                _ if stop.is_set() => format!("connect to {} cancelled", plan.address),
                Some(e) => format!("unreachable at {}: {}", plan.address, e),
                None => format!("connect to {} cancelled", plan.address),
            },
        ))
    }

    pub fn tag(&self) -> &str {
        &self.plan.tag
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn status(&self) -> LinkStatus {
        self.monitor.snapshot()
    }

    pub fn monitor(&self) -> Arc<LinkMonitor> {
        Arc::clone(&self.monitor)
    }

    fn transition(&mut self, next: LinkState, reason: &str) {
        if self.state == next {
            return;
        }
        match next {
            LinkState::Synced => info!("[Bridge:{}] {} -> {} ({})", self.plan.tag, self.state, next, reason),
            LinkState::Disconnected => {
                error!("[Bridge:{}] {} -> {} ({})", self.plan.tag, self.state, next, reason)
            }
            _ => warn!("[Bridge:{}] {} -> {} ({})", self.plan.tag, self.state, next, reason),
        }
        if next == LinkState::Synced {
            self.stale_since = None;
            self.stale_reset_done = false;
        } else if self.stale_since.is_none() {
            self.stale_since = Some(Instant::now());
        }
        self.state = next;
        self.monitor.set_state(next);
    }

    /// Apply every frame that arrived since the last call, then update the
    /// link state. Called before the root tick.
    pub(crate) fn receive(&mut self, now: Instant) {
        self.poll_reconnect(now);

        let mut lost = None;
        if let Some(transport) = self.transport.as_mut() {
            loop {
                match transport.try_recv() {
                    Ok(Some(frame)) => {
                        if let Some(reason) = Self::handle_frame(
                            &self.plan,
                            &self.block,
                            &self.monitor,
                            &mut self.recv,
                            frame,
                        ) {
                            lost = Some(reason);
                            break;
                        }
                        self.last_rx = now;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        lost = Some(e.to_string());
                        break;
                    }
                }
            }
        }
        if let Some(reason) = lost {
            self.lose_transport(&reason);
        } else if self.transport.is_some() {
            self.check_liveness(now);
        }
        self.apply_staleness(now);
    }

    /// Returns a reason when the frame ends the session
    fn handle_frame(
        plan: &LinkPlan,
        block: &PortBlock,
        monitor: &LinkMonitor,
        recv: &mut SeqTracker,
        frame: Frame,
    ) -> Option<String> {
        let Some(gap) = recv.observe(frame.seq) else {
            monitor.on_out_of_order();
            debug!("[Bridge:{}] dropping out-of-order frame {}", plan.tag, frame.seq);
            return None;
        };
        if gap > 0 {
            monitor.on_dropped(gap);
        }
        monitor.on_received();

        match frame.body {
            FrameBody::Values { entries } => {
                for (index, value) in entries {
                    let Some(export) = plan.exports.get(index as usize) else {
                        debug!("[Bridge:{}] unknown export index {}", plan.tag, index);
                        continue;
                    };
                    for &cell in &export.destinations {
                        if !block.set(cell, &value) {
                            debug!(
                                "[Bridge:{}] {} value does not fit {}",
                                plan.tag,
                                value.port_type(),
                                block.cell(cell).path()
                            );
                        }
                    }
                }
                None
            }
            FrameBody::Heartbeat => None,
            FrameBody::Goodbye => Some("device said goodbye".to_string()),
            other => {
                debug!("[Bridge:{}] ignoring unexpected {}", plan.tag, other.kind());
                None
            }
        }
    }

    fn check_liveness(&mut self, now: Instant) {
        let silence = now.saturating_duration_since(self.last_rx);
        let timeout = self.config.link_timeout();
        match self.state {
            LinkState::Synced if silence > timeout => {
                self.transition(LinkState::Degraded, &format!("silent for {:?}", silence));
            }
            LinkState::Degraded if silence <= timeout => {
                self.transition(LinkState::Synced, "frames resumed");
            }
            // A transport that stays open but silent is presumed dead
            LinkState::Degraded if silence > timeout * 2 => {
                self.lose_transport(&format!("silent for {:?}", silence));
            }
            _ => {}
        }
    }

    fn lose_transport(&mut self, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if self.state != LinkState::Disconnected {
            self.transition(LinkState::Degraded, reason);
        }
        self.start_reconnect();
    }

    fn start_reconnect(&mut self) {
        if self.reconnect.is_some() || self.state == LinkState::Disconnected {
            return;
        }
        match ReconnectJob::spawn(
            self.plan.clone(),
            self.config.clone(),
            Arc::clone(&self.factory),
        ) {
            Ok(job) => {
                info!("[Bridge:{}] reconnecting to {}", self.plan.tag, self.plan.address);
                self.reconnect = Some(job);
            }
            Err(e) => {
                self.transition(LinkState::Disconnected, &format!("cannot start reconnect: {}", e));
            }
        }
    }

    fn poll_reconnect(&mut self, now: Instant) {
        let Some(job) = self.reconnect.as_mut() else {
            return;
        };
        let outcome = match job.result.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(TickError::link(
                &self.plan.tag,
                "reconnect thread exited",
            )),
        };
        if let Some(mut job) = self.reconnect.take() {
            job.cancel();
        }

        match outcome {
            Ok(transport) => {
                self.transport = Some(transport);
                self.send_seq = 0;
                self.recv.reset();
                self.last_rx = now;
                self.last_tx = now;
                self.monitor.on_reconnect();
                self.transition(LinkState::Synced, "reconnected");
            }
            Err(e) => self.transition(LinkState::Disconnected, &e.to_string()),
        }
    }

    fn apply_staleness(&mut self, now: Instant) {
        let StalenessPolicy::ResetAfter { ms } = self.config.staleness else {
            return;
        };
        let Some(since) = self.stale_since else {
            return;
        };
        if self.stale_reset_done || now.saturating_duration_since(since) < Duration::from_millis(ms) {
            return;
        }
        for export in &self.plan.exports {
            for &cell in &export.destinations {
                self.block.reset(cell);
            }
        }
        self.stale_reset_done = true;
        warn!(
            "[Bridge:{}] inputs stale for {}ms, reset to defaults",
            self.plan.tag, ms
        );
    }

    /// Ship current host values (or a heartbeat when there are none). Called
    /// after the root tick.
    pub(crate) fn send(&mut self, now: Instant) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let body = if !self.plan.imports.is_empty() {
            FrameBody::Values {
                entries: self
                    .plan
                    .imports
                    .iter()
                    .enumerate()
                    .map(|(i, import)| (i as u32, self.block.get(import.source)))
                    .collect(),
            }
        } else if now.saturating_duration_since(self.last_tx) >= self.config.heartbeat_interval() {
            FrameBody::Heartbeat
        } else {
            return;
        };

        self.send_seq += 1;
        let frame = Frame::new(self.send_seq, body);
        match transport.send(&frame) {
            Ok(()) => {
                self.last_tx = now;
                self.monitor.on_sent();
            }
            Err(e) if transport.is_open() => {
                // Queue full; the device sees the gap
                self.monitor.on_dropped(1);
                debug!("[Bridge:{}] frame {} dropped: {}", self.plan.tag, frame.seq, e);
            }
            Err(e) => {
                let reason = e.to_string();
                self.lose_transport(&reason);
            }
        }
    }

    /// Say goodbye and release the transport. Idempotent.
    pub(crate) fn close(&mut self) {
        if let Some(mut job) = self.reconnect.take() {
            job.cancel();
        }
        if let Some(mut transport) = self.transport.take() {
            self.send_seq += 1;
            let _ = transport.send(&Frame::new(self.send_seq, FrameBody::Goodbye));
            transport.close();
        }
        if self.state != LinkState::Disconnected {
            info!("[Bridge:{}] closed", self.plan.tag);
            self.state = LinkState::Disconnected;
            self.monitor.set_state(LinkState::Disconnected);
        }
    }
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RemoteLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLink")
            .field("tag", &self.plan.tag)
            .field("address", &self.plan.address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::transport::{DefaultTransportFactory, Listener, MemoryNetwork};
    use crate::core::{PortSchema, PortType, PortValue};
    use crate::memory::PortBlockBuilder;

    #[test]
    fn test_seq_tracker_counts_gaps_and_stale() {
        let mut seq = SeqTracker::default();
        assert_eq!(seq.observe(1), Some(0));
        assert_eq!(seq.observe(4), Some(2));
        assert_eq!(seq.observe(3), None);
        assert_eq!(seq.observe(4), None);
        seq.reset();
        assert_eq!(seq.observe(1), Some(0));
    }

    fn fixture() -> (Arc<PortBlock>, LinkPlan) {
        let mut builder = PortBlockBuilder::new();
        let span = builder.push_workload(
            "",
            "proxy",
            &PortSchema::new()
                .input("speed", PortType::F64)
                .output("command", PortType::F64),
        );
        let block = Arc::new(builder.build());
        let plan = LinkPlan {
            tag: "device".into(),
            address: TransportAddress::parse("memory:bridge-test").unwrap(),
            fingerprint: "00ff00ff00ff00ff".into(),
            imports: vec![ImportBinding {
                remote_path: "motor.inputs.command".into(),
                source: span.outputs.start,
            }],
            exports: vec![ExportBinding {
                remote_path: "motor.outputs.speed".into(),
                destinations: vec![span.inputs.start],
            }],
        };
        (block, plan)
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            handshake_timeout_ms: 200,
            initial_connect_attempts: 1,
            ..BridgeConfig::default()
        }
    }

    /// Answers exactly one Hello on the given listener from a helper thread
    fn answer_hello(mut listener: Box<dyn Listener>, reply: FrameBody) -> JoinHandle<Box<dyn Transport>> {
        std::thread::spawn(move || loop {
            if let Some(mut peer) = listener.accept().unwrap() {
                let hello = peer.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
                assert_eq!(hello.body.kind(), "Hello");
                peer.send(&Frame::new(0, reply)).unwrap();
                return peer;
            }
            std::thread::sleep(Duration::from_millis(1));
        })
    }

    #[test]
    fn test_values_flow_and_rejected_handshake_is_fatal() {
        let network = MemoryNetwork::new();
        let factory: Arc<dyn TransportFactory> =
            Arc::new(DefaultTransportFactory::with_memory_network(network.clone()));
        let (block, plan) = fixture();

        let listener = factory.listen(&plan.address, &fast_config()).unwrap();
        let device = answer_hello(
            listener,
            FrameBody::Welcome {
                fingerprint: plan.fingerprint.clone(),
            },
        );
        let mut link = RemoteLink::open(
            plan.clone(),
            Arc::clone(&block),
            fast_config(),
            Arc::clone(&factory),
            &StopFlag::new(),
        )
        .unwrap();
        let mut peer = device.join().unwrap();
        assert_eq!(link.state(), LinkState::Synced);

        block.set(1, &PortValue::F64(0.5));
        link.send(Instant::now());
        let sent = peer.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(sent.seq, 1);
        assert_eq!(
            sent.body,
            FrameBody::Values {
                entries: vec![(0, PortValue::F64(0.5))]
            }
        );

        peer.send(&Frame::new(1, FrameBody::Values { entries: vec![(0, PortValue::F64(2.0))] }))
            .unwrap();
        peer.send(&Frame::new(1, FrameBody::Heartbeat)).unwrap();
        link.receive(Instant::now());
        assert_eq!(block.get(0), PortValue::F64(2.0));
        let status = link.status();
        assert_eq!(status.frames_received, 1);
        assert_eq!(status.out_of_order, 1);

        let listener = factory.listen(&plan.address, &fast_config()).unwrap();
        let _device = answer_hello(
            listener,
            FrameBody::Reject {
                reason: "unknown model".into(),
            },
        );
        let err = RemoteLink::open(plan, block, fast_config(), factory, &StopFlag::new()).unwrap_err();
        assert!(matches!(err, TickError::Handshake { .. }));
    }

    #[test]
    fn test_unreachable_device_fails_open() {
        let factory: Arc<dyn TransportFactory> = Arc::new(DefaultTransportFactory::new());
        let (block, plan) = fixture();
        let err = RemoteLink::open(plan, block, fast_config(), factory, &StopFlag::new()).unwrap_err();
        assert!(matches!(err, TickError::Link { .. }));
    }
}
