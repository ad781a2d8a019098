/// Frame transport over in-process queues
///
/// Every concrete transport ends up here: its I/O tasks or threads own the
/// socket/port and exchange encoded payloads with a [`ChannelTransport`]
/// through lock-free queues, so the scheduler side never touches blocking I/O.
use crate::communication::frame::Frame;
use crate::communication::transport::Transport;
use crate::error::{TickError, TickResult};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    Full,
    Closed,
}

/// Non-blocking outbound queue
pub trait PayloadSink: Send {
    fn push(&self, payload: Vec<u8>) -> Result<(), SinkError>;
}

impl PayloadSink for Sender<Vec<u8>> {
    fn push(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        self.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Disconnected(_) => SinkError::Closed,
        })
    }
}

impl PayloadSink for tokio::sync::mpsc::Sender<Vec<u8>> {
    fn push(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        self.try_send(payload).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => SinkError::Full,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

pub struct ChannelTransport {
    label: String,
    outbound: Box<dyn PayloadSink>,
    inbound: Receiver<Vec<u8>>,
    open: Arc<AtomicBool>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("label", &self.label)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl ChannelTransport {
    pub fn new(
        label: impl Into<String>,
        outbound: impl PayloadSink + 'static,
        inbound: Receiver<Vec<u8>>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            label: label.into(),
            outbound: Box::new(outbound),
            inbound,
            open,
            on_close: None,
        }
    }

    /// Run `hook` once when the transport is closed or dropped
    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    fn closed(&self) -> TickError {
        TickError::transport(format!("{} is closed", self.label))
    }

    fn decode(&self, payload: &[u8]) -> Option<Frame> {
        match Frame::decode(payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::debug!("[{}] dropping undecodable frame: {}", self.label, e);
                None
            }
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, frame: &Frame) -> TickResult<()> {
        if !self.is_open() {
            return Err(self.closed());
        }
        let payload = frame.encode()?;
        match self.outbound.push(payload) {
            Ok(()) => Ok(()),
            Err(SinkError::Full) => Err(TickError::transport(format!(
                "{} send queue is full",
                self.label
            ))),
            Err(SinkError::Closed) => {
                self.open.store(false, Ordering::Release);
                Err(self.closed())
            }
        }
    }

    fn try_recv(&mut self) -> TickResult<Option<Frame>> {
        loop {
            match self.inbound.try_recv() {
                Ok(payload) => {
                    if let Some(frame) = self.decode(&payload) {
                        return Ok(Some(frame));
                    }
                }
                Err(TryRecvError::Empty) => {
                    return if self.is_open() {
                        Ok(None)
                    } else {
                        Err(self.closed())
                    };
                }
                Err(TryRecvError::Disconnected) => {
                    self.open.store(false, Ordering::Release);
                    return Err(self.closed());
                }
            }
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> TickResult<Option<Frame>> {
        if !self.is_open() && self.inbound.is_empty() {
            return Err(self.closed());
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.inbound.recv_deadline(deadline) {
                Ok(payload) => {
                    if let Some(frame) = self.decode(&payload) {
                        return Ok(Some(frame));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return if self.is_open() {
                        Ok(None)
                    } else {
                        Err(self.closed())
                    };
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.open.store(false, Ordering::Release);
                    return Err(self.closed());
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::frame::FrameBody;
    use crossbeam::channel::bounded;

    #[test]
    fn test_round_trip_and_close() {
        let (out_tx, out_rx) = bounded(4);
        let (in_tx, in_rx) = bounded(4);
        let open = Arc::new(AtomicBool::new(true));
        let mut transport = ChannelTransport::new("test", out_tx, in_rx, Arc::clone(&open));

        transport.send(&Frame::new(1, FrameBody::Heartbeat)).unwrap();
        let sent = Frame::decode(&out_rx.recv().unwrap()).unwrap();
        assert_eq!(sent.body, FrameBody::Heartbeat);

        in_tx.send(Frame::new(5, FrameBody::Goodbye).encode().unwrap()).unwrap();
        in_tx.send(vec![0xff, 0x00]).unwrap();
        assert_eq!(transport.try_recv().unwrap().unwrap().seq, 5);
        assert!(transport.try_recv().unwrap().is_none());

        transport.close();
        assert!(transport.send(&Frame::new(2, FrameBody::Heartbeat)).is_err());
        assert!(transport.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_is_an_error_not_a_block() {
        let (out_tx, _out_rx) = bounded(1);
        let (_in_tx, in_rx) = bounded(1);
        let mut transport =
            ChannelTransport::new("full", out_tx, in_rx, Arc::new(AtomicBool::new(true)));
        transport.send(&Frame::new(1, FrameBody::Heartbeat)).unwrap();
        assert!(transport.send(&Frame::new(2, FrameBody::Heartbeat)).is_err());
        assert!(transport.is_open());
    }

    #[test]
    fn test_recv_timeout_returns_none_when_idle() {
        let (out_tx, _out_rx) = bounded(1);
        let (_in_tx, in_rx) = bounded(1);
        let mut transport =
            ChannelTransport::new("idle", out_tx, in_rx, Arc::new(AtomicBool::new(true)));
        assert!(transport
            .recv_timeout(Duration::from_millis(5))
            .unwrap()
            .is_none());
    }
}
