/// TCP transport
///
/// Sockets live on a small shared tokio runtime. Each connection gets a
/// reader task and a writer task; the scheduler side only sees the
/// [`ChannelTransport`] queues, so a stalled peer never blocks a tick.
///
/// Optimizations carried over from the point-to-point network backend:
/// - TCP_NODELAY on every socket
/// - Bounded lock-free queues in both directions
/// - Payloads dropped (and counted by the bridge) rather than queued forever
use crate::communication::frame::{encode_stream, StreamDecoder};
use crate::communication::transport::{ChannelTransport, Listener, Transport};
use crate::error::{TickError, TickResult};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

const SEND_QUEUE_SIZE: usize = 64;
const RECV_QUEUE_SIZE: usize = 256;
const ACCEPT_QUEUE_SIZE: usize = 8;
const READ_CHUNK: usize = 4096;

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn runtime() -> TickResult<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tg-net")
            .enable_all()
            .build()
            .map_err(|e| TickError::transport(format!("failed to start network runtime: {}", e)))
    })
}

/// Connect to `host:port`, waiting at most `timeout`
pub fn connect(host: &str, port: u16, timeout: Duration) -> TickResult<ChannelTransport> {
    let rt = runtime()?;
    let target = format!("{}:{}", host, port);
    let stream = rt
        .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(&target)).await })
        .map_err(|_| TickError::Timeout(format!("connecting to {}", target)))?
        .map_err(|e| TickError::transport(format!("failed to connect to {}: {}", target, e)))?;
    Ok(spawn_connection(rt, stream, format!("ip:{}", target)))
}

/// Bind a listener on `host:port`
pub fn listen(host: &str, port: u16) -> TickResult<TcpFrameListener> {
    let rt = runtime()?;
    let bind = format!("{}:{}", host, port);
    let listener = rt
        .block_on(TcpListener::bind(&bind))
        .map_err(|e| TickError::transport(format!("failed to bind to {}: {}", bind, e)))?;
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| bind.clone());

    let (accepted_tx, accepted_rx) = bounded(ACCEPT_QUEUE_SIZE);
    let task = rt.spawn(accept_loop(listener, accepted_tx));
    Ok(TcpFrameListener {
        label: format!("ip:{}", local),
        accepted: accepted_rx,
        task,
    })
}

async fn accept_loop(listener: TcpListener, accepted: Sender<ChannelTransport>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[Ip] accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let Ok(rt) = runtime() else { break };
        let transport = spawn_connection(rt, stream, format!("ip:{}", peer));
        match accepted.try_send(transport) {
            Ok(()) => debug!("[Ip] accepted connection from {}", peer),
            Err(TrySendError::Full(_)) => warn!("[Ip] dropping connection from {}: backlog full", peer),
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn spawn_connection(rt: &Runtime, stream: TcpStream, label: String) -> ChannelTransport {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("[Ip] failed to set TCP_NODELAY on {}: {}", label, e);
    }
    let (mut reader, mut writer) = stream.into_split();
    let open = Arc::new(AtomicBool::new(true));
    let (send_tx, mut send_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(SEND_QUEUE_SIZE);
    let (recv_tx, recv_rx) = bounded::<Vec<u8>>(RECV_QUEUE_SIZE);

    let write_open = Arc::clone(&open);
    let write_label = label.clone();
    rt.spawn(async move {
        let mut wire = Vec::with_capacity(READ_CHUNK);
        while let Some(payload) = send_rx.recv().await {
            wire.clear();
            if let Err(e) = encode_stream(&payload, &mut wire) {
                warn!("[Ip] {}: {}", write_label, e);
                continue;
            }
            if writer.write_all(&wire).await.is_err() {
                break;
            }
        }
        write_open.store(false, Ordering::Release);
        let _ = writer.shutdown().await;
    });

    let read_open = Arc::clone(&open);
    let read_label = label.clone();
    let read_task = rt.spawn(async move {
        let mut decoder = StreamDecoder::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    decoder.push(&chunk[..n]);
                    while let Some(payload) = decoder.next_payload() {
                        match recv_tx.try_send(payload) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!("[Ip] {}: receive queue full, dropping frame", read_label)
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                read_open.store(false, Ordering::Release);
                                return;
                            }
                        }
                    }
                }
            }
        }
        read_open.store(false, Ordering::Release);
    });

    ChannelTransport::new(label, send_tx, recv_rx, open).with_close_hook(move || read_task.abort())
}

/// Accepts TCP peers on a bound address
pub struct TcpFrameListener {
    label: String,
    accepted: Receiver<ChannelTransport>,
    task: tokio::task::JoinHandle<()>,
}

impl TcpFrameListener {
    /// Bound address, useful when listening on port 0
    pub fn local_label(&self) -> &str {
        &self.label
    }
}

impl Listener for TcpFrameListener {
    fn accept(&mut self) -> TickResult<Option<Box<dyn Transport>>> {
        match self.accepted.try_recv() {
            Ok(transport) => Ok(Some(Box::new(transport))),
            Err(crossbeam::channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam::channel::TryRecvError::Disconnected) => Err(TickError::transport(
                format!("{} stopped accepting", self.label),
            )),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl Drop for TcpFrameListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::frame::{Frame, FrameBody};
    use std::time::Instant;

    fn accept_within(listener: &mut TcpFrameListener, timeout: Duration) -> Box<dyn Transport> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(t) = listener.accept().unwrap() {
                return t;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_tcp_frames_flow_both_ways() {
        let mut listener = listen("127.0.0.1", 0).unwrap();
        let port: u16 = listener
            .local_label()
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap();

        let mut client = connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        let mut server = accept_within(&mut listener, Duration::from_secs(2));

        client.send(&Frame::new(1, FrameBody::Heartbeat)).unwrap();
        let got = server.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got.seq, 1);

        server.send(&Frame::new(9, FrameBody::Goodbye)).unwrap();
        let got = client.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got.body, FrameBody::Goodbye);
    }

    #[test]
    fn test_connect_refused_is_transport_error() {
        // bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = connect("127.0.0.1", port, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, TickError::Transport(_) | TickError::Timeout(_)));
    }
}
