//! Serial transport using the serialport crate
//!
//! One reader and one writer thread per open port. Frames use the stream
//! framing with checksum so line noise costs individual frames, never sync.
//! Requires the `uart` feature; without it, opening a `uart:` address is a
//! [`TickError::FeatureNotAvailable`].

use crate::communication::transport::{ChannelTransport, Listener, Transport};
use crate::error::{TickError, TickResult};

#[cfg(feature = "uart")]
mod system {
    use super::*;
    use crate::communication::frame::{encode_stream, StreamDecoder};
    use crossbeam::channel::{bounded, RecvTimeoutError, TrySendError};
    use std::io::{ErrorKind, Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const SEND_QUEUE_SIZE: usize = 32;
    const RECV_QUEUE_SIZE: usize = 128;
    const READ_TIMEOUT: Duration = Duration::from_millis(20);

    pub fn open(device: &str, baud_rate: u32) -> TickResult<ChannelTransport> {
        let mut port = serialport::new(device, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                TickError::transport(format!("failed to open serial port {}: {}", device, e))
            })?;
        let mut writer = port.try_clone().map_err(|e| {
            TickError::transport(format!("failed to clone serial port {}: {}", device, e))
        })?;

        let label = format!("uart:{}", device);
        let open = Arc::new(AtomicBool::new(true));
        let (send_tx, send_rx) = bounded::<Vec<u8>>(SEND_QUEUE_SIZE);
        let (recv_tx, recv_rx) = bounded::<Vec<u8>>(RECV_QUEUE_SIZE);

        let write_open = Arc::clone(&open);
        std::thread::Builder::new()
            .name("tg-uart-tx".into())
            .spawn(move || {
                let mut wire = Vec::new();
                while write_open.load(Ordering::Acquire) {
                    match send_rx.recv_timeout(READ_TIMEOUT) {
                        Ok(payload) => {
                            wire.clear();
                            if encode_stream(&payload, &mut wire).is_err() {
                                continue;
                            }
                            if writer.write_all(&wire).and_then(|_| writer.flush()).is_err() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                write_open.store(false, Ordering::Release);
            })?;

        let read_open = Arc::clone(&open);
        let read_label = label.clone();
        std::thread::Builder::new()
            .name("tg-uart-rx".into())
            .spawn(move || {
                let mut decoder = StreamDecoder::new();
                let mut chunk = [0u8; 512];
                while read_open.load(Ordering::Acquire) {
                    match port.read(&mut chunk) {
                        Ok(0) => {}
                        Ok(n) => {
                            decoder.push(&chunk[..n]);
                            while let Some(payload) = decoder.next_payload() {
                                match recv_tx.try_send(payload) {
                                    Ok(()) | Err(TrySendError::Full(_)) => {}
                                    Err(TrySendError::Disconnected(_)) => {
                                        read_open.store(false, Ordering::Release);
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::TimedOut => {}
                        Err(e) => {
                            log::warn!("[Uart] {} read failed: {}", read_label, e);
                            break;
                        }
                    }
                }
                read_open.store(false, Ordering::Release);
            })?;

        Ok(ChannelTransport::new(label, send_tx, recv_rx, open))
    }
}

#[cfg(feature = "uart")]
pub use system::open;

#[cfg(not(feature = "uart"))]
pub fn open(device: &str, _baud_rate: u32) -> TickResult<ChannelTransport> {
    Err(TickError::FeatureNotAvailable(format!(
        "uart:{} requires tickgraph_core to be built with the 'uart' feature",
        device
    )))
}

/// Device-side serial "listener": a serial line has exactly one peer, so the
/// port is opened on the first `accept` and handed out once. After that
/// transport closes, the next `accept` reopens the port.
pub struct SerialListener {
    device: String,
    baud_rate: u32,
    handed_out: Option<std::sync::Weak<()>>,
}

impl SerialListener {
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            handed_out: None,
        }
    }
}

impl Listener for SerialListener {
    fn accept(&mut self) -> TickResult<Option<Box<dyn Transport>>> {
        if let Some(alive) = &self.handed_out {
            if alive.upgrade().is_some() {
                return Ok(None);
            }
        }
        let token = std::sync::Arc::new(());
        let transport = open(&self.device, self.baud_rate)?;
        self.handed_out = Some(std::sync::Arc::downgrade(&token));
        Ok(Some(Box::new(transport.with_close_hook(move || drop(token)))))
    }

    fn describe(&self) -> String {
        format!("uart:{}", self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "uart"))]
    #[test]
    fn test_uart_without_feature_reports_it() {
        let err = open("/dev/ttyUSB0", 115_200).unwrap_err();
        assert!(matches!(err, TickError::FeatureNotAvailable(_)));
    }

    #[test]
    fn test_missing_device_fails() {
        assert!(open("/dev/tickgraph-does-not-exist", 115_200).is_err());
    }
}
