/// Bridge wire format
///
/// Every message between a host and a device is a bincode-encoded [`Frame`].
/// Packet transports (memory) carry the encoded payload as-is. Byte-stream
/// transports (TCP, UART) wrap it:
///
/// ```text
/// +------+------+-----------+-----------+-------------+
/// | 0x54 | 0x47 | len u32le | payload   | fletcher16  |
/// +------+------+-----------+-----------+-------------+
/// ```
///
/// The decoder resynchronises on the magic bytes after a corrupt frame, so a
/// noisy serial line loses frames rather than the whole link.
use crate::core::PortValue;
use crate::error::{TickError, TickResult};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u16 = 1;

const MAGIC: [u8; 2] = [0x54, 0x47];
const HEADER_LEN: usize = 6;
const TRAILER_LEN: usize = 2;
/// Largest payload accepted from a stream
pub const MAX_PAYLOAD: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Per-direction sequence number, restarting at 1 after every handshake
    pub seq: u64,
    pub body: FrameBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameBody {
    /// Host -> device. Paths are in the device model's namespace: `imports`
    /// are device inputs the host writes, `exports` device outputs it reads.
    Hello {
        protocol: u16,
        fingerprint: String,
        imports: Vec<String>,
        exports: Vec<String>,
    },
    Welcome {
        fingerprint: String,
    },
    Reject {
        reason: String,
    },
    /// Latest values, indexed by position in the handshake's import/export list
    Values {
        entries: Vec<(u32, PortValue)>,
    },
    Heartbeat,
    Goodbye,
}

impl FrameBody {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameBody::Hello { .. } => "Hello",
            FrameBody::Welcome { .. } => "Welcome",
            FrameBody::Reject { .. } => "Reject",
            FrameBody::Values { .. } => "Values",
            FrameBody::Heartbeat => "Heartbeat",
            FrameBody::Goodbye => "Goodbye",
        }
    }
}

impl Frame {
    pub fn new(seq: u64, body: FrameBody) -> Self {
        Self { seq, body }
    }

    pub fn encode(&self) -> TickResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> TickResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u16 = 0;
    let mut sum2: u16 = 0;
    for &byte in data {
        sum1 = (sum1 + byte as u16) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    (sum2 << 8) | sum1
}

/// Wrap an encoded frame for a byte stream
pub fn encode_stream(payload: &[u8], out: &mut Vec<u8>) -> TickResult<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(TickError::Serialization(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    out.reserve(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&fletcher16(payload).to_le_bytes());
    Ok(())
}

/// Incremental decoder for [`encode_stream`] output
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    corrupt: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Frames discarded for bad length or checksum
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt
    }

    /// Next complete payload, if one is buffered
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = self.buffer.windows(2).position(|w| w == MAGIC);
            match start {
                Some(0) => {}
                Some(offset) => {
                    self.buffer.drain(..offset);
                }
                None => {
                    // Keep a trailing first magic byte, it may complete later
                    let keep = usize::from(self.buffer.last() == Some(&MAGIC[0]));
                    let drop_to = self.buffer.len() - keep;
                    self.buffer.drain(..drop_to);
                    return None;
                }
            }

            if self.buffer.len() < HEADER_LEN {
                return None;
            }
            let len = u32::from_le_bytes([
                self.buffer[2],
                self.buffer[3],
                self.buffer[4],
                self.buffer[5],
            ]) as usize;
            if len > MAX_PAYLOAD {
                self.corrupt += 1;
                self.buffer.drain(..MAGIC.len());
                continue;
            }
            let total = HEADER_LEN + len + TRAILER_LEN;
            if self.buffer.len() < total {
                return None;
            }

            let payload = &self.buffer[HEADER_LEN..HEADER_LEN + len];
            let checksum = u16::from_le_bytes([self.buffer[total - 2], self.buffer[total - 1]]);
            if fletcher16(payload) != checksum {
                self.corrupt += 1;
                self.buffer.drain(..MAGIC.len());
                continue;
            }
            let payload = payload.to_vec();
            self.buffer.drain(..total);
            return Some(payload);
        }
    }
}
