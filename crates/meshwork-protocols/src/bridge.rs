//! Byte framing for envelopes.
//!
//! ```text
//! ┌─────────┬────────────────┬──────────────────────────┐
//! │ version │ body length    │ body (bincode Envelope)  │
//! │  1 byte │ 4 bytes, BE    │ length bytes             │
//! └─────────┴────────────────┴──────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Version byte written at the start of every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version byte plus length prefix.
pub const HEADER_LEN: usize = 5;

/// Default bound on a frame body.
pub const DEFAULT_MAX_FRAME: usize = 1 << 20;

/// Encodes and decodes envelopes at the transport boundary.
#[derive(Debug, Clone)]
pub struct ProtocolBridge {
    max_frame: usize,
}

impl Default for ProtocolBridge {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

impl ProtocolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest body accepted in either direction.
    #[must_use]
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Encode one envelope as a standalone frame.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode_into(envelope, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append one frame to `dst`.
    pub fn encode_into(&self, envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
        let body = bincode::serialize(envelope).map_err(Error::Encode)?;
        if body.len() > self.max_frame {
            return Err(Error::Oversized {
                len: body.len(),
                max: self.max_frame,
            });
        }
        let len = u32::try_from(body.len()).map_err(|_| Error::Oversized {
            len: body.len(),
            max: self.max_frame,
        })?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u32(len);
        dst.put_slice(&body);
        trace!(
            from = %envelope.from,
            to = %envelope.to,
            lane = %envelope.lane,
            kind = envelope.payload.kind(),
            bytes = HEADER_LEN + body.len(),
            "encoded envelope"
        );
        Ok(())
    }

    /// Decode exactly one frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Envelope> {
        let Some(len) = self.header(frame)? else {
            return Err(Error::Truncated {
                needed: HEADER_LEN,
                available: frame.len(),
            });
        };
        let total = HEADER_LEN + len;
        if frame.len() < total {
            return Err(Error::Truncated {
                needed: total,
                available: frame.len(),
            });
        }
        if frame.len() > total {
            return Err(Error::TrailingBytes(frame.len() - total));
        }
        bincode::deserialize(&frame[HEADER_LEN..]).map_err(Error::Decode)
    }

    /// Take the next complete frame off a stream buffer.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete. A bad header
    /// is reported as soon as it arrives, without waiting for the body.
    pub fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        let Some(len) = self.header(src)? else {
            return Ok(None);
        };
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let body = src.split_to(len);
        bincode::deserialize(&body).map(Some).map_err(Error::Decode)
    }

    /// Validate a frame header, returning the body length, or `None` if
    /// the header is incomplete.
    fn header(&self, frame: &[u8]) -> Result<Option<usize>> {
        if frame.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &frame[..HEADER_LEN];
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: PROTOCOL_VERSION,
            });
        }
        let len = header.get_u32() as usize;
        if len > self.max_frame {
            return Err(Error::Oversized {
                len,
                max: self.max_frame,
            });
        }
        Ok(Some(len))
    }
}
