//! Binary frame codec for the chat wire protocol.
//!
//! Frames use the WebSocket header layout with two restrictions: the 64-bit
//! extended length is never used, and a whole frame (header plus payload)
//! never exceeds the codec capacity, [`FRAME_CAPACITY`] bytes by default.
//! Opcode `0x0B` is private to this protocol and announces the total length
//! of the application message that follows (see [`crate::transport`]).
//!
//! ```text
//! byte 0   FIN(1) RSV(3) OPCODE(4)
//! byte 1   MASK(1) LEN(7)
//! [2 bytes big-endian extended length when LEN == 126]
//! [4 bytes masking key when MASK == 1]
//! payload
//! ```
//!
//! [`FrameCodec`] decodes from a growing buffer, so a frame split across any
//! number of socket reads is reassembled before it is handed out.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::FrameError;

/// Maximum size of one encoded frame, header included.
pub const FRAME_CAPACITY: usize = 1024;

/// Largest header the codec emits: base, extended length and masking key.
pub const MAX_HEADER_LEN: usize = 8;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_BITS: u8 = 0x0F;
const LEN_BITS: u8 = 0x7F;
const MAX_SHORT_LEN: usize = 125;
const EXTENDED_LEN_MARKER: u8 = 126;
const LONG_LEN_MARKER: u8 = 127;
const MASK_KEY_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
    /// Carries the 8-byte big-endian length of the message that follows.
    Length = 0xB,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            0xB => Some(Self::Length),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Data frames carry (part of) an application message.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Length => "length",
        };
        f.write_str(name)
    }
}

/// One wire frame. `payload` always holds the unmasked bytes; masking is
/// applied while encoding and removed while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of bytes [`Frame::encode`] writes for this frame.
    pub fn encoded_len(&self) -> usize {
        header_len(self.payload.len(), self.is_masked()) + self.payload.len()
    }

    /// Encodes the frame at the start of `buf`, whose length is the frame
    /// capacity, and returns the number of bytes written.
    ///
    /// Payloads at or above the capacity are rejected outright, as is any
    /// frame whose header and payload do not fit in `buf` together.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.payload.len();
        let capacity = buf.len();
        if len >= capacity || len > usize::from(u16::MAX) {
            return Err(FrameError::PayloadTooLarge { len, capacity });
        }

        let needed = self.encoded_len();
        if needed > capacity {
            return Err(FrameError::BufferTooSmall {
                needed,
                available: capacity,
            });
        }

        buf[0] = self.opcode.as_u8();
        if self.fin {
            buf[0] |= FIN_BIT;
        }
        buf[1] = if self.is_masked() { MASK_BIT } else { 0 };

        let mut cursor = 2;
        if len <= MAX_SHORT_LEN {
            buf[1] |= len as u8;
        } else {
            buf[1] |= EXTENDED_LEN_MARKER;
            buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            cursor = 4;
        }

        match self.mask {
            Some(key) => {
                buf[cursor..cursor + MASK_KEY_LEN].copy_from_slice(&key);
                cursor += MASK_KEY_LEN;
                buf[cursor..needed].copy_from_slice(&self.payload);
                apply_mask(&mut buf[cursor..needed], key);
            }
            None => buf[cursor..needed].copy_from_slice(&self.payload),
        }

        Ok(needed)
    }

    /// Decodes one frame from the start of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` holds only part of a frame; otherwise
    /// returns the frame and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(header) = Header::parse(buf)? else {
            return Ok(None);
        };
        let total = header.frame_len();
        if buf.len() < total {
            return Ok(None);
        }

        let mut payload = BytesMut::from(&buf[header.len..total]);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some((header.into_frame(payload.freeze()), total)))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FIN: {}, OPCODE: {}, MASK: {}, LEN: {}",
            self.fin,
            self.opcode,
            self.is_masked(),
            self.payload.len()
        )
    }
}

/// Header length for a payload of `payload_len` bytes: 2 or 4 bytes
/// depending on whether the 16-bit extended length is needed, plus 4 when
/// masked.
pub fn header_len(payload_len: usize, masked: bool) -> usize {
    let base = if payload_len <= MAX_SHORT_LEN { 2 } else { 4 };
    if masked { base + MASK_KEY_LEN } else { base }
}

/// Splits `payload` into ordered chunks that each fit in one frame of
/// `capacity` bytes. Every chunk but the last has the same maximal size.
/// An empty payload yields a single empty chunk.
pub fn fragment(payload: &[u8], masked: bool, capacity: usize) -> Vec<&[u8]> {
    // The header for the whole payload is at least as large as the header
    // any single chunk needs.
    let max_chunk = capacity
        .saturating_sub(header_len(payload.len(), masked))
        .max(1);

    if payload.len() <= max_chunk {
        return vec![payload];
    }
    payload.chunks(max_chunk).collect()
}

fn apply_mask(bytes: &mut [u8], key: [u8; 4]) {
    for (index, byte) in bytes.iter_mut().enumerate() {
        *byte ^= key[index % MASK_KEY_LEN];
    }
}

struct Header {
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    len: usize,
    payload_len: usize,
}

impl Header {
    fn parse(buf: &[u8]) -> Result<Option<Self>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & FIN_BIT != 0;
        let raw_opcode = buf[0] & OPCODE_BITS;
        let opcode = Opcode::from_u8(raw_opcode).ok_or(FrameError::UnknownOpcode(raw_opcode))?;
        let masked = buf[1] & MASK_BIT != 0;

        let (payload_len, mut len) = match buf[1] & LEN_BITS {
            LONG_LEN_MARKER => return Err(FrameError::UnsupportedLength),
            EXTENDED_LEN_MARKER => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            short => (usize::from(short), 2),
        };

        let mask = if masked {
            if buf.len() < len + MASK_KEY_LEN {
                return Ok(None);
            }
            let key = [buf[len], buf[len + 1], buf[len + 2], buf[len + 3]];
            len += MASK_KEY_LEN;
            Some(key)
        } else {
            None
        };

        Ok(Some(Self {
            fin,
            opcode,
            mask,
            len,
            payload_len,
        }))
    }

    fn frame_len(&self) -> usize {
        self.len + self.payload_len
    }

    fn into_frame(self, payload: Bytes) -> Frame {
        Frame {
            fin: self.fin,
            opcode: self.opcode,
            mask: self.mask,
            payload,
        }
    }
}

/// Streaming codec for [`Frame`]s, for use with `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    capacity: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_capacity(FRAME_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(header) = Header::parse(&src[..])? else {
            return Ok(None);
        };

        let frame_len = header.frame_len();
        if frame_len > self.capacity {
            return Err(FrameError::FrameTooLarge {
                len: frame_len,
                capacity: self.capacity,
            });
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header.len);
        let mut payload = src.split_to(header.payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        let frame = header.into_frame(payload.freeze());
        trace!(%frame, "received frame");
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = frame.encoded_len();
        if len > self.capacity {
            return Err(FrameError::PayloadTooLarge {
                len: frame.payload.len(),
                capacity: self.capacity,
            });
        }

        let start = dst.len();
        dst.resize(start + len, 0);
        if let Err(err) = frame.encode(&mut dst[start..]) {
            dst.truncate(start);
            return Err(err);
        }

        trace!(%frame, "sending frame");
        Ok(())
    }
}
