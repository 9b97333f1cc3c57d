//! Whole-message transport on top of [`crate::frame`].
//!
//! Every message goes out in two phases: a [`Opcode::Length`] frame whose
//! payload is the 8-byte big-endian size of the message, then the message
//! itself split into as many frames as the frame capacity requires, with FIN
//! set only on the last one. The announced size lets the receiver check what
//! it reassembled, since a single frame can never describe a long message.
//!
//! A data frame that arrives without a length frame in front of it is taken
//! as a complete message on its own.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::{
    error::TransportError,
    frame::{Frame, FrameCodec, Opcode, fragment},
};

const LENGTH_PREFIX_LEN: usize = 8;

/// Sending half of a message stream.
pub struct MessageWriter<W> {
    frames: FramedWrite<W, FrameCodec>,
    masked: bool,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// `masked` selects whether every outgoing frame carries a fresh random
    /// masking key.
    pub fn new(io: W, masked: bool) -> Self {
        Self::with_codec(io, FrameCodec::new(), masked)
    }

    pub fn with_codec(io: W, codec: FrameCodec, masked: bool) -> Self {
        Self {
            frames: FramedWrite::new(io, codec),
            masked,
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let announced = payload.len() as u64;
        let length = Frame::new(Opcode::Length, announced.to_be_bytes().to_vec())
            .with_mask(self.mask_key());
        self.frames.feed(length).await?;

        let capacity = self.frames.encoder().capacity();
        let chunks = fragment(payload, self.masked, capacity);
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let opcode = if index == 0 {
                Opcode::Text
            } else {
                Opcode::Continuation
            };
            let frame = Frame::new(opcode, Bytes::copy_from_slice(chunk))
                .with_fin(index == last)
                .with_mask(self.mask_key());
            self.frames.feed(frame).await?;
        }

        self.frames.flush().await?;
        Ok(())
    }

    /// Flushes pending frames and shuts down the write side of the socket.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.frames.close().await?;
        Ok(())
    }

    fn mask_key(&self) -> Option<[u8; 4]> {
        self.masked.then(rand::random)
    }
}

/// Receiving half of a message stream.
pub struct MessageReader<R> {
    frames: FramedRead<R, FrameCodec>,
    max_message_len: usize,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Messages announced as longer than `max_message_len` are refused
    /// before any of their fragments are buffered.
    pub fn new(io: R, max_message_len: usize) -> Self {
        Self::with_codec(io, FrameCodec::new(), max_message_len)
    }

    pub fn with_codec(io: R, codec: FrameCodec, max_message_len: usize) -> Self {
        Self {
            frames: FramedRead::new(io, codec),
            max_message_len,
        }
    }

    /// Reads the next complete message.
    ///
    /// Returns [`TransportError::Closed`] once the peer has closed the
    /// connection. Any error leaves the stream unusable.
    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        loop {
            let frame = self.next_frame().await?;
            match frame.opcode {
                Opcode::Length => return self.receive_announced(&frame.payload).await,
                Opcode::Close => return Err(TransportError::Closed),
                Opcode::Ping | Opcode::Pong => {
                    debug!(opcode = %frame.opcode, "ignoring control frame");
                }
                _ => return Ok(frame.payload),
            }
        }
    }

    async fn receive_announced(&mut self, prefix: &[u8]) -> Result<Bytes, TransportError> {
        let prefix: [u8; LENGTH_PREFIX_LEN] = prefix
            .try_into()
            .map_err(|_| TransportError::MalformedLength(prefix.len()))?;
        let announced = u64::from_be_bytes(prefix);
        if announced > self.max_message_len as u64 {
            return Err(TransportError::MessageTooLarge {
                len: announced,
                max: self.max_message_len,
            });
        }

        let mut message = BytesMut::with_capacity(announced as usize);
        loop {
            let frame = self.next_frame().await?;
            match frame.opcode {
                opcode if opcode.is_data() => {}
                Opcode::Ping | Opcode::Pong => continue,
                Opcode::Close => return Err(TransportError::Closed),
                other => return Err(TransportError::UnexpectedFrame(other)),
            }

            message.extend_from_slice(&frame.payload);
            if message.len() as u64 > announced {
                return Err(TransportError::LengthMismatch {
                    announced,
                    received: message.len(),
                });
            }
            if frame.fin {
                break;
            }
        }

        if message.len() as u64 != announced {
            return Err(TransportError::LengthMismatch {
                announced,
                received: message.len(),
            });
        }
        Ok(message.freeze())
    }

    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        match self.frames.next().await {
            Some(frame) => Ok(frame?),
            None => Err(TransportError::Closed),
        }
    }
}
