//! Tokio codec for MSP byte streams.
//!
//! Wraps the byte-at-a-time [`Decoder`] so a transport can be driven with
//! `FramedRead`/`FramedWrite`. Every byte handed to [`MspCodec::decode`] is
//! consumed: bytes of an unfinished frame live in the decoder state, not in
//! the read buffer.

use crate::decoder::Decoder as FrameDecoder;
use crate::error::LinkError;
use crate::frame::Frame;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

#[derive(Debug, Default)]
pub struct MspCodec {
    decoder: FrameDecoder,
}

impl MspCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Drop any frame in progress.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}

impl Decoder for MspCodec {
    type Item = Frame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut consumed = 0;
        let mut frame = None;
        for &byte in src.iter() {
            consumed += 1;
            if let Some(done) = self.decoder.feed(byte) {
                frame = Some(done);
                break;
            }
        }
        src.advance(consumed);
        Ok(frame)
    }
}

/// Outbound buffers are already encoded by the dispatcher.
impl Encoder<Bytes> for MspCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(len = item.len(), "TX {:02x?}", item.as_ref());
        dst.extend_from_slice(&item);
        Ok(())
    }
}
