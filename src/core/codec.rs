//! Tokio codec for envelope framing over a byte stream.
//!
//! Decoding is a two-state machine: wait for a full header, then (if the header
//! announces a payload) wait for exactly that many payload bytes. A zero-length
//! header yields an envelope immediately.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::envelope::{Envelope, EnvelopeHeader, MessageKind, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
enum DecodeState<T> {
    Header,
    Body(EnvelopeHeader<T>),
}

/// Length-prefixed envelope codec.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec<T> {
    state: DecodeState<T>,
    max_payload_size: Option<usize>,
    _kind: PhantomData<T>,
}

impl<T: MessageKind> EnvelopeCodec<T> {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            max_payload_size: None,
            _kind: PhantomData,
        }
    }

    /// Reject headers that announce more than `limit` payload bytes.
    pub fn with_max_payload_size(mut self, limit: Option<usize>) -> Self {
        self.max_payload_size = limit;
        self
    }

    fn check_length(&self, length: usize) -> Result<()> {
        match self.max_payload_size {
            Some(limit) if length > limit => Err(ProtocolError::OversizedPayload(length)),
            _ => Ok(()),
        }
    }
}

impl<T: MessageKind> Default for EnvelopeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Decoder for EnvelopeCodec<T> {
    type Item = Envelope<T>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let DecodeState::Header = self.state {
            if src.len() < HEADER_SIZE {
                src.reserve(HEADER_SIZE - src.len());
                return Ok(None);
            }

            let mut raw = [0u8; HEADER_SIZE];
            raw.copy_from_slice(&src[..HEADER_SIZE]);
            let header = EnvelopeHeader::<T>::from_bytes(&raw)?;
            let length = header.length as usize;
            self.check_length(length)?;
            src.advance(HEADER_SIZE);

            if length == 0 {
                return Ok(Some(Envelope::new(header.kind)));
            }

            src.reserve(length.saturating_sub(src.len()));
            self.state = DecodeState::Body(header);
        }

        let DecodeState::Body(header) = self.state else {
            return Ok(None);
        };

        let length = header.length as usize;
        if src.len() < length {
            return Ok(None);
        }

        let payload = src.split_to(length).to_vec();
        self.state = DecodeState::Header;
        Envelope::from_parts(header.kind, payload).map(Some)
    }
}

impl<T: MessageKind> Encoder<Envelope<T>> for EnvelopeCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope<T>, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Envelope<T>>>::encode(self, &item, dst)
    }
}

impl<T: MessageKind> Encoder<&Envelope<T>> for EnvelopeCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Envelope<T>, dst: &mut BytesMut) -> Result<()> {
        self.check_length(item.len())?;
        dst.reserve(item.total_size());
        dst.put_slice(&item.header().to_bytes());
        dst.put_slice(item.payload());
        Ok(())
    }
}
