//! # Message Envelope
//!
//! A framed binary message: a fixed 8-byte header (kind tag + payload length)
//! followed by a variable-length payload.
//!
//! The payload behaves as a byte-level stack. [`Envelope::append`] pushes the raw
//! bytes of a plain-old-data value onto the end; [`Envelope::extract`] pops the most
//! recently appended value back off. Values therefore come out in reverse order:
//!
//! ```rust
//! use duplex_net::core::envelope::{Envelope, StandardKind};
//!
//! let mut msg = Envelope::new(StandardKind::ServerMessage);
//! msg.append(&1u32).append(&2.5f64);
//!
//! assert_eq!(msg.extract::<f64>().unwrap(), 2.5);
//! assert_eq!(msg.extract::<u32>().unwrap(), 1);
//! assert!(msg.is_empty());
//! ```
//!
//! Only [`bytemuck::Pod`] types can be appended or extracted; anything with
//! indirection (`String`, `Vec`, references) is rejected at compile time.

use std::fmt;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::protocol::connection::ConnectionId;

/// Size of an encoded [`EnvelopeHeader`] in bytes.
pub const HEADER_SIZE: usize = 8;

/// Application-chosen message tag carried in every header.
///
/// The tag travels as a fixed 4-byte field. `from_wire` returns `None` for tags
/// the application does not know; the read pipeline treats that as a protocol error.
pub trait MessageKind: Copy + Send + Sync + fmt::Debug + 'static {
    fn to_wire(self) -> u32;
    fn from_wire(tag: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    #[inline]
    fn to_wire(self) -> u32 {
        self
    }

    #[inline]
    fn from_wire(tag: u32) -> Option<Self> {
        Some(tag)
    }
}

/// Standard message kinds for simple client/server applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StandardKind {
    ServerAccept = 0,
    ServerDeny = 1,
    ServerPing = 2,
    ServerAll = 3,
    ServerMessage = 4,
}

impl MessageKind for StandardKind {
    #[inline]
    fn to_wire(self) -> u32 {
        self as u32
    }

    fn from_wire(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(StandardKind::ServerAccept),
            1 => Some(StandardKind::ServerDeny),
            2 => Some(StandardKind::ServerPing),
            3 => Some(StandardKind::ServerAll),
            4 => Some(StandardKind::ServerMessage),
            _ => None,
        }
    }
}

/// Fixed-size header sent at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader<T> {
    pub kind: T,
    pub length: u32,
}

impl<T: MessageKind> EnvelopeHeader<T> {
    /// Encode as `[tag: u32 BE][length: u32 BE]`.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_wire().to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from exactly [`HEADER_SIZE`] bytes.
    ///
    /// # Errors
    /// `UnknownMessageKind` if the tag does not map to `T`.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let tag = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let kind = T::from_wire(tag).ok_or(ProtocolError::UnknownMessageKind(tag))?;
        Ok(Self { kind, length })
    }
}

/// Header plus payload. `header.length == payload.len()` after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    header: EnvelopeHeader<T>,
    payload: Vec<u8>,
}

impl<T: MessageKind> Envelope<T> {
    /// Create an empty envelope of the given kind.
    pub fn new(kind: T) -> Self {
        Self {
            header: EnvelopeHeader { kind, length: 0 },
            payload: Vec::new(),
        }
    }

    /// Build an envelope around an already assembled payload.
    ///
    /// # Errors
    /// `OversizedPayload` if the payload cannot be described by a `u32` length.
    pub fn from_parts(kind: T, payload: Vec<u8>) -> Result<Self> {
        let length =
            u32::try_from(payload.len()).map_err(|_| ProtocolError::OversizedPayload(payload.len()))?;
        Ok(Self {
            header: EnvelopeHeader { kind, length },
            payload,
        })
    }

    pub fn kind(&self) -> T {
        self.header.kind
    }

    pub fn set_kind(&mut self, kind: T) {
        self.header.kind = kind;
    }

    pub fn header(&self) -> &EnvelopeHeader<T> {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes, as carried in the header.
    pub fn len(&self) -> usize {
        self.header.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Header plus payload, i.e. the number of bytes this envelope occupies on the wire.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Push the raw bytes of `value` onto the end of the payload.
    ///
    /// # Panics
    /// If the payload would exceed `u32::MAX` bytes.
    pub fn append<V: Pod>(&mut self, value: &V) -> &mut Self {
        self.payload.extend_from_slice(bytemuck::bytes_of(value));
        self.sync_length();
        self
    }

    /// Pop the most recently appended `V` off the end of the payload.
    ///
    /// # Errors
    /// `PayloadUnderflow` if fewer than `size_of::<V>()` bytes remain; the
    /// envelope is left unchanged in that case.
    pub fn extract<V: Pod>(&mut self) -> Result<V> {
        let size = std::mem::size_of::<V>();
        let available = self.payload.len();
        if size > available {
            return Err(ProtocolError::PayloadUnderflow {
                requested: size,
                available,
            });
        }

        let start = available - size;
        let value = bytemuck::pod_read_unaligned::<V>(&self.payload[start..]);
        self.payload.truncate(start);
        self.sync_length();
        Ok(value)
    }

    /// Drop the payload, keeping the kind.
    pub fn clear(&mut self) {
        self.payload.clear();
        self.sync_length();
    }

    pub fn into_parts(self) -> (T, Vec<u8>) {
        (self.header.kind, self.payload)
    }

    fn sync_length(&mut self) {
        #[allow(clippy::expect_used)]
        let length = u32::try_from(self.payload.len()).expect("envelope payload exceeds u32::MAX");
        self.header.length = length;
    }
}

impl<T: MessageKind> fmt::Display for Envelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{} Size:{}", self.header.kind.to_wire(), self.header.length)
    }
}

/// An envelope tagged with the connection it arrived on.
///
/// `origin` is only populated on the acceptor side, where one inbound queue serves
/// every peer. It is an id into the acceptor's registry, so a message can outlive
/// its connection without dangling: resolving a stale id simply yields nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage<T> {
    pub envelope: Envelope<T>,
    pub origin: Option<ConnectionId>,
}

impl<T: MessageKind> OwnedMessage<T> {
    pub fn new(envelope: Envelope<T>, origin: Option<ConnectionId>) -> Self {
        Self { envelope, origin }
    }

    pub fn into_envelope(self) -> Envelope<T> {
        self.envelope
    }
}

impl<T: MessageKind> fmt::Display for OwnedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.envelope, f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_values_come_back_in_reverse_order() {
        let mut msg = Envelope::new(StandardKind::ServerMessage);
        msg.append(&7u8)
            .append(&Point { x: -3, y: 9 })
            .append(&0xDEAD_BEEF_u32);

        assert_eq!(msg.len(), 1 + 8 + 4);
        assert_eq!(msg.extract::<u32>().unwrap(), 0xDEAD_BEEF);
        assert_eq!(msg.extract::<Point>().unwrap(), Point { x: -3, y: 9 });
        assert_eq!(msg.extract::<u8>().unwrap(), 7);
        assert!(msg.is_empty());
        assert_eq!(msg.len(), 0);
    }

    #[test]
    fn test_underflow_leaves_envelope_untouched() {
        let mut msg = Envelope::new(StandardKind::ServerPing);
        msg.append(&1u16);

        let err = msg.extract::<u64>().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadUnderflow {
                requested: 8,
                available: 2
            }
        ));
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.extract::<u16>().unwrap(), 1);
    }

    #[test]
    fn test_total_size_includes_header() {
        let mut msg = Envelope::new(7u32);
        assert_eq!(msg.total_size(), HEADER_SIZE);
        msg.append(&[0u8; 13]);
        assert_eq!(msg.total_size(), HEADER_SIZE + 13);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = EnvelopeHeader {
            kind: StandardKind::ServerAll,
            length: 0x0102_0304,
        };
        assert_eq!(header.to_bytes(), [0, 0, 0, 3, 1, 2, 3, 4]);

        let decoded = EnvelopeHeader::<StandardKind>::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let bytes = [0, 0, 0, 99, 0, 0, 0, 0];
        let err = EnvelopeHeader::<StandardKind>::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageKind(99)));
    }

    #[test]
    fn test_display_matches_header() {
        let mut msg = Envelope::new(StandardKind::ServerPing);
        msg.append(&42u64);
        assert_eq!(msg.to_string(), "ID:2 Size:8");
    }

    #[test]
    fn test_clear_resets_length() {
        let mut msg = Envelope::new(StandardKind::ServerMessage);
        msg.append(&1u64).append(&2u64);
        msg.clear();
        assert_eq!(msg.len(), 0);
        assert_eq!(msg.kind(), StandardKind::ServerMessage);
    }
}
