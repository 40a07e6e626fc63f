//! # Protocol Layer
//!
//! The challenge/response handshake and the per-peer connection state machine
//! that frames envelopes over a socket once the handshake has passed.

pub mod connection;
pub mod handshake;
