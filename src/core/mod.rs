//! # Core Components
//!
//! The message envelope, its wire codec, and the concurrent queue that carries
//! envelopes between application threads and the I/O thread.
//!
//! ## Wire Format
//! ```text
//! [Kind(4)] [Length(4)] [Payload(Length)]
//! ```
//! Both header fields are big-endian. The payload is opaque to the codec.

pub mod codec;
pub mod envelope;
pub mod queue;
