//! Challenge/response handshake gating every connection.
//!
//! The acceptor sends a bare `u64` challenge taken from a high-resolution clock.
//! The initiator answers with `scramble(challenge)`; the acceptor admits the peer
//! only if the answer matches its own `scramble(challenge)` bit for bit.
//!
//! This is an anti-automation check, not authentication: the scramble constants
//! are compiled into both peers and anyone holding them can answer correctly.
//! Frames are exchanged exactly once, before any envelope traffic, big-endian.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use crate::error::{constants, ProtocolError, Result};

const SCRAMBLE_IN: u64 = 0xDEAD_BEEF_C0DE_CAFE;
const SCRAMBLE_OUT: u64 = 0xC0DE_FACE_1234_5678;
const NIBBLE_MASK: u64 = 0x00F0_F0F0_F0F0_F0F0;

/// Size of a handshake frame in bytes.
pub const HANDSHAKE_FRAME_SIZE: usize = 8;

/// Fixed bit shuffle both peers apply to the challenge.
///
/// Not an involution: `scramble(scramble(x)) != x` for most `x`.
#[inline]
pub fn scramble(input: u64) -> u64 {
    let out = input ^ SCRAMBLE_IN;
    let out = ((out & NIBBLE_MASK) >> 4) | ((out & NIBBLE_MASK) << 4);
    out ^ SCRAMBLE_OUT
}

/// Nanoseconds since the epoch, used as the challenge value.
fn clock_challenge() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        // a clock before 1970 still yields a usable, if predictable, challenge
        .unwrap_or_default()
}

/// Acceptor-side handshake values for one connection.
#[derive(Debug, Clone, Copy)]
pub struct AcceptorHandshake {
    challenge: u64,
    expected: u64,
}

impl AcceptorHandshake {
    /// Draw a challenge from the clock and precompute the expected answer.
    pub fn new() -> Self {
        Self::with_challenge(clock_challenge())
    }

    pub fn with_challenge(challenge: u64) -> Self {
        Self {
            challenge,
            expected: scramble(challenge),
        }
    }

    pub fn challenge(&self) -> u64 {
        self.challenge
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Compare the peer's answer with the expected value.
    ///
    /// # Errors
    /// `HandshakeMismatch` when the values differ.
    pub fn verify(&self, received: u64) -> Result<()> {
        if received == self.expected {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeMismatch {
                expected: self.expected,
                received,
            })
        }
    }

    /// Send the challenge, read the answer, verify it.
    #[instrument(level = "debug", skip(self, stream), fields(challenge = self.challenge))]
    pub async fn run<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&self.challenge.to_be_bytes()).await?;
        stream.flush().await?;

        let received = read_frame(stream).await?;
        self.verify(received).inspect_err(|e| {
            warn!(error = %e, "Peer failed the handshake");
        })?;

        debug!("Peer validated");
        Ok(())
    }
}

impl Default for AcceptorHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Initiator side: read the challenge and answer it. Returns the challenge.
#[instrument(level = "debug", skip(stream))]
pub async fn answer_challenge<S>(stream: &mut S) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = read_frame(stream).await?;
    stream.write_all(&scramble(challenge).to_be_bytes()).await?;
    stream.flush().await?;
    debug!(challenge, "Answered handshake challenge");
    Ok(challenge)
}

/// Read one handshake frame; a peer hanging up mid-frame is a handshake failure.
async fn read_frame<S>(stream: &mut S) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    match stream.read_u64().await {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_HANGUP.to_string()),
        ),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
