//! Single-byte session protocol between the edge agent and the bridge.
//!
//! Every message is exactly one byte with no framing, carried over an
//! ordered reliable stream. Byte values are direction-dependent: `b'0'`
//! is [`Event::MotionOff`] when the edge sends it and
//! [`PollReply::Continue`] when the bridge sends it. Each side decodes
//! only the vocabulary it expects to receive.

use std::fmt;

use thiserror::Error;

// ─── Events (edge → bridge) ───────────────────────────────────────

/// Event emitted by the edge agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Motion began; the edge switched the light on.
    MotionOn,
    /// The debounce window elapsed without motion; the light is off.
    MotionOff,
    /// Per-tick poll asking whether the session should continue.
    /// The bridge must answer with exactly one [`PollReply`].
    PollTick,
}

impl Event {
    /// Wire encoding of this event.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::MotionOn => b'1',
            Self::MotionOff => b'0',
            Self::PollTick => b'2',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MotionOn => "motion_on",
            Self::MotionOff => "motion_off",
            Self::PollTick => "poll_tick",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Event {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            b'1' => Ok(Self::MotionOn),
            b'0' => Ok(Self::MotionOff),
            b'2' => Ok(Self::PollTick),
            other => Err(ProtocolError::UnknownEvent(other)),
        }
    }
}

// ─── Poll replies (bridge → edge) ─────────────────────────────────

/// Reply sent by the bridge in answer to a [`Event::PollTick`].
/// Exactly one reply per tick, in order, never pipelined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollReply {
    /// Keep the session alive; poll again next tick.
    Continue,
    /// Shut down: the edge tears down pins and closes the session.
    Terminate,
}

impl PollReply {
    /// Wire encoding of this reply.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Continue => b'0',
            Self::Terminate => b'2',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for PollReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for PollReply {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            b'0' => Ok(Self::Continue),
            b'2' => Ok(Self::Terminate),
            other => Err(ProtocolError::UnknownReply(other)),
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

/// A byte outside the defined vocabulary for the receiving direction.
/// Fatal to the session: the receiver logs it and closes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown event byte {0:#04x}")]
    UnknownEvent(u8),

    #[error("unknown poll reply byte {0:#04x}")]
    UnknownReply(u8),
}

// ─── Tests ────────────────────────────────────────────────────────
