//! Edge agent error types.

use lumo_core::ProtocolError;
use thiserror::Error;

use crate::pins::PinError;

/// Failures that end a bridge session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to bridge at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("no poll reply from bridge within {timeout_ms} ms")]
    ReplyTimeout { timeout_ms: u64 },

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("motion event channel closed")]
    EventChannelClosed,
}

/// Top-level edge agent failure.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("pin setup failed: {0}")]
    Pin(#[from] PinError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
