//! GPIO pin capability.
//!
//! The agent never touches hardware directly; everything goes through
//! [`PinDriver`]. Implementations are synchronous and thread-safe so the
//! async runtime can call them via `spawn_blocking`. Rules:
//!
//! - A pin must be configured before it can be written or subscribed to.
//! - Configuring an output drives it low as part of configuration.
//! - Input edge detection coalesces raw signals: consecutive rising edges
//!   closer together than the configured debounce are delivered as one.
//! - After `release`, every operation fails with [`PinError::Released`] and
//!   open edge subscriptions end (their channels close).

use std::time::Duration;

use tokio::sync::mpsc;

/// Logic level of an output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// A debounced rising edge observed on an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RisingEdge {
    pub pin: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("pin {0} is not configured")]
    NotConfigured(u8),

    #[error("pin {pin} is not configured as {expected}")]
    WrongMode { pin: u8, expected: &'static str },

    #[error("pin {0} already has an edge subscription")]
    AlreadySubscribed(u8),

    #[error("pin driver has been released")]
    Released,

    #[error("pin io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous pin access, implemented by the simulated driver and by
/// whatever backs a real board.
pub trait PinDriver: Send + Sync {
    /// Configure `pin` as an output and drive it low.
    fn configure_output(&self, pin: u8) -> Result<(), PinError>;

    /// Configure `pin` as an input with rising-edge detection. Raw edges
    /// arriving within `debounce` of the previously delivered one are
    /// swallowed by the driver.
    fn configure_input(&self, pin: u8, debounce: Duration) -> Result<(), PinError>;

    /// Drive an output pin to `level`.
    fn set_output(&self, pin: u8, level: PinLevel) -> Result<(), PinError>;

    /// Stream of debounced rising edges for an input pin. At most one
    /// subscription per pin.
    fn subscribe_rising_edges(&self, pin: u8) -> Result<mpsc::Receiver<RisingEdge>, PinError>;

    /// Tear the driver down. Subsequent calls fail with
    /// [`PinError::Released`] and edge subscription channels close.
    fn release(&self) -> Result<(), PinError>;
}
