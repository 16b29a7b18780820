//! Simulated pin driver.
//!
//! Stands in for a real GPIO character device: outputs are plain levels in
//! memory, inputs are pulsed from a [`SimPinsHandle`] (tests, signal
//! handlers). Debounce is enforced here the way edge-triggered hardware
//! does it, measured from the last *delivered* edge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::pins::{PinDriver, PinError, PinLevel, RisingEdge};

/// Debounced edges queued per input pin before older pulses are dropped.
const EDGE_QUEUE_DEPTH: usize = 64;

/// One `set_output` call, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputChange {
    pub pin: u8,
    pub level: PinLevel,
}

/// Outcome of injecting a raw edge on an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseOutcome {
    /// The edge passed the debounce filter and was queued for delivery.
    Delivered,
    /// The edge fell inside the debounce window and was swallowed.
    Suppressed,
}

struct InputState {
    debounce: Duration,
    tx: Option<mpsc::Sender<RisingEdge>>,
    last_delivered: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    outputs: HashMap<u8, PinLevel>,
    inputs: HashMap<u8, InputState>,
    history: Vec<OutputChange>,
    released: bool,
}

/// In-memory [`PinDriver`] implementation.
#[derive(Default)]
pub struct SimPins {
    inner: Arc<Mutex<Inner>>,
}

/// Cloneable view onto a [`SimPins`]: inject edges, inspect outputs.
#[derive(Clone)]
pub struct SimPinsHandle {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Driver side ──────────────────────────────────────────────────────────

impl SimPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SimPinsHandle {
        SimPinsHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl PinDriver for SimPins {
    fn configure_output(&self, pin: u8) -> Result<(), PinError> {
        let mut st = lock(&self.inner);
        if st.released {
            return Err(PinError::Released);
        }
        // Reconfiguring is allowed and resets the pin, like GPIO setup does.
        st.inputs.remove(&pin);
        st.outputs.insert(pin, PinLevel::Low);
        Ok(())
    }

    fn configure_input(&self, pin: u8, debounce: Duration) -> Result<(), PinError> {
        let mut st = lock(&self.inner);
        if st.released {
            return Err(PinError::Released);
        }
        st.outputs.remove(&pin);
        st.inputs.insert(
            pin,
            InputState {
                debounce,
                tx: None,
                last_delivered: None,
            },
        );
        Ok(())
    }

    fn set_output(&self, pin: u8, level: PinLevel) -> Result<(), PinError> {
        let mut st = lock(&self.inner);
        if st.released {
            return Err(PinError::Released);
        }
        if st.inputs.contains_key(&pin) {
            return Err(PinError::WrongMode {
                pin,
                expected: "output",
            });
        }
        match st.outputs.get_mut(&pin) {
            Some(current) => *current = level,
            None => return Err(PinError::NotConfigured(pin)),
        }
        st.history.push(OutputChange { pin, level });
        Ok(())
    }

    fn subscribe_rising_edges(&self, pin: u8) -> Result<mpsc::Receiver<RisingEdge>, PinError> {
        let mut st = lock(&self.inner);
        if st.released {
            return Err(PinError::Released);
        }
        if st.outputs.contains_key(&pin) {
            return Err(PinError::WrongMode {
                pin,
                expected: "input",
            });
        }
        let input = st.inputs.get_mut(&pin).ok_or(PinError::NotConfigured(pin))?;
        if input.tx.is_some() {
            return Err(PinError::AlreadySubscribed(pin));
        }
        let (tx, rx) = mpsc::channel(EDGE_QUEUE_DEPTH);
        input.tx = Some(tx);
        Ok(rx)
    }

    fn release(&self) -> Result<(), PinError> {
        let mut st = lock(&self.inner);
        st.released = true;
        // Dropping the senders closes every edge subscription.
        for input in st.inputs.values_mut() {
            input.tx = None;
        }
        Ok(())
    }
}

// ─── Handle side ──────────────────────────────────────────────────────────

impl SimPinsHandle {
    /// Inject a raw rising edge on `pin`, subject to the debounce filter.
    /// Delivery never blocks; if the queue is full the edge is dropped.
    pub fn pulse(&self, pin: u8) -> Result<PulseOutcome, PinError> {
        let mut st = lock(&self.inner);
        if st.released {
            return Err(PinError::Released);
        }
        if st.outputs.contains_key(&pin) {
            return Err(PinError::WrongMode {
                pin,
                expected: "input",
            });
        }
        let input = st.inputs.get_mut(&pin).ok_or(PinError::NotConfigured(pin))?;
        let now = Instant::now();
        if let Some(last) = input.last_delivered {
            if now.duration_since(last) < input.debounce {
                return Ok(PulseOutcome::Suppressed);
            }
        }
        input.last_delivered = Some(now);
        if let Some(tx) = &input.tx {
            let _ = tx.try_send(RisingEdge { pin });
        }
        Ok(PulseOutcome::Delivered)
    }

    /// Current level of an output pin, if it is configured as one.
    pub fn output_level(&self, pin: u8) -> Option<PinLevel> {
        lock(&self.inner).outputs.get(&pin).copied()
    }

    /// Every `set_output` call so far, in order.
    pub fn output_history(&self) -> Vec<OutputChange> {
        lock(&self.inner).history.clone()
    }

    pub fn is_released(&self) -> bool {
        lock(&self.inner).released
    }
}
