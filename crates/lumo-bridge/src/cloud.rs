//! Cloud capability.
//!
//! The reactor publishes light transitions to one channel and polls
//! another for the shutdown signal. Implementations are synchronous and
//! thread-safe; the async side calls them through `spawn_blocking`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("cloud io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpretation of a control channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Keep the session going.
    Run,
    /// Stop the edge agent and the bridge.
    Shutdown,
}

impl ControlSignal {
    /// `"0"` and `"off"` (any ASCII case, surrounding whitespace ignored)
    /// mean shutdown; everything else keeps running.
    pub fn from_raw(raw: &str) -> Self {
        let value = raw.trim();
        if value == "0" || value.eq_ignore_ascii_case("off") {
            ControlSignal::Shutdown
        } else {
            ControlSignal::Run
        }
    }
}

/// Synchronous cloud access.
pub trait CloudPort: Send + Sync {
    /// Publish `value` to `channel`, creating the channel if needed.
    fn publish(&self, channel: &str, value: &str) -> Result<(), CloudError>;

    /// Latest value of `channel`.
    fn fetch(&self, channel: &str) -> Result<String, CloudError>;
}

/// One published value with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub channel: String,
    pub value: String,
    pub at: DateTime<Utc>,
}

/// In-memory [`CloudPort`]: latest value per channel plus the full
/// publish log. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<CloudState>>,
}

#[derive(Default)]
struct CloudState {
    channels: HashMap<String, String>,
    records: Vec<PublishRecord>,
}

fn lock(inner: &Mutex<CloudState>) -> MutexGuard<'_, CloudState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, channel: &str, value: &str) -> Result<(), CloudError> {
        let mut st = lock(&self.inner);
        st.channels.insert(channel.to_string(), value.to_string());
        st.records.push(PublishRecord {
            channel: channel.to_string(),
            value: value.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn fetch(&self, channel: &str) -> Result<String, CloudError> {
        lock(&self.inner)
            .channels
            .get(channel)
            .cloned()
            .ok_or_else(|| CloudError::UnknownChannel(channel.to_string()))
    }

    /// Latest value of `channel`, if it exists.
    pub fn latest(&self, channel: &str) -> Option<String> {
        lock(&self.inner).channels.get(channel).cloned()
    }

    /// Every publish so far, in order.
    pub fn records(&self) -> Vec<PublishRecord> {
        lock(&self.inner).records.clone()
    }
}

impl CloudPort for MemoryCloud {
    fn publish(&self, channel: &str, value: &str) -> Result<(), CloudError> {
        MemoryCloud::publish(self, channel, value)
    }

    fn fetch(&self, channel: &str) -> Result<String, CloudError> {
        MemoryCloud::fetch(self, channel)
    }
}
