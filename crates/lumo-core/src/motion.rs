//! Motion debounce state machine.
//!
//! Holds the light on while motion keeps arriving and drops it only after
//! a quiet window:
//!
//! - **Edge path**: a rising edge activates an idle monitor or refreshes
//!   an active one. Activation is the only edge that produces output;
//!   repeats inside the window just extend it.
//! - **Tick path**: decay is evaluated once per poll tick, and only while
//!   active. The monitor deactivates when the time since the last edge
//!   exceeds the window strictly, so an edge landing exactly on the
//!   boundary still counts as occupancy.
//! - Raw contact bounce never reaches this machine: the pin driver
//!   coalesces edges closer together than its hardware debounce.
//!
//! Pure and deterministic. All time values are passed in as monotonic
//! milliseconds (no system clock access).

// ─── Monitor ──────────────────────────────────────────────────────

/// Default quiet window before the light drops (milliseconds).
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 5_000;

/// Debounced motion state for a single sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMonitor {
    window_ms: u64,
    active: bool,
    last_motion_ms: u64,
}

/// Decision returned by [`MotionMonitor::record_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDecision {
    /// Idle → active. The caller drives the light on, the indicator off,
    /// and emits a motion-on event.
    Activated,
    /// Already active; the quiet window was extended. No output.
    Refreshed,
}

/// Decision returned by [`MotionMonitor::check_decay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayDecision {
    /// Active → idle. The caller drives the light off, the indicator on,
    /// and emits a motion-off event.
    Deactivated,
    /// Active with the window not yet elapsed. No output.
    StillActive,
    /// The monitor was not active; decay does not apply.
    Idle,
}

impl MotionMonitor {
    /// Create an idle monitor with the given quiet window.
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            active: false,
            last_motion_ms: 0,
        }
    }

    /// Whether motion is currently considered present.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Monotonic timestamp of the most recent rising edge (ms).
    pub fn last_motion_ms(&self) -> u64 {
        self.last_motion_ms
    }

    /// Record a debounced rising edge at `now_ms`.
    ///
    /// The edge timestamp is always taken, so repeated motion keeps
    /// pushing the quiet window forward even while active.
    pub fn record_edge(&mut self, now_ms: u64) -> EdgeDecision {
        self.last_motion_ms = now_ms;
        if self.active {
            EdgeDecision::Refreshed
        } else {
            self.active = true;
            EdgeDecision::Activated
        }
    }

    /// Evaluate decay at `now_ms`. Called once per poll tick.
    ///
    /// Deactivates only when the elapsed quiet time strictly exceeds the
    /// window; elapsed == window is still occupancy. A no-op while idle.
    pub fn check_decay(&mut self, now_ms: u64) -> DecayDecision {
        if !self.active {
            return DecayDecision::Idle;
        }
        let elapsed = now_ms.saturating_sub(self.last_motion_ms);
        if elapsed > self.window_ms {
            self.active = false;
            DecayDecision::Deactivated
        } else {
            DecayDecision::StillActive
        }
    }
}

impl Default for MotionMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW_MS)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
