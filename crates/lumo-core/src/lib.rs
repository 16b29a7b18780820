//! lumo-core: session protocol and motion debounce state machine.
//! Pure logic shared by the edge agent and the bridge service.
//! No IO, no clocks; callers supply monotonic timestamps.

pub mod motion;
pub mod protocol;

pub use motion::{DEFAULT_DEBOUNCE_WINDOW_MS, DecayDecision, EdgeDecision, MotionMonitor};
pub use protocol::{Event, PollReply, ProtocolError};
