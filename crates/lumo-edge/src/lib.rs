//! Edge side of the motion-to-light pipeline.
//!
//! Watches a motion sensor pin, debounces raw edges into activity
//! windows, drives the light and indicator outputs, and reports
//! transitions to the bridge over a single-byte TCP session.

pub mod agent;
pub mod config;
pub mod error;
pub mod pins;
pub mod sim;

pub use agent::{EdgeAgent, SessionEnd};
pub use config::EdgeConfig;
pub use error::{EdgeError, SessionError};
pub use pins::{PinDriver, PinError, PinLevel, RisingEdge};
pub use sim::{OutputChange, PulseOutcome, SimPins, SimPinsHandle};
