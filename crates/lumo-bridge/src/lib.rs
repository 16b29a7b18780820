//! Bridge side of the motion-to-light pipeline.
//!
//! Accepts one edge session over TCP, mirrors light transitions into the
//! cloud, and answers poll ticks from a cloud control channel.

pub mod cloud;
pub mod config;
pub mod error;
pub mod server;

pub use cloud::{CloudError, CloudPort, ControlSignal, MemoryCloud, PublishRecord};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use server::{BridgeEnd, BridgeServer};
