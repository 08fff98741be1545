//! Loopback simulation of a whole session: participants, server and network

pub mod harness;
pub mod network;

pub use harness::{SimConfig, SimHarness, SimReport, Violation};
pub use network::SimNetwork;
