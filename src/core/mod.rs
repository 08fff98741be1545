pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{ManualClock, ServerClock};
pub use config::SessionConfig;
pub use error::{HoldfastError, Result};
