//! Entry point assignment for participants joining a session

pub mod arbiter;

pub use arbiter::{SpawnArbiter, SpawnPoint};
