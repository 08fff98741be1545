//! Holdfast - ownership arbitration and grab handling for shared physics objects

pub mod arbiter;
pub mod authority;
pub mod core;
pub mod grab;
pub mod session;
pub mod sim;
pub mod spawn;
