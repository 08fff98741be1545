//! Grab handles: turning controller input into a grab/release lifecycle

pub mod body_part;
pub mod handle;

pub use body_part::assign_body_part;
pub use handle::{GrabAuthority, GrabEvent, GrabHandle, HandleMode};
