//! Ownership authority: who may simulate an object, and how that changes hands
//!
//! Each participant runs an [`AuthorityLedger`] that predicts ownership
//! changes locally; the [`AuthorityServer`] sequences the resulting claims and
//! its replies reconcile every ledger to the same record.

pub mod claim;
pub mod ledger;
pub mod messages;
pub mod server;
pub mod state;

pub use claim::{Claim, ClaimKind, ClaimOrder, OwnershipRecord};
pub use ledger::{AuthorityLedger, CollisionContact};
pub use messages::{ClientMessage, Envelope, Recipient, ServerMessage};
pub use server::{AuthorityServer, ServerStats};
pub use state::{AuthorityEvent, GrabState, ObjectAuthority, PendingKind};
