use crate::authority::{ClientMessage, ServerMessage};
use crate::core::types::ParticipantId;

/// Reliable, ordered message delivery between participants and the server
///
/// Implementations must preserve order per participant stream in both
/// directions. Delivery latency is up to the implementation.
pub trait Transport {
    fn send(&mut self, from: ParticipantId, message: ClientMessage);

    /// Messages that have arrived for `participant` since the last poll
    fn poll(&mut self, participant: ParticipantId) -> Vec<ServerMessage>;
}
