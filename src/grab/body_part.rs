//! Controller-to-body-part assignment

use crate::core::error::{HoldfastError, Result};
use crate::core::types::{BodyPart, ControllerMask};

/// Derive the body part for a handle moving from `previous` to `new` held controllers
///
/// A two-handed grab is led by whichever hand got there first. Both hands in
/// the same instant defaults to right-primary so the outcome is deterministic.
pub fn assign_body_part(previous: ControllerMask, new: ControllerMask) -> Result<BodyPart> {
    match (previous, new) {
        (_, ControllerMask::LEFT) => Ok(BodyPart::LeftHand),
        (_, ControllerMask::RIGHT) => Ok(BodyPart::RightHand),
        (_, ControllerMask::HEAD) => Ok(BodyPart::Head),
        (ControllerMask::LEFT, ControllerMask::BOTH) => Ok(BodyPart::LeftPrimaryRightSecondary),
        (ControllerMask::RIGHT, ControllerMask::BOTH) => Ok(BodyPart::RightPrimaryLeftSecondary),
        (ControllerMask::NONE, ControllerMask::BOTH) => Ok(BodyPart::RightPrimaryLeftSecondary),
        _ => {
            tracing::error!(?previous, ?new, "invalid controller combination for grab handle");
            Err(HoldfastError::InvalidControllerCombination { previous, new })
        }
    }
}
