//! Core type definitions used throughout the codebase

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a networked object, unique across the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

/// Identifier for a session participant
///
/// Ordered: on equal claim timestamps the lower id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

/// Identifier for a registered spawn point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpawnPointId(pub u32);

/// Reading of the shared server clock in milliseconds
///
/// Only compared, never treated as wall-clock time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ServerTime(pub u64);

impl ServerTime {
    pub const ZERO: ServerTime = ServerTime(0);

    pub fn plus_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn millis_since(self, earlier: ServerTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Identifier for an in-flight authority request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// A tracked input device that can hold a grab handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Controller {
    Left,
    Right,
    /// Non-hand grabs (e.g. carrying on the head)
    Head,
}

impl Controller {
    pub const ALL: [Controller; 3] = [Controller::Left, Controller::Right, Controller::Head];

    pub fn mask(self) -> ControllerMask {
        match self {
            Controller::Left => ControllerMask::LEFT,
            Controller::Right => ControllerMask::RIGHT,
            Controller::Head => ControllerMask::HEAD,
        }
    }
}

/// Fixed-width set of controllers, one bit per controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerMask(u8);

impl ControllerMask {
    pub const NONE: ControllerMask = ControllerMask(0);
    pub const LEFT: ControllerMask = ControllerMask(0b001);
    pub const RIGHT: ControllerMask = ControllerMask(0b010);
    pub const BOTH: ControllerMask = ControllerMask(0b011);
    pub const HEAD: ControllerMask = ControllerMask(0b100);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, controller: Controller) -> bool {
        self.0 & controller.mask().0 != 0
    }

    pub fn with(self, controller: Controller) -> Self {
        Self(self.0 | controller.mask().0)
    }

    pub fn without(self, controller: Controller) -> Self {
        Self(self.0 & !controller.mask().0)
    }

    pub fn union(self, other: ControllerMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn controllers(self) -> impl Iterator<Item = Controller> {
        Controller::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

/// Semantic assignment of the controller(s) holding a grab handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    LeftHand,
    RightHand,
    Head,
    /// Left grabbed first, right joined
    LeftPrimaryRightSecondary,
    /// Right grabbed first (or both at once), left joined
    RightPrimaryLeftSecondary,
}

/// Position and rotation of a transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Express this pose in the local frame of `parent`
    pub fn relative_to(&self, parent: &Pose) -> Pose {
        let inv = parent.rotation.inverse();
        Pose {
            position: inv * (self.position - parent.position),
            rotation: (inv * self.rotation).normalize(),
        }
    }

    /// Place a pose given in this pose's local frame into world space
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.position + self.rotation * local.position,
            rotation: (self.rotation * local.rotation).normalize(),
        }
    }

    pub fn approx_eq(&self, other: &Pose, epsilon: f32) -> bool {
        self.position.abs_diff_eq(other.position, epsilon)
            && (self.rotation.dot(other.rotation).abs() - 1.0).abs() <= epsilon
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Closed set of capabilities that can be attached to a networked object
///
/// Also the claimant identity used by arbitration slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityKind {
    Grab,
    Physics,
    CollisionType,
    Kinematic,
}

impl CapabilityKind {
    pub const COUNT: usize = 4;
    pub const ALL: [CapabilityKind; Self::COUNT] = [
        CapabilityKind::Grab,
        CapabilityKind::Physics,
        CapabilityKind::CollisionType,
        CapabilityKind::Kinematic,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Render/physics layer index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layer(pub u8);

impl Layer {
    pub const DEFAULT: Layer = Layer(0);
    pub const WALKABLE: Layer = Layer(8);
    pub const GRABBED: Layer = Layer(9);
}

/// Object tag used by collaborators for classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(pub String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn untagged() -> Self {
        Self::new("Untagged")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_ordering() {
        assert!(ParticipantId(3) < ParticipantId(7));
        assert!(ServerTime(100) < ServerTime(101));
    }

    #[test]
    fn test_controller_mask_bits() {
        let mask = ControllerMask::NONE.with(Controller::Left);
        assert_eq!(mask, ControllerMask::LEFT);

        let both = mask.with(Controller::Right);
        assert_eq!(both, ControllerMask::BOTH);
        assert_eq!(both.count(), 2);
        assert!(both.contains(Controller::Left));
        assert!(!both.contains(Controller::Head));

        assert_eq!(both.without(Controller::Left), ControllerMask::RIGHT);
        assert!(both.without(Controller::Left).without(Controller::Right).is_empty());
    }

    #[test]
    fn test_controllers_iterates_held_bits() {
        let held: Vec<_> = ControllerMask::BOTH.controllers().collect();
        assert_eq!(held, vec![Controller::Left, Controller::Right]);
    }

    #[test]
    fn test_pose_relative_round_trip() {
        let parent = Pose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        );
        let child = Pose::new(Vec3::new(4.0, 0.5, -2.0), Quat::from_rotation_x(0.3));

        let local = child.relative_to(&parent);
        let back = parent.compose(&local);
        assert!(back.approx_eq(&child, 1e-4));
    }

    #[test]
    fn test_server_time_arithmetic() {
        let t = ServerTime(1_000);
        assert_eq!(t.plus_millis(250), ServerTime(1_250));
        assert_eq!(ServerTime(1_250).millis_since(t), 250);
        assert_eq!(t.millis_since(ServerTime(2_000)), 0);
    }
}
