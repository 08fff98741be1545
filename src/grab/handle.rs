//! Grab handle lifecycle: which controllers hold an object and how

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::{BodyPart, Controller, ControllerMask, ObjectId, Pose, ServerTime};
use crate::grab::body_part::assign_body_part;

/// Authority seam the handle asks before it may hold an object
pub trait GrabAuthority {
    /// Returns false when the grab is refused
    fn request_grab(&mut self, object: ObjectId, now: ServerTime) -> Result<bool>;

    fn request_release(&mut self, object: ObjectId, now: ServerTime) -> Result<()>;
}

/// Which side of the grab moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleMode {
    /// Stores the object's pose relative to the grabbing transform
    ObjectFollowsHand,
    /// Stores the grabbing transform's pose relative to the object
    HandFollowsObject,
}

impl HandleMode {
    fn capture(self, grabber: &Pose, object: &Pose) -> Pose {
        match self {
            HandleMode::ObjectFollowsHand => object.relative_to(grabber),
            HandleMode::HandFollowsObject => grabber.relative_to(object),
        }
    }
}

/// Events for the input and animation collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrabEvent {
    GrabStarted { object: ObjectId, body_part: BodyPart },
    /// A controller joined an existing grab
    SecondGrabStarted { object: ObjectId, body_part: BodyPart },
    GrabEnded { object: ObjectId },
    /// A controller let go while another still holds; `body_part` is what remains
    SecondGrabEnded { object: ObjectId, body_part: BodyPart },
    TriggerDown { object: ObjectId, controller: Controller },
    TriggerHeld { object: ObjectId, controller: Controller },
    TriggerUp { object: ObjectId, controller: Controller },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrabHandle {
    object: ObjectId,
    mode: HandleMode,
    held: ControllerMask,
    body_part: Option<BodyPart>,
    relative_pose: Option<Pose>,
    triggers: ControllerMask,
}

impl GrabHandle {
    pub fn new(object: ObjectId, mode: HandleMode) -> Self {
        Self {
            object,
            mode,
            held: ControllerMask::NONE,
            body_part: None,
            relative_pose: None,
            triggers: ControllerMask::NONE,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    pub fn held(&self) -> ControllerMask {
        self.held
    }

    pub fn body_part(&self) -> Option<BodyPart> {
        self.body_part
    }

    pub fn relative_pose(&self) -> Option<Pose> {
        self.relative_pose
    }

    pub fn is_idle(&self) -> bool {
        self.held.is_empty()
    }

    /// Start holding with one controller
    ///
    /// Returns false, with no state change, when authority refuses the grab.
    pub fn begin_hold(
        &mut self,
        controller: Controller,
        grabber: &Pose,
        object_pose: &Pose,
        authority: &mut dyn GrabAuthority,
        now: ServerTime,
        events: &mut Vec<GrabEvent>,
    ) -> Result<bool> {
        self.begin_hold_mask(controller.mask(), grabber, object_pose, authority, now, events)
    }

    /// Start holding with every controller in `controllers` in the same instant
    pub fn begin_hold_mask(
        &mut self,
        controllers: ControllerMask,
        grabber: &Pose,
        object_pose: &Pose,
        authority: &mut dyn GrabAuthority,
        now: ServerTime,
        events: &mut Vec<GrabEvent>,
    ) -> Result<bool> {
        let previous = self.held;
        let next = previous.union(controllers);
        if next == previous {
            return Ok(true);
        }

        let body_part = assign_body_part(previous, next)?;
        if !authority.request_grab(self.object, now)? {
            tracing::debug!(object = ?self.object, ?controllers, "grab refused by authority");
            return Ok(false);
        }

        self.held = next;
        self.body_part = Some(body_part);
        if previous.is_empty() {
            self.relative_pose = Some(self.mode.capture(grabber, object_pose));
            events.push(GrabEvent::GrabStarted {
                object: self.object,
                body_part,
            });
        } else {
            events.push(GrabEvent::SecondGrabStarted {
                object: self.object,
                body_part,
            });
        }
        Ok(true)
    }

    /// Let go with one controller; releasing the last one asks authority to release
    pub fn end_hold(
        &mut self,
        controller: Controller,
        authority: &mut dyn GrabAuthority,
        now: ServerTime,
        events: &mut Vec<GrabEvent>,
    ) -> Result<()> {
        if !self.held.contains(controller) {
            return Ok(());
        }

        let previous = self.held;
        let next = previous.without(controller);
        self.lift_trigger(controller, events);

        if next.is_empty() {
            self.reset();
            authority.request_release(self.object, now)?;
            events.push(GrabEvent::GrabEnded {
                object: self.object,
            });
        } else {
            let body_part = assign_body_part(previous, next)?;
            self.held = next;
            self.body_part = Some(body_part);
            events.push(GrabEvent::SecondGrabEnded {
                object: self.object,
                body_part,
            });
        }
        Ok(())
    }

    /// Drop the grab without asking authority, after authority already took it away
    pub fn abandon(&mut self, events: &mut Vec<GrabEvent>) {
        if self.is_idle() {
            return;
        }
        for controller in self.held.controllers() {
            self.lift_trigger(controller, events);
        }
        self.reset();
        events.push(GrabEvent::GrabEnded {
            object: self.object,
        });
    }

    /// Per-tick trigger input for a controller
    pub fn update_trigger(
        &mut self,
        controller: Controller,
        down: bool,
        events: &mut Vec<GrabEvent>,
    ) {
        if !self.held.contains(controller) {
            return;
        }

        let was_down = self.triggers.contains(controller);
        if down {
            if !was_down {
                self.triggers = self.triggers.with(controller);
                events.push(GrabEvent::TriggerDown {
                    object: self.object,
                    controller,
                });
            }
            events.push(GrabEvent::TriggerHeld {
                object: self.object,
                controller,
            });
        } else {
            self.lift_trigger(controller, events);
        }
    }

    /// Recapture the relative pose while held; false when idle
    pub fn reorient(&mut self, grabber: &Pose, object_pose: &Pose) -> bool {
        if self.is_idle() {
            return false;
        }
        self.relative_pose = Some(self.mode.capture(grabber, object_pose));
        true
    }

    /// Pose of the following side given the pose of the side being followed
    ///
    /// For `ObjectFollowsHand` the anchor is the grabber and the result is the
    /// object; for `HandFollowsObject` it is the other way round.
    pub fn follow_pose(&self, anchor: &Pose) -> Option<Pose> {
        self.relative_pose.map(|local| anchor.compose(&local))
    }

    fn lift_trigger(&mut self, controller: Controller, events: &mut Vec<GrabEvent>) {
        if self.triggers.contains(controller) {
            self.triggers = self.triggers.without(controller);
            events.push(GrabEvent::TriggerUp {
                object: self.object,
                controller,
            });
        }
    }

    fn reset(&mut self) {
        self.held = ControllerMask::NONE;
        self.body_part = None;
        self.relative_pose = None;
        self.triggers = ControllerMask::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    /// Authority stub that grants or refuses everything and counts releases
    struct StubAuthority {
        grant: bool,
        grabs: u32,
        releases: u32,
    }

    impl StubAuthority {
        fn granting() -> Self {
            Self {
                grant: true,
                grabs: 0,
                releases: 0,
            }
        }
    }

    impl GrabAuthority for StubAuthority {
        fn request_grab(&mut self, _object: ObjectId, _now: ServerTime) -> Result<bool> {
            self.grabs += 1;
            Ok(self.grant)
        }

        fn request_release(&mut self, _object: ObjectId, _now: ServerTime) -> Result<()> {
            self.releases += 1;
            Ok(())
        }
    }

    fn hand() -> Pose {
        Pose::new(Vec3::new(0.0, 1.0, 0.0), Quat::from_rotation_z(0.5))
    }

    fn body() -> Pose {
        Pose::from_position(Vec3::new(0.2, 1.1, 0.3))
    }

    #[test]
    fn test_left_then_right_is_left_primary() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();

        handle
            .begin_hold(Controller::Left, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();
        handle
            .begin_hold(Controller::Right, &hand(), &body(), &mut auth, ServerTime(2), &mut events)
            .unwrap();

        assert_eq!(handle.held(), ControllerMask::BOTH);
        assert_eq!(handle.body_part(), Some(BodyPart::LeftPrimaryRightSecondary));
        assert_eq!(
            events,
            vec![
                GrabEvent::GrabStarted {
                    object: ObjectId(1),
                    body_part: BodyPart::LeftHand
                },
                GrabEvent::SecondGrabStarted {
                    object: ObjectId(1),
                    body_part: BodyPart::LeftPrimaryRightSecondary
                },
            ]
        );
    }

    #[test]
    fn test_simultaneous_grab_is_right_primary() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();

        handle
            .begin_hold_mask(
                ControllerMask::BOTH,
                &hand(),
                &body(),
                &mut auth,
                ServerTime(1),
                &mut events,
            )
            .unwrap();

        assert_eq!(handle.body_part(), Some(BodyPart::RightPrimaryLeftSecondary));
        assert_eq!(auth.grabs, 1);
    }

    #[test]
    fn test_refused_grab_leaves_handle_idle() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority {
            grant: false,
            grabs: 0,
            releases: 0,
        };
        let mut events = Vec::new();

        let held = handle
            .begin_hold(Controller::Right, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();

        assert!(!held);
        assert!(handle.is_idle());
        assert!(handle.body_part().is_none());
        assert!(events.is_empty());
    }

    #[test]
    fn test_release_sequence() {
        let mut handle = GrabHandle::new(ObjectId(4), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();
        handle
            .begin_hold_mask(ControllerMask::BOTH, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();
        events.clear();

        handle
            .end_hold(Controller::Right, &mut auth, ServerTime(2), &mut events)
            .unwrap();
        assert_eq!(handle.body_part(), Some(BodyPart::LeftHand));
        assert_eq!(auth.releases, 0);

        handle
            .end_hold(Controller::Left, &mut auth, ServerTime(3), &mut events)
            .unwrap();
        assert!(handle.is_idle());
        assert_eq!(auth.releases, 1);
        assert_eq!(
            events,
            vec![
                GrabEvent::SecondGrabEnded {
                    object: ObjectId(4),
                    body_part: BodyPart::LeftHand
                },
                GrabEvent::GrabEnded { object: ObjectId(4) },
            ]
        );
    }

    #[test]
    fn test_trigger_edges() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();

        // Not held yet: ignored
        handle.update_trigger(Controller::Left, true, &mut events);
        assert!(events.is_empty());

        handle
            .begin_hold(Controller::Left, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();
        events.clear();

        handle.update_trigger(Controller::Left, true, &mut events);
        handle.update_trigger(Controller::Left, true, &mut events);
        handle.update_trigger(Controller::Left, false, &mut events);

        let object = ObjectId(1);
        let controller = Controller::Left;
        assert_eq!(
            events,
            vec![
                GrabEvent::TriggerDown { object, controller },
                GrabEvent::TriggerHeld { object, controller },
                GrabEvent::TriggerHeld { object, controller },
                GrabEvent::TriggerUp { object, controller },
            ]
        );
    }

    #[test]
    fn test_releasing_with_trigger_down_lifts_it() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();
        handle
            .begin_hold(Controller::Right, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();
        handle.update_trigger(Controller::Right, true, &mut events);
        events.clear();

        handle
            .end_hold(Controller::Right, &mut auth, ServerTime(2), &mut events)
            .unwrap();
        assert_eq!(
            events[0],
            GrabEvent::TriggerUp {
                object: ObjectId(1),
                controller: Controller::Right
            }
        );
    }

    #[test]
    fn test_head_and_hand_together_fails_loudly() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::HandFollowsObject);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();
        handle
            .begin_hold(Controller::Head, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();

        let result =
            handle.begin_hold(Controller::Left, &hand(), &body(), &mut auth, ServerTime(2), &mut events);
        assert!(result.is_err());
        assert_eq!(handle.held(), ControllerMask::HEAD);
    }

    #[test]
    fn test_follow_pose_modes() {
        let grabber = hand();
        let object = body();

        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();

        let mut follows_hand = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        follows_hand
            .begin_hold(Controller::Left, &grabber, &object, &mut auth, ServerTime(1), &mut events)
            .unwrap();
        let placed = follows_hand.follow_pose(&grabber).unwrap();
        assert!(placed.approx_eq(&object, 1e-4));

        let mut follows_object = GrabHandle::new(ObjectId(2), HandleMode::HandFollowsObject);
        follows_object
            .begin_hold(Controller::Left, &grabber, &object, &mut auth, ServerTime(1), &mut events)
            .unwrap();
        let placed = follows_object.follow_pose(&object).unwrap();
        assert!(placed.approx_eq(&grabber, 1e-4));
    }

    #[test]
    fn test_abandon_clears_without_release_request() {
        let mut handle = GrabHandle::new(ObjectId(1), HandleMode::ObjectFollowsHand);
        let mut auth = StubAuthority::granting();
        let mut events = Vec::new();
        handle
            .begin_hold(Controller::Left, &hand(), &body(), &mut auth, ServerTime(1), &mut events)
            .unwrap();

        handle.abandon(&mut events);
        assert!(handle.is_idle());
        assert_eq!(auth.releases, 0);
        assert!(handle.follow_pose(&hand()).is_none());
    }
}
