//! Default controller actions: grab, hand pose, haptics and quit, bound
//! for the KHR simple controller on both hands.

use crate::error::{XrError, XrResult, invoke};
use crate::vr::{
    ActionCreateInfo, ActionHandle, ActionSetHandle, ActionType, InstanceHandle, PathHandle,
    Pose, SessionHandle, SpaceHandle, SpaceLocation, SuggestedBinding, XrRuntime, XrTime,
};

pub const ACTION_SET_NAME: &str = "gameplay";
pub const ACTION_SET_LOCALIZED_NAME: &str = "Gameplay";
pub const SIMPLE_CONTROLLER_PROFILE: &str = "/interaction_profiles/khr/simple_controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Hand::Left => "/user/hand/left",
            Hand::Right => "/user/hand/right",
        }
    }
}

struct ActionSpec {
    name: &'static str,
    localized_name: &'static str,
    action_type: ActionType,
    component: &'static str,
}

const GRAB: ActionSpec = ActionSpec {
    name: "grab_object",
    localized_name: "Grab Object",
    action_type: ActionType::FloatInput,
    component: "input/select/click",
};
const POSE: ActionSpec = ActionSpec {
    name: "hand_pose",
    localized_name: "Hand Pose",
    action_type: ActionType::PoseInput,
    component: "input/grip/pose",
};
const VIBRATE: ActionSpec = ActionSpec {
    name: "vibrate_hand",
    localized_name: "Vibrate Hand",
    action_type: ActionType::VibrationOutput,
    component: "output/haptic",
};
const QUIT: ActionSpec = ActionSpec {
    name: "quit_session",
    localized_name: "Quit Session",
    action_type: ActionType::BooleanInput,
    component: "input/menu/click",
};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandSample {
    pub grab: f32,
    pub grab_active: bool,
    pub location: SpaceLocation,
}

/// Controller state read after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    pub hands: [HandSample; 2],
    pub quit_requested: bool,
}

impl InputSample {
    pub fn hand(&self, hand: Hand) -> &HandSample {
        &self.hands[hand.index()]
    }
}

#[derive(Debug)]
pub struct InputBindings {
    action_set: ActionSetHandle,
    hand_paths: [PathHandle; 2],
    grab_action: ActionHandle,
    pose_action: ActionHandle,
    vibrate_action: ActionHandle,
    quit_action: ActionHandle,
    hand_spaces: [SpaceHandle; 2],
}

impl InputBindings {
    /// Creates the action set, actions, bindings and hand spaces, and
    /// attaches the set to `session`. Nothing is left behind on failure.
    pub fn setup<R>(
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
    ) -> XrResult<Self>
    where
        R: XrRuntime + ?Sized,
    {
        let action_set = invoke(
            runtime,
            instance,
            "xrCreateActionSet",
            XrError::Creation,
            |rt| rt.create_action_set(instance, ACTION_SET_NAME, ACTION_SET_LOCALIZED_NAME, 0),
        )?;

        let mut hand_spaces = Vec::with_capacity(Hand::ALL.len());
        match Self::populate(runtime, instance, session, action_set, &mut hand_spaces) {
            Ok(bindings) => {
                log::info!(
                    "[input] action set '{ACTION_SET_NAME}' attached with {} hand space(s)",
                    hand_spaces.len()
                );
                Ok(bindings)
            }
            Err(err) => {
                for space in hand_spaces {
                    if let Err(fault) = runtime.destroy_space(space) {
                        log::warn!("[input] hand space cleanup failed: {fault}");
                    }
                }
                if let Err(fault) = runtime.destroy_action_set(action_set) {
                    log::warn!("[input] action set cleanup failed: {fault}");
                }
                Err(err)
            }
        }
    }

    fn populate<R>(
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
        action_set: ActionSetHandle,
        hand_spaces: &mut Vec<SpaceHandle>,
    ) -> XrResult<Self>
    where
        R: XrRuntime + ?Sized,
    {
        let path = |runtime: &mut R, text: &str| {
            invoke(runtime, instance, "xrStringToPath", XrError::Creation, |rt| {
                rt.string_to_path(instance, text)
            })
        };

        let hand_paths = [
            path(runtime, Hand::Left.path())?,
            path(runtime, Hand::Right.path())?,
        ];

        let create = |runtime: &mut R, spec: &ActionSpec| {
            let info = ActionCreateInfo {
                name: spec.name,
                localized_name: spec.localized_name,
                action_type: spec.action_type,
                subaction_paths: &hand_paths,
            };
            invoke(runtime, instance, "xrCreateAction", XrError::Creation, |rt| {
                rt.create_action(action_set, &info)
            })
        };
        let grab_action = create(runtime, &GRAB)?;
        let pose_action = create(runtime, &POSE)?;
        let vibrate_action = create(runtime, &VIBRATE)?;
        let quit_action = create(runtime, &QUIT)?;

        let mut bindings = Vec::with_capacity(8);
        for (action, spec) in [
            (grab_action, &GRAB),
            (pose_action, &POSE),
            (quit_action, &QUIT),
            (vibrate_action, &VIBRATE),
        ] {
            for hand in Hand::ALL {
                let binding = path(runtime, format!("{}/{}", hand.path(), spec.component).as_str())?;
                bindings.push(SuggestedBinding { action, binding });
            }
        }
        let profile = path(runtime, SIMPLE_CONTROLLER_PROFILE)?;
        invoke(
            runtime,
            instance,
            "xrSuggestInteractionProfileBindings",
            XrError::Creation,
            |rt| rt.suggest_interaction_profile_bindings(instance, profile, &bindings),
        )?;

        for hand_path in hand_paths {
            let space = invoke(
                runtime,
                instance,
                "xrCreateActionSpace",
                XrError::Creation,
                |rt| rt.create_action_space(session, pose_action, hand_path, Pose::IDENTITY),
            )?;
            hand_spaces.push(space);
        }

        invoke(
            runtime,
            instance,
            "xrAttachSessionActionSets",
            XrError::Creation,
            |rt| rt.attach_action_sets(session, &[action_set]),
        )?;

        Ok(Self {
            action_set,
            hand_paths,
            grab_action,
            pose_action,
            vibrate_action,
            quit_action,
            hand_spaces: [hand_spaces[0], hand_spaces[1]],
        })
    }

    pub fn action_set(&self) -> ActionSetHandle {
        self.action_set
    }

    pub fn hand_space(&self, hand: Hand) -> SpaceHandle {
        self.hand_spaces[hand.index()]
    }

    pub fn hand_path(&self, hand: Hand) -> PathHandle {
        self.hand_paths[hand.index()]
    }

    pub fn pose_action(&self) -> ActionHandle {
        self.pose_action
    }

    pub fn vibrate_action(&self) -> ActionHandle {
        self.vibrate_action
    }

    /// Syncs the action set with the runtime's current controller state.
    pub fn sync<R>(
        &self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
    ) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        let action_set = self.action_set;
        invoke(runtime, instance, "xrSyncActions", XrError::Sync, |rt| {
            rt.sync_actions(session, action_set)
        })
    }

    /// Reads grab values, quit state and hand locations relative to
    /// `base_space` at `time`.
    pub fn sample<R>(
        &self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
        base_space: SpaceHandle,
        time: XrTime,
    ) -> XrResult<InputSample>
    where
        R: XrRuntime + ?Sized,
    {
        let mut sample = InputSample::default();
        for hand in Hand::ALL {
            let path = self.hand_path(hand);
            let grab = invoke(runtime, instance, "xrGetActionStateFloat", XrError::Sync, |rt| {
                rt.action_state_float(session, self.grab_action, path)
            })?;
            let quit = invoke(
                runtime,
                instance,
                "xrGetActionStateBoolean",
                XrError::Sync,
                |rt| rt.action_state_boolean(session, self.quit_action, path),
            )?;
            let space = self.hand_space(hand);
            let location = invoke(runtime, instance, "xrLocateSpace", XrError::Sync, |rt| {
                rt.locate_space(space, base_space, time)
            })?;

            sample.hands[hand.index()] = HandSample {
                grab: grab.current_state,
                grab_active: grab.is_active,
                location,
            };
            sample.quit_requested |= quit.is_active && quit.current_state;
        }
        Ok(sample)
    }

    /// Destroys both hand spaces; returns the first failure.
    pub fn destroy_spaces<R>(&mut self, runtime: &mut R, instance: InstanceHandle) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        let mut first_error = None;
        for space in &mut self.hand_spaces {
            if space.is_null() {
                continue;
            }
            let handle = std::mem::replace(space, SpaceHandle::NULL);
            if let Err(err) = invoke(runtime, instance, "xrDestroySpace", XrError::Destroy, |rt| {
                rt.destroy_space(handle)
            }) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn destroy_action_set<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
    ) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        if self.action_set.is_null() {
            return Ok(());
        }
        let action_set = std::mem::replace(&mut self.action_set, ActionSetHandle::NULL);
        invoke(
            runtime,
            instance,
            "xrDestroyActionSet",
            XrError::Destroy,
            |rt| rt.destroy_action_set(action_set),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::simulated::RuntimeCall;
    use crate::vr::{SimulatedRuntime, ViewConfigurationType, result_codes};

    fn session(runtime: &mut SimulatedRuntime) -> (InstanceHandle, SessionHandle) {
        let instance = runtime.create_instance("input-test", &[]).expect("instance");
        let system = runtime.system(instance).expect("system");
        let session = runtime.create_session(instance, system).expect("session");
        (instance, session)
    }

    #[test]
    fn setup_creates_default_actions() {
        let mut runtime = SimulatedRuntime::default();
        let (instance, session) = session(&mut runtime);

        let bindings = InputBindings::setup(&mut runtime, instance, session).expect("setup");

        assert_eq!(runtime.call_count(RuntimeCall::CreateActionSet), 1);
        assert_eq!(runtime.call_count(RuntimeCall::CreateAction), 4);
        assert_eq!(runtime.call_count(RuntimeCall::SuggestBindings), 1);
        assert_eq!(runtime.call_count(RuntimeCall::CreateActionSpace), 2);
        assert_eq!(runtime.call_count(RuntimeCall::AttachActionSets), 1);
        assert_ne!(bindings.hand_space(Hand::Left), bindings.hand_space(Hand::Right));
        assert_eq!(runtime.live_spaces(), 2);
    }

    #[test]
    fn failed_setup_releases_partial_resources() {
        let mut runtime = SimulatedRuntime::default();
        let (instance, session) = session(&mut runtime);
        runtime.fail_next(RuntimeCall::AttachActionSets, result_codes::ERROR_RUNTIME_FAILURE);

        let err = InputBindings::setup(&mut runtime, instance, session).unwrap_err();

        assert!(matches!(err, XrError::Creation(_)));
        assert_eq!(runtime.live_spaces(), 0);
        assert_eq!(runtime.call_count(RuntimeCall::DestroyActionSet), 1);
    }

    #[test]
    fn sync_before_begin_is_sync_error() {
        let mut runtime = SimulatedRuntime::default();
        let (instance, session) = session(&mut runtime);
        let bindings = InputBindings::setup(&mut runtime, instance, session).expect("setup");

        let err = bindings.sync(&mut runtime, instance, session).unwrap_err();
        assert!(matches!(err, XrError::Sync(_)));
        assert_eq!(err.code(), result_codes::ERROR_SESSION_NOT_RUNNING);
    }

    #[test]
    fn sample_reads_grab_quit_and_hand_poses() {
        let mut runtime = SimulatedRuntime::default();
        let (instance, session) = session(&mut runtime);
        let bindings = InputBindings::setup(&mut runtime, instance, session).expect("setup");
        runtime
            .begin_session(session, ViewConfigurationType::PrimaryStereo)
            .expect("begin");
        let stage = runtime
            .create_reference_space(session, crate::vr::ReferenceSpaceType::Stage, Pose::IDENTITY)
            .expect("stage");
        runtime.set_action_value("grab_object", 0.75);
        runtime.set_action_value("quit_session", 1.0);

        bindings.sync(&mut runtime, instance, session).expect("sync");
        let sample = bindings
            .sample(&mut runtime, instance, session, stage, XrTime::from_nanos(1))
            .expect("sample");

        assert_eq!(sample.hand(Hand::Left).grab, 0.75);
        assert!(sample.hand(Hand::Right).grab_active);
        assert!(sample.quit_requested);
        assert!(sample.hand(Hand::Left).location.pose.position.x < 0.0);
        assert!(sample.hand(Hand::Right).location.pose.position.x > 0.0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut runtime = SimulatedRuntime::default();
        let (instance, session) = session(&mut runtime);
        let mut bindings = InputBindings::setup(&mut runtime, instance, session).expect("setup");

        bindings.destroy_spaces(&mut runtime, instance).expect("spaces");
        bindings.destroy_spaces(&mut runtime, instance).expect("spaces again");
        bindings
            .destroy_action_set(&mut runtime, instance)
            .expect("set");
        bindings
            .destroy_action_set(&mut runtime, instance)
            .expect("set again");

        assert_eq!(runtime.call_count(RuntimeCall::DestroySpace), 2);
        assert_eq!(runtime.call_count(RuntimeCall::DestroyActionSet), 1);
    }
}
