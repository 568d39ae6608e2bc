//! The XR runtime surface consumed by the session core.
//!
//! Everything the core needs from the runtime goes through [`XrRuntime`], a
//! synchronous call/result interface. Handles are opaque `u64` values; the
//! backend owns whatever the handles refer to.

#[cfg(feature = "vr-openxr")]
pub mod openxr;
pub mod simulated;

use std::fmt;

#[cfg(feature = "vr-openxr")]
pub use self::openxr::OpenXrRuntime;
pub use simulated::SimulatedRuntime;

/// Raw runtime result code (`XrResult`).
pub type RawResult = i32;

pub mod result_codes {
    use super::RawResult;

    pub const SUCCESS: RawResult = 0;
    pub const TIMEOUT_EXPIRED: RawResult = 1;
    pub const SESSION_LOSS_PENDING: RawResult = 3;
    pub const EVENT_UNAVAILABLE: RawResult = 4;
    pub const FRAME_DISCARDED: RawResult = 9;

    pub const ERROR_VALIDATION_FAILURE: RawResult = -1;
    pub const ERROR_RUNTIME_FAILURE: RawResult = -2;
    pub const ERROR_OUT_OF_MEMORY: RawResult = -3;
    pub const ERROR_API_VERSION_UNSUPPORTED: RawResult = -4;
    pub const ERROR_INITIALIZATION_FAILED: RawResult = -6;
    pub const ERROR_FUNCTION_UNSUPPORTED: RawResult = -7;
    pub const ERROR_EXTENSION_NOT_PRESENT: RawResult = -9;
    pub const ERROR_LIMIT_REACHED: RawResult = -10;
    pub const ERROR_HANDLE_INVALID: RawResult = -12;
    pub const ERROR_INSTANCE_LOST: RawResult = -13;
    pub const ERROR_SESSION_RUNNING: RawResult = -14;
    pub const ERROR_SESSION_NOT_RUNNING: RawResult = -16;
    pub const ERROR_SESSION_LOST: RawResult = -17;
    pub const ERROR_SYSTEM_INVALID: RawResult = -18;
    pub const ERROR_PATH_INVALID: RawResult = -19;
    pub const ERROR_SWAPCHAIN_RECT_INVALID: RawResult = -25;
    pub const ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED: RawResult = -26;
    pub const ERROR_ACTION_TYPE_MISMATCH: RawResult = -27;
    pub const ERROR_SESSION_NOT_READY: RawResult = -28;
    pub const ERROR_SESSION_NOT_STOPPING: RawResult = -29;
    pub const ERROR_TIME_INVALID: RawResult = -30;
    pub const ERROR_REFERENCE_SPACE_UNSUPPORTED: RawResult = -31;
    pub const ERROR_FORM_FACTOR_UNAVAILABLE: RawResult = -35;
    pub const ERROR_CALL_ORDER_INVALID: RawResult = -37;
    pub const ERROR_GRAPHICS_DEVICE_INVALID: RawResult = -38;
    pub const ERROR_INDEX_OUT_OF_RANGE: RawResult = -40;
    pub const ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED: RawResult = -41;
    pub const ERROR_ACTIONSET_NOT_ATTACHED: RawResult = -46;
    pub const ERROR_ACTIONSETS_ALREADY_ATTACHED: RawResult = -47;
    pub const ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING: RawResult = -50;

    /// Symbolic name for the codes this crate knows about.
    pub fn name(code: RawResult) -> Option<&'static str> {
        let name = match code {
            SUCCESS => "XR_SUCCESS",
            TIMEOUT_EXPIRED => "XR_TIMEOUT_EXPIRED",
            SESSION_LOSS_PENDING => "XR_SESSION_LOSS_PENDING",
            EVENT_UNAVAILABLE => "XR_EVENT_UNAVAILABLE",
            FRAME_DISCARDED => "XR_FRAME_DISCARDED",
            ERROR_VALIDATION_FAILURE => "XR_ERROR_VALIDATION_FAILURE",
            ERROR_RUNTIME_FAILURE => "XR_ERROR_RUNTIME_FAILURE",
            ERROR_OUT_OF_MEMORY => "XR_ERROR_OUT_OF_MEMORY",
            ERROR_API_VERSION_UNSUPPORTED => "XR_ERROR_API_VERSION_UNSUPPORTED",
            ERROR_INITIALIZATION_FAILED => "XR_ERROR_INITIALIZATION_FAILED",
            ERROR_FUNCTION_UNSUPPORTED => "XR_ERROR_FUNCTION_UNSUPPORTED",
            ERROR_EXTENSION_NOT_PRESENT => "XR_ERROR_EXTENSION_NOT_PRESENT",
            ERROR_LIMIT_REACHED => "XR_ERROR_LIMIT_REACHED",
            ERROR_HANDLE_INVALID => "XR_ERROR_HANDLE_INVALID",
            ERROR_INSTANCE_LOST => "XR_ERROR_INSTANCE_LOST",
            ERROR_SESSION_RUNNING => "XR_ERROR_SESSION_RUNNING",
            ERROR_SESSION_NOT_RUNNING => "XR_ERROR_SESSION_NOT_RUNNING",
            ERROR_SESSION_LOST => "XR_ERROR_SESSION_LOST",
            ERROR_SYSTEM_INVALID => "XR_ERROR_SYSTEM_INVALID",
            ERROR_PATH_INVALID => "XR_ERROR_PATH_INVALID",
            ERROR_SWAPCHAIN_RECT_INVALID => "XR_ERROR_SWAPCHAIN_RECT_INVALID",
            ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED => "XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED",
            ERROR_ACTION_TYPE_MISMATCH => "XR_ERROR_ACTION_TYPE_MISMATCH",
            ERROR_SESSION_NOT_READY => "XR_ERROR_SESSION_NOT_READY",
            ERROR_SESSION_NOT_STOPPING => "XR_ERROR_SESSION_NOT_STOPPING",
            ERROR_TIME_INVALID => "XR_ERROR_TIME_INVALID",
            ERROR_REFERENCE_SPACE_UNSUPPORTED => "XR_ERROR_REFERENCE_SPACE_UNSUPPORTED",
            ERROR_FORM_FACTOR_UNAVAILABLE => "XR_ERROR_FORM_FACTOR_UNAVAILABLE",
            ERROR_CALL_ORDER_INVALID => "XR_ERROR_CALL_ORDER_INVALID",
            ERROR_GRAPHICS_DEVICE_INVALID => "XR_ERROR_GRAPHICS_DEVICE_INVALID",
            ERROR_INDEX_OUT_OF_RANGE => "XR_ERROR_INDEX_OUT_OF_RANGE",
            ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED => {
                "XR_ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED"
            }
            ERROR_ACTIONSET_NOT_ATTACHED => "XR_ERROR_ACTIONSET_NOT_ATTACHED",
            ERROR_ACTIONSETS_ALREADY_ATTACHED => "XR_ERROR_ACTIONSETS_ALREADY_ATTACHED",
            ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING => {
                "XR_ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING"
            }
            _ => return None,
        };
        Some(name)
    }
}

/// Extension the OpenGL graphics binding depends on.
pub const KHR_OPENGL_ENABLE: &str = "XR_KHR_opengl_enable";

macro_rules! xr_handles {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                pub const NULL: Self = Self(0);

                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                pub const fn into_raw(self) -> u64 {
                    self.0
                }

                pub const fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

xr_handles! {
    InstanceHandle;
    SystemId;
    SessionHandle;
    SpaceHandle;
    SwapchainHandle;
    ActionSetHandle;
    ActionHandle;
    /// Interned semantic path (`/user/hand/left`, ...).
    PathHandle;
}

/// Runtime timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct XrTime(i64);

impl XrTime {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

/// Runtime duration in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct XrDuration(i64);

impl XrDuration {
    /// Wait without a deadline (`XR_INFINITE_DURATION`).
    pub const INFINITE: Self = Self(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub orientation: Quaternion,
    pub position: Vector3,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        orientation: Quaternion::IDENTITY,
        position: Vector3 {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
    };
}

/// Field of view as four signed angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal * 0.5,
            angle_right: horizontal * 0.5,
            angle_up: vertical * 0.5,
            angle_down: -vertical * 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

/// Per-eye view configuration as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfig {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

impl ViewConfig {
    pub fn from_resolution(width: u32, height: u32) -> Self {
        Self {
            recommended_width: width,
            recommended_height: height,
            max_width: width.saturating_mul(2),
            max_height: height.saturating_mul(2),
            recommended_sample_count: 1,
            max_sample_count: 4,
        }
    }

    pub fn recommended_size(&self) -> [u32; 2] {
        [self.recommended_width, self.recommended_height]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiLayer {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProperties {
    pub runtime_name: String,
    pub runtime_version: ApiVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_name: String,
    pub max_layer_count: u32,
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsRequirements {
    pub min_api_version: ApiVersion,
    pub max_api_version: ApiVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceSpaceType {
    View,
    Local,
    Stage,
    Other(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapchainUsage {
    pub color_attachment: bool,
    pub sampled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsage,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

/// One renderable image of a swapchain (a GL texture name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainImage {
    pub texture: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset2D {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2D {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    pub offset: Offset2D,
    pub extent: Extent2D,
}

impl Rect2D {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            offset: Offset2D { x, y },
            extent: Extent2D { width, height },
        }
    }

    pub fn right(&self) -> i32 {
        self.offset.x + self.extent.width
    }
}

/// Region of a swapchain image a view renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubImage {
    pub swapchain: SwapchainHandle,
    pub rect: Rect2D,
    pub array_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SubImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameEndInfo<'a> {
    pub display_time: XrTime,
    pub blend_mode: EnvironmentBlendMode,
    pub layer: Option<&'a ProjectionLayer>,
}

impl FrameEndInfo<'_> {
    pub fn layer_count(&self) -> usize {
        usize::from(self.layer.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub predicted_display_time: XrTime,
    pub predicted_display_period: XrDuration,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    BooleanInput,
    FloatInput,
    PoseInput,
    VibrationOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionCreateInfo<'a> {
    pub name: &'a str,
    pub localized_name: &'a str,
    pub action_type: ActionType,
    pub subaction_paths: &'a [PathHandle],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestedBinding {
    pub action: ActionHandle,
    pub binding: PathHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionState<T> {
    pub current_state: T,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpaceLocation {
    pub pose: Pose,
    pub position_valid: bool,
    pub orientation_valid: bool,
}

/// Session lifecycle states reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Unknown => "UNKNOWN",
            SessionState::Idle => "IDLE",
            SessionState::Ready => "READY",
            SessionState::Synchronized => "SYNCHRONIZED",
            SessionState::Visible => "VISIBLE",
            SessionState::Focused => "FOCUSED",
            SessionState::Stopping => "STOPPING",
            SessionState::LossPending => "LOSS_PENDING",
            SessionState::Exiting => "EXITING",
        }
    }

    /// States in which the frame loop is synchronized with the runtime.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Synchronized
                | SessionState::Visible
                | SessionState::Focused
        )
    }
}

/// A notification drained from the runtime event queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: XrTime,
    },
    InstanceLossPending {
        loss_time: XrTime,
    },
    EventsLost {
        lost_event_count: u32,
    },
    ReferenceSpaceChangePending {
        reference_space_type: ReferenceSpaceType,
    },
    InteractionProfileChanged,
    Other(i32),
}

/// Failed runtime call, carrying the raw result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFault {
    code: RawResult,
}

impl RuntimeFault {
    pub const fn new(code: RawResult) -> Self {
        Self { code }
    }

    pub const fn code(&self) -> RawResult {
        self.code
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match result_codes::name(self.code) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "XR_RESULT_{}", self.code),
        }
    }
}

impl std::error::Error for RuntimeFault {}

pub type RuntimeResult<T> = Result<T, RuntimeFault>;

/// Synchronous view of an XR runtime.
///
/// Implementations translate each call one-to-one onto the runtime. Calls
/// never retry or reorder; protocol ordering is the caller's job.
pub trait XrRuntime {
    fn label(&self) -> &'static str;

    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<String>>;
    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayer>>;
    fn create_instance(
        &mut self,
        application_name: &str,
        extensions: &[&str],
    ) -> RuntimeResult<InstanceHandle>;
    fn instance_properties(&mut self, instance: InstanceHandle)
    -> RuntimeResult<RuntimeProperties>;
    /// Human readable name for `code`, if the runtime can translate it.
    fn result_to_string(&self, instance: InstanceHandle, code: RawResult) -> Option<String>;
    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()>;

    fn system(&mut self, instance: InstanceHandle) -> RuntimeResult<SystemId>;
    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties>;
    fn enumerate_view_configs(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_type: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfig>>;
    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements>;

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SessionHandle>;
    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_type: ViewConfigurationType,
    ) -> RuntimeResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>>;
    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose: Pose,
    ) -> RuntimeResult<SpaceHandle>;
    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: XrTime,
    ) -> RuntimeResult<SpaceLocation>;
    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()>;

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>>;
    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle>;
    fn enumerate_swapchain_images(
        &mut self,
        swapchain: SwapchainHandle,
    ) -> RuntimeResult<Vec<SwapchainImage>>;
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32>;
    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: XrDuration,
    ) -> RuntimeResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;

    fn string_to_path(&mut self, instance: InstanceHandle, path: &str)
    -> RuntimeResult<PathHandle>;
    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> RuntimeResult<ActionSetHandle>;
    fn create_action(
        &mut self,
        action_set: ActionSetHandle,
        info: &ActionCreateInfo<'_>,
    ) -> RuntimeResult<ActionHandle>;
    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: PathHandle,
        bindings: &[SuggestedBinding],
    ) -> RuntimeResult<()>;
    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
        pose: Pose,
    ) -> RuntimeResult<SpaceHandle>;
    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> RuntimeResult<()>;
    fn sync_actions(
        &mut self,
        session: SessionHandle,
        action_set: ActionSetHandle,
    ) -> RuntimeResult<()>;
    fn action_state_boolean(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<bool>>;
    fn action_state_float(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<f32>>;
    fn destroy_action_set(&mut self, action_set: ActionSetHandle) -> RuntimeResult<()>;

    /// Non-blocking; `Ok(None)` when the queue is empty.
    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>>;

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming>;
    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_type: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> RuntimeResult<Vec<View>>;
    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo<'_>) -> RuntimeResult<()>;
}

/// Forwards every call through a pointer, so a context can drive a
/// boxed runtime or one it only borrows.
macro_rules! forward_runtime {
    ($($target:ty),* $(,)?) => {
        $(
            impl<R: XrRuntime + ?Sized> XrRuntime for $target {
                fn label(&self) -> &'static str {
                    (**self).label()
                }

                fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<String>> {
                    (**self).enumerate_extensions()
                }

                fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayer>> {
                    (**self).enumerate_api_layers()
                }

                fn create_instance(
                    &mut self,
                    application_name: &str,
                    extensions: &[&str],
                ) -> RuntimeResult<InstanceHandle> {
                    (**self).create_instance(application_name, extensions)
                }

                fn instance_properties(
                    &mut self,
                    instance: InstanceHandle,
                ) -> RuntimeResult<RuntimeProperties> {
                    (**self).instance_properties(instance)
                }

                fn result_to_string(&self, instance: InstanceHandle, code: RawResult) -> Option<String> {
                    (**self).result_to_string(instance, code)
                }

                fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
                    (**self).destroy_instance(instance)
                }

                fn system(&mut self, instance: InstanceHandle) -> RuntimeResult<SystemId> {
                    (**self).system(instance)
                }

                fn system_properties(
                    &mut self,
                    instance: InstanceHandle,
                    system: SystemId,
                ) -> RuntimeResult<SystemProperties> {
                    (**self).system_properties(instance, system)
                }

                fn enumerate_view_configs(
                    &mut self,
                    instance: InstanceHandle,
                    system: SystemId,
                    view_type: ViewConfigurationType,
                ) -> RuntimeResult<Vec<ViewConfig>> {
                    (**self).enumerate_view_configs(instance, system, view_type)
                }

                fn graphics_requirements(
                    &mut self,
                    instance: InstanceHandle,
                    system: SystemId,
                ) -> RuntimeResult<GraphicsRequirements> {
                    (**self).graphics_requirements(instance, system)
                }

                fn create_session(
                    &mut self,
                    instance: InstanceHandle,
                    system: SystemId,
                ) -> RuntimeResult<SessionHandle> {
                    (**self).create_session(instance, system)
                }

                fn begin_session(
                    &mut self,
                    session: SessionHandle,
                    view_type: ViewConfigurationType,
                ) -> RuntimeResult<()> {
                    (**self).begin_session(session, view_type)
                }

                fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
                    (**self).end_session(session)
                }

                fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
                    (**self).destroy_session(session)
                }

                fn enumerate_reference_spaces(
                    &mut self,
                    session: SessionHandle,
                ) -> RuntimeResult<Vec<ReferenceSpaceType>> {
                    (**self).enumerate_reference_spaces(session)
                }

                fn create_reference_space(
                    &mut self,
                    session: SessionHandle,
                    space_type: ReferenceSpaceType,
                    pose: Pose,
                ) -> RuntimeResult<SpaceHandle> {
                    (**self).create_reference_space(session, space_type, pose)
                }

                fn locate_space(
                    &mut self,
                    space: SpaceHandle,
                    base: SpaceHandle,
                    time: XrTime,
                ) -> RuntimeResult<SpaceLocation> {
                    (**self).locate_space(space, base, time)
                }

                fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
                    (**self).destroy_space(space)
                }

                fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>> {
                    (**self).enumerate_swapchain_formats(session)
                }

                fn create_swapchain(
                    &mut self,
                    session: SessionHandle,
                    info: &SwapchainCreateInfo,
                ) -> RuntimeResult<SwapchainHandle> {
                    (**self).create_swapchain(session, info)
                }

                fn enumerate_swapchain_images(
                    &mut self,
                    swapchain: SwapchainHandle,
                ) -> RuntimeResult<Vec<SwapchainImage>> {
                    (**self).enumerate_swapchain_images(swapchain)
                }

                fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
                    (**self).acquire_swapchain_image(swapchain)
                }

                fn wait_swapchain_image(
                    &mut self,
                    swapchain: SwapchainHandle,
                    timeout: XrDuration,
                ) -> RuntimeResult<()> {
                    (**self).wait_swapchain_image(swapchain, timeout)
                }

                fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
                    (**self).release_swapchain_image(swapchain)
                }

                fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
                    (**self).destroy_swapchain(swapchain)
                }

                fn string_to_path(
                    &mut self,
                    instance: InstanceHandle,
                    path: &str,
                ) -> RuntimeResult<PathHandle> {
                    (**self).string_to_path(instance, path)
                }

                fn create_action_set(
                    &mut self,
                    instance: InstanceHandle,
                    name: &str,
                    localized_name: &str,
                    priority: u32,
                ) -> RuntimeResult<ActionSetHandle> {
                    (**self).create_action_set(instance, name, localized_name, priority)
                }

                fn create_action(
                    &mut self,
                    action_set: ActionSetHandle,
                    info: &ActionCreateInfo<'_>,
                ) -> RuntimeResult<ActionHandle> {
                    (**self).create_action(action_set, info)
                }

                fn suggest_interaction_profile_bindings(
                    &mut self,
                    instance: InstanceHandle,
                    profile: PathHandle,
                    bindings: &[SuggestedBinding],
                ) -> RuntimeResult<()> {
                    (**self).suggest_interaction_profile_bindings(instance, profile, bindings)
                }

                fn create_action_space(
                    &mut self,
                    session: SessionHandle,
                    action: ActionHandle,
                    subaction_path: PathHandle,
                    pose: Pose,
                ) -> RuntimeResult<SpaceHandle> {
                    (**self).create_action_space(session, action, subaction_path, pose)
                }

                fn attach_action_sets(
                    &mut self,
                    session: SessionHandle,
                    action_sets: &[ActionSetHandle],
                ) -> RuntimeResult<()> {
                    (**self).attach_action_sets(session, action_sets)
                }

                fn sync_actions(
                    &mut self,
                    session: SessionHandle,
                    action_set: ActionSetHandle,
                ) -> RuntimeResult<()> {
                    (**self).sync_actions(session, action_set)
                }

                fn action_state_boolean(
                    &mut self,
                    session: SessionHandle,
                    action: ActionHandle,
                    subaction_path: PathHandle,
                ) -> RuntimeResult<ActionState<bool>> {
                    (**self).action_state_boolean(session, action, subaction_path)
                }

                fn action_state_float(
                    &mut self,
                    session: SessionHandle,
                    action: ActionHandle,
                    subaction_path: PathHandle,
                ) -> RuntimeResult<ActionState<f32>> {
                    (**self).action_state_float(session, action, subaction_path)
                }

                fn destroy_action_set(&mut self, action_set: ActionSetHandle) -> RuntimeResult<()> {
                    (**self).destroy_action_set(action_set)
                }

                fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
                    (**self).poll_event(instance)
                }

                fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
                    (**self).wait_frame(session)
                }

                fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
                    (**self).begin_frame(session)
                }

                fn locate_views(
                    &mut self,
                    session: SessionHandle,
                    view_type: ViewConfigurationType,
                    display_time: XrTime,
                    space: SpaceHandle,
                ) -> RuntimeResult<Vec<View>> {
                    (**self).locate_views(session, view_type, display_time, space)
                }

                fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo<'_>) -> RuntimeResult<()> {
                    (**self).end_frame(session, info)
                }
            }
        )*
    };
}

forward_runtime!(Box<R>, &mut R);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_uses_symbolic_name() {
        let fault = RuntimeFault::new(result_codes::ERROR_SESSION_NOT_RUNNING);
        assert_eq!(fault.to_string(), "XR_ERROR_SESSION_NOT_RUNNING");
    }

    #[test]
    fn fault_display_falls_back_to_raw_code() {
        let fault = RuntimeFault::new(-9999);
        assert_eq!(fault.to_string(), "XR_RESULT_-9999");
    }

    #[test]
    fn running_states_cover_ready_through_focused() {
        assert!(SessionState::Ready.is_running());
        assert!(SessionState::Focused.is_running());
        assert!(!SessionState::Idle.is_running());
        assert!(!SessionState::Stopping.is_running());
        assert!(!SessionState::Exiting.is_running());
    }

    #[test]
    fn symmetric_fov_is_centered() {
        let fov = Fov::symmetric(1.6, 1.4);
        assert_eq!(fov.angle_left, -fov.angle_right);
        assert_eq!(fov.angle_up, -fov.angle_down);
    }
}
