//! In-process runtime used when no XR hardware is present and by the tests.
//!
//! It enforces the same call ordering a conformant runtime does (frame
//! bracket, session running, swapchain acquire/release parity), records
//! every call in a journal, and can be told to fail any call.

use super::{
    ActionCreateInfo, ActionHandle, ActionSetHandle, ActionState, ActionType, ApiLayer,
    ApiVersion, Fov, FrameEndInfo, FrameTiming, GraphicsRequirements, InstanceHandle,
    KHR_OPENGL_ENABLE, PathHandle, Pose, ProjectionView, Quaternion, RawResult, ReferenceSpaceType, RuntimeEvent,
    RuntimeFault, RuntimeProperties, RuntimeResult, SessionHandle, SessionState, SpaceHandle,
    SpaceLocation, SuggestedBinding, SwapchainCreateInfo, SwapchainHandle, SwapchainImage,
    SystemId, SystemProperties, Vector3, View, ViewConfig, ViewConfigurationType, XrDuration,
    XrRuntime, XrTime, result_codes,
};
use std::collections::{HashMap, HashSet, VecDeque};

const GL_RGBA8: i64 = 0x8058;
const GL_SRGB8: i64 = 0x8C41;
const GL_SRGB8_ALPHA8: i64 = 0x8C43;

const DEFAULT_IMAGE_COUNT: usize = 3;
const FRAME_PERIOD_NS: i64 = 11_111_111;
const START_TIME_NS: i64 = 1_000_000_000;
const EYE_HEIGHT: f32 = 1.6;
const HALF_IPD: f32 = 0.032;

/// Runtime entry points, as recorded in the journal and targeted by faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    EnumerateExtensions,
    EnumerateApiLayers,
    CreateInstance,
    InstanceProperties,
    DestroyInstance,
    GetSystem,
    SystemProperties,
    EnumerateViewConfigs,
    GraphicsRequirements,
    CreateSession,
    BeginSession,
    EndSession,
    DestroySession,
    EnumerateReferenceSpaces,
    CreateReferenceSpace,
    LocateSpace,
    DestroySpace,
    EnumerateSwapchainFormats,
    CreateSwapchain,
    EnumerateSwapchainImages,
    AcquireSwapchainImage,
    WaitSwapchainImage,
    ReleaseSwapchainImage,
    DestroySwapchain,
    StringToPath,
    CreateActionSet,
    CreateAction,
    SuggestBindings,
    CreateActionSpace,
    AttachActionSets,
    SyncActions,
    ActionStateBoolean,
    ActionStateFloat,
    DestroyActionSet,
    PollEvent,
    WaitFrame,
    BeginFrame,
    LocateViews,
    EndFrame,
}

/// One journal entry: the call and the handle it targeted (0 if none).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub call: RuntimeCall,
    pub handle: u64,
}

/// A frame as handed to `end_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub display_time: XrTime,
    pub layer_count: usize,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Waited,
    Begun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultMode {
    Once,
    Always,
}

#[derive(Debug)]
struct SimSwapchain {
    info: SwapchainCreateInfo,
    images: Vec<SwapchainImage>,
    cursor: usize,
    acquired: Option<u32>,
    waited: bool,
}

#[derive(Debug, Clone, Copy)]
enum SimSpace {
    Reference(ReferenceSpaceType),
    Action { subaction_path: PathHandle },
}

#[derive(Debug)]
struct SimAction {
    name: String,
    action_type: ActionType,
}

pub struct SimulatedRuntime {
    view_configs: Vec<ViewConfig>,
    formats: Vec<i64>,
    image_count: usize,
    extensions: Vec<String>,
    min_graphics_version: ApiVersion,
    auto_lifecycle: bool,
    should_render: bool,

    next_handle: u64,
    next_texture: u32,
    instance: Option<InstanceHandle>,
    session: Option<SessionHandle>,
    session_running: bool,
    swapchains: HashMap<SwapchainHandle, SimSwapchain>,
    spaces: HashMap<SpaceHandle, SimSpace>,
    action_sets: HashSet<ActionSetHandle>,
    actions: HashMap<ActionHandle, SimAction>,
    paths: HashMap<String, PathHandle>,
    action_values: HashMap<String, f32>,
    attached: bool,

    events: VecDeque<RuntimeEvent>,
    faults: HashMap<RuntimeCall, (RawResult, FaultMode)>,
    journal: Vec<CallRecord>,
    submitted: Vec<SubmittedFrame>,
    phase: FramePhase,
    clock_ns: i64,
    pending_display_time: Option<XrTime>,
}

impl SimulatedRuntime {
    pub fn new(eye_resolution: [u32; 2]) -> Self {
        Self {
            view_configs: vec![
                ViewConfig::from_resolution(eye_resolution[0], eye_resolution[1]);
                2
            ],
            formats: vec![GL_RGBA8, GL_SRGB8, GL_SRGB8_ALPHA8],
            image_count: DEFAULT_IMAGE_COUNT,
            extensions: vec![
                KHR_OPENGL_ENABLE.to_string(),
                "XR_EXT_debug_utils".to_string(),
            ],
            min_graphics_version: ApiVersion::new(3, 0, 0),
            auto_lifecycle: true,
            should_render: true,
            next_handle: 1,
            next_texture: 1,
            instance: None,
            session: None,
            session_running: false,
            swapchains: HashMap::new(),
            spaces: HashMap::new(),
            action_sets: HashSet::new(),
            actions: HashMap::new(),
            paths: HashMap::new(),
            action_values: HashMap::new(),
            attached: false,
            events: VecDeque::new(),
            faults: HashMap::new(),
            journal: Vec::new(),
            submitted: Vec::new(),
            phase: FramePhase::Idle,
            clock_ns: START_TIME_NS,
            pending_display_time: None,
        }
    }

    pub fn with_view_configs(mut self, view_configs: Vec<ViewConfig>) -> Self {
        self.view_configs = view_configs;
        self
    }

    pub fn with_formats(mut self, formats: Vec<i64>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_image_count(mut self, image_count: usize) -> Self {
        self.image_count = image_count.max(1);
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_min_graphics_version(mut self, version: ApiVersion) -> Self {
        self.min_graphics_version = version;
        self
    }

    /// Disables the IDLE/READY/... notifications a real runtime would emit
    /// on its own, leaving the event queue fully scripted.
    pub fn without_auto_lifecycle(mut self) -> Self {
        self.auto_lifecycle = false;
        self
    }

    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    /// Replaces the recommended view sizes, as a runtime does on resize.
    pub fn set_view_configs(&mut self, view_configs: Vec<ViewConfig>) {
        self.view_configs = view_configs;
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Queues a state change for the current session.
    pub fn push_state(&mut self, state: SessionState) {
        let session = self.session.unwrap_or(SessionHandle::NULL);
        let time = XrTime::from_nanos(self.clock_ns);
        self.events.push_back(RuntimeEvent::SessionStateChanged {
            session,
            state,
            time,
        });
    }

    /// Asks the application to quit, the way a runtime does when the user
    /// exits from the system UI.
    pub fn request_exit(&mut self) {
        self.push_state(SessionState::Stopping);
    }

    pub fn set_action_value(&mut self, action_name: &str, value: f32) {
        self.action_values.insert(action_name.to_string(), value);
    }

    pub fn fail_next(&mut self, call: RuntimeCall, code: RawResult) {
        self.faults.insert(call, (code, FaultMode::Once));
    }

    pub fn fail_always(&mut self, call: RuntimeCall, code: RawResult) {
        self.faults.insert(call, (code, FaultMode::Always));
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn journal(&self) -> &[CallRecord] {
        &self.journal
    }

    pub fn call_count(&self, call: RuntimeCall) -> usize {
        self.journal.iter().filter(|record| record.call == call).count()
    }

    pub fn submitted_frames(&self) -> &[SubmittedFrame] {
        &self.submitted
    }

    pub fn live_swapchains(&self) -> usize {
        self.swapchains.len()
    }

    /// Creation parameters of the live swapchains, ordered by handle.
    pub fn swapchain_infos(&self) -> Vec<SwapchainCreateInfo> {
        let mut entries: Vec<_> = self.swapchains.iter().collect();
        entries.sort_by_key(|(handle, _)| **handle);
        entries.into_iter().map(|(_, chain)| chain.info).collect()
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.len()
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_running(&self) -> bool {
        self.session_running
    }

    fn enter(&mut self, call: RuntimeCall, handle: u64) -> RuntimeResult<()> {
        self.journal.push(CallRecord { call, handle });
        match self.faults.get(&call).copied() {
            Some((code, mode)) => {
                if mode == FaultMode::Once {
                    self.faults.remove(&call);
                }
                Err(RuntimeFault::new(code))
            }
            None => Ok(()),
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Origin of a simulated space in stage coordinates.
    fn stage_position(&self, kind: SimSpace) -> Vector3 {
        match kind {
            SimSpace::Reference(ReferenceSpaceType::View) => Vector3 {
                x: 0.0,
                y: EYE_HEIGHT,
                z: 0.0,
            },
            SimSpace::Reference(_) => Vector3::default(),
            SimSpace::Action { subaction_path } => {
                let side = match self.path_name(subaction_path) {
                    Some(name) if name.ends_with("left") => -1.0,
                    _ => 1.0,
                };
                Vector3 {
                    x: 0.2 * side,
                    y: 1.2,
                    z: -0.3,
                }
            }
        }
    }

    fn require_instance(&self, instance: InstanceHandle) -> RuntimeResult<()> {
        match self.instance {
            Some(current) if current == instance => Ok(()),
            _ => Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID)),
        }
    }

    fn require_session(&self, session: SessionHandle) -> RuntimeResult<()> {
        match self.session {
            Some(current) if current == session => Ok(()),
            _ => Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID)),
        }
    }

    fn require_running(&self, session: SessionHandle) -> RuntimeResult<()> {
        self.require_session(session)?;
        if self.session_running {
            Ok(())
        } else {
            Err(RuntimeFault::new(result_codes::ERROR_SESSION_NOT_RUNNING))
        }
    }

    fn swapchain_mut(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<&mut SimSwapchain> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))
    }

    fn path_name(&self, path: PathHandle) -> Option<&str> {
        self.paths
            .iter()
            .find(|(_, handle)| **handle == path)
            .map(|(name, _)| name.as_str())
    }

    fn action_value(&self, action: ActionHandle) -> RuntimeResult<(&SimAction, f32)> {
        let entry = self
            .actions
            .get(&action)
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))?;
        let value = self.action_values.get(&entry.name).copied().unwrap_or(0.0);
        Ok((entry, value))
    }

    fn eye_view(&self, index: usize, count: usize) -> View {
        let offset = if count <= 1 {
            0.0
        } else {
            -HALF_IPD + (2.0 * HALF_IPD) * index as f32 / (count - 1) as f32
        };
        View {
            pose: Pose {
                orientation: Quaternion::IDENTITY,
                position: Vector3 {
                    x: offset,
                    y: EYE_HEIGHT,
                    z: 0.0,
                },
            },
            fov: Fov {
                angle_left: -0.82,
                angle_right: 0.78,
                angle_up: 0.8,
                angle_down: -0.85,
            },
        }
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new([1440, 1600])
    }
}

impl XrRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "Simulated XR Runtime"
    }

    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<String>> {
        self.enter(RuntimeCall::EnumerateExtensions, 0)?;
        Ok(self.extensions.clone())
    }

    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayer>> {
        self.enter(RuntimeCall::EnumerateApiLayers, 0)?;
        Ok(Vec::new())
    }

    fn create_instance(
        &mut self,
        _application_name: &str,
        extensions: &[&str],
    ) -> RuntimeResult<InstanceHandle> {
        self.enter(RuntimeCall::CreateInstance, 0)?;
        if self.instance.is_some() {
            return Err(RuntimeFault::new(result_codes::ERROR_LIMIT_REACHED));
        }
        if extensions
            .iter()
            .any(|name| !self.extensions.iter().any(|known| known == name))
        {
            return Err(RuntimeFault::new(result_codes::ERROR_EXTENSION_NOT_PRESENT));
        }
        let instance = InstanceHandle::from_raw(self.allocate());
        self.instance = Some(instance);
        Ok(instance)
    }

    fn instance_properties(
        &mut self,
        instance: InstanceHandle,
    ) -> RuntimeResult<RuntimeProperties> {
        self.enter(RuntimeCall::InstanceProperties, instance.into_raw())?;
        self.require_instance(instance)?;
        Ok(RuntimeProperties {
            runtime_name: self.label().to_string(),
            runtime_version: ApiVersion::new(1, 0, 0),
        })
    }

    fn result_to_string(&self, instance: InstanceHandle, code: RawResult) -> Option<String> {
        if self.instance != Some(instance) {
            return None;
        }
        Some(
            result_codes::name(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("XR_UNKNOWN_RESULT_{code}")),
        )
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::DestroyInstance, instance.into_raw())?;
        self.require_instance(instance)?;
        self.instance = None;
        self.events.clear();
        Ok(())
    }

    fn system(&mut self, instance: InstanceHandle) -> RuntimeResult<SystemId> {
        self.enter(RuntimeCall::GetSystem, instance.into_raw())?;
        self.require_instance(instance)?;
        Ok(SystemId::from_raw(1))
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        self.enter(RuntimeCall::SystemProperties, instance.into_raw())?;
        self.require_instance(instance)?;
        Ok(SystemProperties {
            system_name: "Simulated HMD".to_string(),
            max_layer_count: 16,
            max_swapchain_image_width: 8192,
            max_swapchain_image_height: 8192,
            orientation_tracking: true,
            position_tracking: true,
        })
    }

    fn enumerate_view_configs(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        view_type: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfig>> {
        self.enter(RuntimeCall::EnumerateViewConfigs, instance.into_raw())?;
        self.require_instance(instance)?;
        match view_type {
            ViewConfigurationType::PrimaryStereo => Ok(self.view_configs.clone()),
            ViewConfigurationType::PrimaryMono => Err(RuntimeFault::new(
                result_codes::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED,
            )),
        }
    }

    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        self.enter(RuntimeCall::GraphicsRequirements, instance.into_raw())?;
        self.require_instance(instance)?;
        Ok(GraphicsRequirements {
            min_api_version: self.min_graphics_version,
            max_api_version: ApiVersion::new(4, 6, 0),
        })
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> RuntimeResult<SessionHandle> {
        self.enter(RuntimeCall::CreateSession, instance.into_raw())?;
        self.require_instance(instance)?;
        if self.session.is_some() {
            return Err(RuntimeFault::new(result_codes::ERROR_LIMIT_REACHED));
        }
        let session = SessionHandle::from_raw(self.allocate());
        self.session = Some(session);
        if self.auto_lifecycle {
            self.push_state(SessionState::Idle);
            self.push_state(SessionState::Ready);
        }
        Ok(session)
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        _view_type: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.enter(RuntimeCall::BeginSession, session.into_raw())?;
        self.require_session(session)?;
        if self.session_running {
            return Err(RuntimeFault::new(result_codes::ERROR_SESSION_RUNNING));
        }
        self.session_running = true;
        if self.auto_lifecycle {
            self.push_state(SessionState::Synchronized);
            self.push_state(SessionState::Visible);
            self.push_state(SessionState::Focused);
        }
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::EndSession, session.into_raw())?;
        self.require_running(session)?;
        if self.phase != FramePhase::Idle {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        self.session_running = false;
        if self.auto_lifecycle {
            self.push_state(SessionState::Idle);
            self.push_state(SessionState::Exiting);
        }
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::DestroySession, session.into_raw())?;
        self.require_session(session)?;
        self.session = None;
        self.session_running = false;
        self.phase = FramePhase::Idle;
        self.attached = false;
        self.swapchains.clear();
        self.spaces.clear();
        Ok(())
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>> {
        self.enter(RuntimeCall::EnumerateReferenceSpaces, session.into_raw())?;
        self.require_session(session)?;
        Ok(vec![
            ReferenceSpaceType::View,
            ReferenceSpaceType::Local,
            ReferenceSpaceType::Stage,
        ])
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        _pose: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        self.enter(RuntimeCall::CreateReferenceSpace, session.into_raw())?;
        self.require_session(session)?;
        if let ReferenceSpaceType::Other(_) = space_type {
            return Err(RuntimeFault::new(
                result_codes::ERROR_REFERENCE_SPACE_UNSUPPORTED,
            ));
        }
        let space = SpaceHandle::from_raw(self.allocate());
        self.spaces.insert(space, SimSpace::Reference(space_type));
        Ok(space)
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: XrTime,
    ) -> RuntimeResult<SpaceLocation> {
        self.enter(RuntimeCall::LocateSpace, space.into_raw())?;
        let base_kind = *self
            .spaces
            .get(&base)
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))?;
        let kind = *self
            .spaces
            .get(&space)
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))?;
        // Every simulated space shares the stage orientation, so offsets
        // subtract directly.
        let from = self.stage_position(base_kind);
        let to = self.stage_position(kind);
        let position = Vector3 {
            x: to.x - from.x,
            y: to.y - from.y,
            z: to.z - from.z,
        };
        Ok(SpaceLocation {
            pose: Pose {
                orientation: Quaternion::IDENTITY,
                position,
            },
            position_valid: self.session_running,
            orientation_valid: self.session_running,
        })
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::DestroySpace, space.into_raw())?;
        self.spaces
            .remove(&space)
            .map(|_| ())
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>> {
        self.enter(RuntimeCall::EnumerateSwapchainFormats, session.into_raw())?;
        self.require_session(session)?;
        Ok(self.formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle> {
        self.enter(RuntimeCall::CreateSwapchain, session.into_raw())?;
        self.require_session(session)?;
        if !self.formats.contains(&info.format) {
            return Err(RuntimeFault::new(
                result_codes::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED,
            ));
        }
        if info.width == 0 || info.height == 0 {
            return Err(RuntimeFault::new(result_codes::ERROR_VALIDATION_FAILURE));
        }
        let handle = SwapchainHandle::from_raw(self.allocate());
        let images = (0..self.image_count)
            .map(|_| {
                let texture = self.next_texture;
                self.next_texture += 1;
                SwapchainImage { texture }
            })
            .collect();
        self.swapchains.insert(
            handle,
            SimSwapchain {
                info: *info,
                images,
                cursor: 0,
                acquired: None,
                waited: false,
            },
        );
        Ok(handle)
    }

    fn enumerate_swapchain_images(
        &mut self,
        swapchain: SwapchainHandle,
    ) -> RuntimeResult<Vec<SwapchainImage>> {
        self.enter(RuntimeCall::EnumerateSwapchainImages, swapchain.into_raw())?;
        Ok(self.swapchain_mut(swapchain)?.images.clone())
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.enter(RuntimeCall::AcquireSwapchainImage, swapchain.into_raw())?;
        let chain = self.swapchain_mut(swapchain)?;
        if chain.acquired.is_some() {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        let index = chain.cursor as u32;
        chain.cursor = (chain.cursor + 1) % chain.images.len();
        chain.acquired = Some(index);
        chain.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: XrDuration,
    ) -> RuntimeResult<()> {
        self.enter(RuntimeCall::WaitSwapchainImage, swapchain.into_raw())?;
        let chain = self.swapchain_mut(swapchain)?;
        if chain.acquired.is_none() || chain.waited {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        if timeout.as_nanos() <= 0 {
            return Err(RuntimeFault::new(result_codes::TIMEOUT_EXPIRED));
        }
        chain.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::ReleaseSwapchainImage, swapchain.into_raw())?;
        let chain = self.swapchain_mut(swapchain)?;
        if chain.acquired.is_none() || !chain.waited {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        chain.acquired = None;
        chain.waited = false;
        Ok(())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::DestroySwapchain, swapchain.into_raw())?;
        self.swapchains
            .remove(&swapchain)
            .map(|_| ())
            .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))
    }

    fn string_to_path(
        &mut self,
        instance: InstanceHandle,
        path: &str,
    ) -> RuntimeResult<PathHandle> {
        self.enter(RuntimeCall::StringToPath, instance.into_raw())?;
        self.require_instance(instance)?;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(RuntimeFault::new(result_codes::ERROR_PATH_INVALID));
        }
        if let Some(handle) = self.paths.get(path) {
            return Ok(*handle);
        }
        let handle = PathHandle::from_raw(self.allocate());
        self.paths.insert(path.to_string(), handle);
        Ok(handle)
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        _name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> RuntimeResult<ActionSetHandle> {
        self.enter(RuntimeCall::CreateActionSet, instance.into_raw())?;
        self.require_instance(instance)?;
        let handle = ActionSetHandle::from_raw(self.allocate());
        self.action_sets.insert(handle);
        Ok(handle)
    }

    fn create_action(
        &mut self,
        action_set: ActionSetHandle,
        info: &ActionCreateInfo<'_>,
    ) -> RuntimeResult<ActionHandle> {
        self.enter(RuntimeCall::CreateAction, action_set.into_raw())?;
        if !self.action_sets.contains(&action_set) {
            return Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID));
        }
        if self.attached {
            return Err(RuntimeFault::new(
                result_codes::ERROR_ACTIONSETS_ALREADY_ATTACHED,
            ));
        }
        let handle = ActionHandle::from_raw(self.allocate());
        self.actions.insert(
            handle,
            SimAction {
                name: info.name.to_string(),
                action_type: info.action_type,
            },
        );
        Ok(handle)
    }

    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: PathHandle,
        bindings: &[SuggestedBinding],
    ) -> RuntimeResult<()> {
        self.enter(RuntimeCall::SuggestBindings, profile.into_raw())?;
        self.require_instance(instance)?;
        let known = bindings.iter().all(|binding| {
            self.actions.contains_key(&binding.action) && self.path_name(binding.binding).is_some()
        });
        if known {
            Ok(())
        } else {
            Err(RuntimeFault::new(result_codes::ERROR_PATH_INVALID))
        }
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
        _pose: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        self.enter(RuntimeCall::CreateActionSpace, session.into_raw())?;
        self.require_session(session)?;
        let (entry, _) = self.action_value(action)?;
        if entry.action_type != ActionType::PoseInput {
            return Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH));
        }
        let space = SpaceHandle::from_raw(self.allocate());
        self.spaces.insert(space, SimSpace::Action { subaction_path });
        Ok(space)
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> RuntimeResult<()> {
        self.enter(RuntimeCall::AttachActionSets, session.into_raw())?;
        self.require_session(session)?;
        if self.attached {
            return Err(RuntimeFault::new(
                result_codes::ERROR_ACTIONSETS_ALREADY_ATTACHED,
            ));
        }
        if action_sets.iter().any(|set| !self.action_sets.contains(set)) {
            return Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID));
        }
        self.attached = true;
        Ok(())
    }

    fn sync_actions(
        &mut self,
        session: SessionHandle,
        action_set: ActionSetHandle,
    ) -> RuntimeResult<()> {
        self.enter(RuntimeCall::SyncActions, session.into_raw())?;
        self.require_running(session)?;
        if !self.attached || !self.action_sets.contains(&action_set) {
            return Err(RuntimeFault::new(result_codes::ERROR_ACTIONSET_NOT_ATTACHED));
        }
        Ok(())
    }

    fn action_state_boolean(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        _subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<bool>> {
        self.enter(RuntimeCall::ActionStateBoolean, action.into_raw())?;
        self.require_session(session)?;
        let (entry, value) = self.action_value(action)?;
        if entry.action_type != ActionType::BooleanInput {
            return Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH));
        }
        Ok(ActionState {
            current_state: value > 0.5,
            is_active: self.session_running,
        })
    }

    fn action_state_float(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        _subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<f32>> {
        self.enter(RuntimeCall::ActionStateFloat, action.into_raw())?;
        self.require_session(session)?;
        let (entry, value) = self.action_value(action)?;
        if entry.action_type != ActionType::FloatInput {
            return Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH));
        }
        Ok(ActionState {
            current_state: value,
            is_active: self.session_running,
        })
    }

    fn destroy_action_set(&mut self, action_set: ActionSetHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::DestroyActionSet, action_set.into_raw())?;
        if !self.action_sets.remove(&action_set) {
            return Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID));
        }
        Ok(())
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        self.enter(RuntimeCall::PollEvent, instance.into_raw())?;
        self.require_instance(instance)?;
        Ok(self.events.pop_front())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
        self.enter(RuntimeCall::WaitFrame, session.into_raw())?;
        self.require_running(session)?;
        if self.phase == FramePhase::Waited {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        self.clock_ns += FRAME_PERIOD_NS;
        let predicted_display_time = XrTime::from_nanos(self.clock_ns);
        self.pending_display_time = Some(predicted_display_time);
        self.phase = FramePhase::Waited;
        Ok(FrameTiming {
            predicted_display_time,
            predicted_display_period: XrDuration::from_nanos(FRAME_PERIOD_NS),
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(RuntimeCall::BeginFrame, session.into_raw())?;
        self.require_running(session)?;
        if self.phase != FramePhase::Waited {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        self.phase = FramePhase::Begun;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_type: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> RuntimeResult<Vec<View>> {
        self.enter(RuntimeCall::LocateViews, session.into_raw())?;
        self.require_session(session)?;
        if view_type != ViewConfigurationType::PrimaryStereo {
            return Err(RuntimeFault::new(
                result_codes::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED,
            ));
        }
        if !self.spaces.contains_key(&space) {
            return Err(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID));
        }
        if display_time.as_nanos() <= 0 {
            return Err(RuntimeFault::new(result_codes::ERROR_TIME_INVALID));
        }
        let count = self.view_configs.len();
        Ok((0..count).map(|index| self.eye_view(index, count)).collect())
    }

    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo<'_>) -> RuntimeResult<()> {
        self.enter(RuntimeCall::EndFrame, session.into_raw())?;
        self.require_running(session)?;
        if self.phase != FramePhase::Begun {
            return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
        }
        if self.pending_display_time != Some(info.display_time) {
            return Err(RuntimeFault::new(result_codes::ERROR_TIME_INVALID));
        }
        let views = info
            .layer
            .map(|layer| layer.views.clone())
            .unwrap_or_default();
        for view in &views {
            let chain = self
                .swapchains
                .get(&view.sub_image.swapchain)
                .ok_or(RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID))?;
            if chain.acquired.is_some() {
                return Err(RuntimeFault::new(result_codes::ERROR_CALL_ORDER_INVALID));
            }
            if view.sub_image.rect.right() > chain.info.width as i32 {
                return Err(RuntimeFault::new(result_codes::ERROR_SWAPCHAIN_RECT_INVALID));
            }
        }
        self.phase = FramePhase::Idle;
        self.pending_display_time = None;
        self.submitted.push(SubmittedFrame {
            display_time: info.display_time,
            layer_count: info.layer_count(),
            views,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::EnvironmentBlendMode;

    fn running_session(runtime: &mut SimulatedRuntime) -> SessionHandle {
        let instance = runtime
            .create_instance("test", &[KHR_OPENGL_ENABLE])
            .expect("instance");
        let system = runtime.system(instance).expect("system");
        let session = runtime.create_session(instance, system).expect("session");
        runtime
            .begin_session(session, ViewConfigurationType::PrimaryStereo)
            .expect("begin");
        session
    }

    #[test]
    fn create_session_queues_idle_then_ready() {
        let mut runtime = SimulatedRuntime::default();
        let instance = runtime.create_instance("test", &[]).expect("instance");
        let system = runtime.system(instance).expect("system");
        runtime.create_session(instance, system).expect("session");

        let first = runtime.poll_event(instance).expect("poll");
        let second = runtime.poll_event(instance).expect("poll");
        assert!(matches!(
            first,
            Some(RuntimeEvent::SessionStateChanged {
                state: SessionState::Idle,
                ..
            })
        ));
        assert!(matches!(
            second,
            Some(RuntimeEvent::SessionStateChanged {
                state: SessionState::Ready,
                ..
            })
        ));
        assert_eq!(runtime.poll_event(instance).expect("poll"), None);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let mut runtime = SimulatedRuntime::default();
        let err = runtime
            .create_instance("test", &["XR_FB_made_up"])
            .unwrap_err();
        assert_eq!(err.code(), result_codes::ERROR_EXTENSION_NOT_PRESENT);
    }

    #[test]
    fn reference_spaces_locate_relative_to_their_base() {
        let mut runtime = SimulatedRuntime::default();
        let session = running_session(&mut runtime);
        let stage = runtime
            .create_reference_space(session, ReferenceSpaceType::Stage, Pose::IDENTITY)
            .expect("stage");
        let view = runtime
            .create_reference_space(session, ReferenceSpaceType::View, Pose::IDENTITY)
            .expect("view");
        let local = runtime
            .create_reference_space(session, ReferenceSpaceType::Local, Pose::IDENTITY)
            .expect("local");
        let time = XrTime::from_nanos(START_TIME_NS);

        let head = runtime.locate_space(view, stage, time).expect("view in stage");
        assert_eq!(head.pose.position.y, EYE_HEIGHT);
        assert!(head.position_valid);

        let floor = runtime.locate_space(stage, view, time).expect("stage in view");
        assert_eq!(floor.pose.position.y, -EYE_HEIGHT);

        let local_in_stage = runtime.locate_space(local, stage, time).expect("local in stage");
        assert_eq!(local_in_stage.pose.position, Vector3::default());

        let err = runtime
            .locate_space(view, SpaceHandle::from_raw(9_999), time)
            .unwrap_err();
        assert_eq!(err.code(), result_codes::ERROR_HANDLE_INVALID);
    }

    #[test]
    fn frame_calls_must_be_bracketed() {
        let mut runtime = SimulatedRuntime::default();
        let session = running_session(&mut runtime);

        let err = runtime.begin_frame(session).unwrap_err();
        assert_eq!(err.code(), result_codes::ERROR_CALL_ORDER_INVALID);

        let timing = runtime.wait_frame(session).expect("wait");
        runtime.begin_frame(session).expect("begin");
        runtime
            .end_frame(
                session,
                &FrameEndInfo {
                    display_time: timing.predicted_display_time,
                    blend_mode: EnvironmentBlendMode::Opaque,
                    layer: None,
                },
            )
            .expect("end");
        assert_eq!(runtime.submitted_frames().len(), 1);
        assert_eq!(runtime.submitted_frames()[0].layer_count, 0);
    }

    #[test]
    fn predicted_time_advances_each_frame() {
        let mut runtime = SimulatedRuntime::default();
        let session = running_session(&mut runtime);
        let mut last = XrTime::default();
        for _ in 0..3 {
            let timing = runtime.wait_frame(session).expect("wait");
            assert!(timing.predicted_display_time > last);
            last = timing.predicted_display_time;
            runtime.begin_frame(session).expect("begin");
            runtime
                .end_frame(
                    session,
                    &FrameEndInfo {
                        display_time: last,
                        blend_mode: EnvironmentBlendMode::Opaque,
                        layer: None,
                    },
                )
                .expect("end");
        }
    }

    #[test]
    fn release_without_acquire_is_call_order_error() {
        let mut runtime = SimulatedRuntime::default();
        let session = running_session(&mut runtime);
        let info = SwapchainCreateInfo {
            usage: Default::default(),
            format: GL_SRGB8_ALPHA8,
            sample_count: 1,
            width: 64,
            height: 64,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        };
        let swapchain = runtime.create_swapchain(session, &info).expect("swapchain");
        let err = runtime.release_swapchain_image(swapchain).unwrap_err();
        assert_eq!(err.code(), result_codes::ERROR_CALL_ORDER_INVALID);

        let index = runtime.acquire_swapchain_image(swapchain).expect("acquire");
        assert_eq!(index, 0);
        runtime
            .wait_swapchain_image(swapchain, XrDuration::INFINITE)
            .expect("wait");
        runtime.release_swapchain_image(swapchain).expect("release");
        assert_eq!(runtime.acquire_swapchain_image(swapchain).expect("acquire"), 1);
    }

    #[test]
    fn injected_faults_fire_once_or_always() {
        let mut runtime = SimulatedRuntime::default();
        runtime.fail_next(RuntimeCall::EnumerateExtensions, result_codes::ERROR_RUNTIME_FAILURE);
        assert!(runtime.enumerate_extensions().is_err());
        assert!(runtime.enumerate_extensions().is_ok());

        runtime.fail_always(RuntimeCall::EnumerateApiLayers, result_codes::ERROR_RUNTIME_FAILURE);
        assert!(runtime.enumerate_api_layers().is_err());
        assert!(runtime.enumerate_api_layers().is_err());
        runtime.clear_faults();
        assert!(runtime.enumerate_api_layers().is_ok());
        assert_eq!(runtime.call_count(RuntimeCall::EnumerateApiLayers), 3);
    }
}
