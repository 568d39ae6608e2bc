//! `XrRuntime` over the system OpenXR loader, rendering through OpenGL.
//!
//! The integrator owns the GL context and hands its platform binding to
//! [`OpenXrRuntime::load`]. Runtime objects live in maps keyed by the
//! crate's opaque handles; destroying a handle drops the object.

use super::{
    ActionCreateInfo, ActionHandle, ActionSetHandle, ActionState, ActionType, ApiLayer,
    ApiVersion, EnvironmentBlendMode, Fov, FrameEndInfo, FrameTiming, GraphicsRequirements,
    InstanceHandle, KHR_OPENGL_ENABLE, PathHandle, Pose, Quaternion, RawResult,
    ReferenceSpaceType, RuntimeEvent, RuntimeFault, RuntimeProperties, RuntimeResult,
    SessionHandle, SessionState, SpaceHandle, SpaceLocation, SuggestedBinding,
    SwapchainCreateInfo, SwapchainHandle, SwapchainImage, SystemId, SystemProperties, Vector3,
    View, ViewConfig, ViewConfigurationType, XrDuration, XrRuntime, XrTime, result_codes,
};
use openxr as xr;
use std::collections::HashMap;
use std::ffi::{CStr, c_char};

const DEBUG_UTILS: &str = "XR_EXT_debug_utils";

fn fault(err: xr::sys::Result) -> RuntimeFault {
    RuntimeFault::new(err.into_raw())
}

fn missing() -> RuntimeFault {
    RuntimeFault::new(result_codes::ERROR_HANDLE_INVALID)
}

fn to_version(version: xr::Version) -> ApiVersion {
    ApiVersion::new(version.major(), version.minor(), version.patch())
}

fn to_pose(pose: xr::Posef) -> Pose {
    Pose {
        orientation: Quaternion {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: Vector3 {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

fn from_pose(pose: Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: xr::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

fn to_fov(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn from_fov(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn view_type(view_type: ViewConfigurationType) -> xr::ViewConfigurationType {
    match view_type {
        ViewConfigurationType::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

fn to_space_type(space_type: xr::ReferenceSpaceType) -> ReferenceSpaceType {
    match space_type {
        xr::ReferenceSpaceType::VIEW => ReferenceSpaceType::View,
        xr::ReferenceSpaceType::LOCAL => ReferenceSpaceType::Local,
        xr::ReferenceSpaceType::STAGE => ReferenceSpaceType::Stage,
        other => ReferenceSpaceType::Other(other.into_raw()),
    }
}

fn from_space_type(space_type: ReferenceSpaceType) -> xr::ReferenceSpaceType {
    match space_type {
        ReferenceSpaceType::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceType::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceType::Stage => xr::ReferenceSpaceType::STAGE,
        ReferenceSpaceType::Other(raw) => xr::ReferenceSpaceType::from_raw(raw),
    }
}

fn to_session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn blend_mode(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

enum TypedAction {
    Boolean(xr::Action<bool>),
    Float(xr::Action<f32>),
    Pose(xr::Action<xr::Posef>),
    Vibration(xr::Action<xr::Haptic>),
}

impl TypedAction {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_> {
        match self {
            TypedAction::Boolean(action) => xr::Binding::new(action, path),
            TypedAction::Float(action) => xr::Binding::new(action, path),
            TypedAction::Pose(action) => xr::Binding::new(action, path),
            TypedAction::Vibration(action) => xr::Binding::new(action, path),
        }
    }
}

struct ActiveSession {
    handle: SessionHandle,
    session: xr::Session<xr::OpenGL>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::OpenGL>,
}

pub struct OpenXrRuntime {
    entry: xr::Entry,
    graphics: xr::opengl::SessionCreateInfo,
    next_handle: u64,
    instance: Option<(InstanceHandle, xr::Instance)>,
    systems: HashMap<SystemId, xr::SystemId>,
    session: Option<ActiveSession>,
    spaces: HashMap<SpaceHandle, xr::Space>,
    swapchains: HashMap<SwapchainHandle, xr::Swapchain<xr::OpenGL>>,
    paths: HashMap<PathHandle, xr::Path>,
    action_sets: HashMap<ActionSetHandle, xr::ActionSet>,
    actions: HashMap<ActionHandle, TypedAction>,
    event_buffer: xr::EventDataBuffer,
}

impl OpenXrRuntime {
    /// Loads the system OpenXR loader. `graphics` binds sessions to the
    /// caller's current OpenGL context.
    pub fn load(graphics: xr::opengl::SessionCreateInfo) -> RuntimeResult<Self> {
        let entry = xr::Entry::load().map_err(|err| {
            log::error!("[xr] failed to load OpenXR loader: {err}");
            RuntimeFault::new(result_codes::ERROR_INITIALIZATION_FAILED)
        })?;
        Ok(Self {
            entry,
            graphics,
            next_handle: 1,
            instance: None,
            systems: HashMap::new(),
            session: None,
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            paths: HashMap::new(),
            action_sets: HashMap::new(),
            actions: HashMap::new(),
            event_buffer: xr::EventDataBuffer::new(),
        })
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn instance(&self, handle: InstanceHandle) -> RuntimeResult<&xr::Instance> {
        match &self.instance {
            Some((current, instance)) if *current == handle => Ok(instance),
            _ => Err(missing()),
        }
    }

    fn active(&self, handle: SessionHandle) -> RuntimeResult<&ActiveSession> {
        self.session
            .as_ref()
            .filter(|active| active.handle == handle)
            .ok_or_else(missing)
    }

    fn active_mut(&mut self, handle: SessionHandle) -> RuntimeResult<&mut ActiveSession> {
        self.session
            .as_mut()
            .filter(|active| active.handle == handle)
            .ok_or_else(missing)
    }

    fn path(&self, handle: PathHandle) -> RuntimeResult<xr::Path> {
        self.paths.get(&handle).copied().ok_or_else(missing)
    }

    fn system_id(&self, handle: SystemId) -> RuntimeResult<xr::SystemId> {
        self.systems.get(&handle).copied().ok_or_else(missing)
    }
}

impl XrRuntime for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<String>> {
        let available = self.entry.enumerate_extensions().map_err(fault)?;
        let mut names = Vec::new();
        if available.khr_opengl_enable {
            names.push(KHR_OPENGL_ENABLE.to_string());
        }
        if available.ext_debug_utils {
            names.push(DEBUG_UTILS.to_string());
        }
        names.extend(available.other.iter().cloned());
        Ok(names)
    }

    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayer>> {
        let layers = self.entry.enumerate_layers().map_err(fault)?;
        Ok(layers
            .into_iter()
            .map(|layer| ApiLayer {
                name: layer.layer_name,
                description: layer.description,
            })
            .collect())
    }

    fn create_instance(
        &mut self,
        application_name: &str,
        extensions: &[&str],
    ) -> RuntimeResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(RuntimeFault::new(result_codes::ERROR_LIMIT_REACHED));
        }
        let mut enabled = xr::ExtensionSet::default();
        for &name in extensions {
            match name {
                KHR_OPENGL_ENABLE => enabled.khr_opengl_enable = true,
                DEBUG_UTILS => enabled.ext_debug_utils = true,
                other => enabled.other.push(other.to_string()),
            }
        }
        let app_info = xr::ApplicationInfo {
            application_name,
            application_version: 1,
            engine_name: "theta_xr",
            engine_version: 1,
        };
        let instance = self
            .entry
            .create_instance(&app_info, &enabled, &[])
            .map_err(fault)?;
        let handle = InstanceHandle::from_raw(self.allocate());
        self.instance = Some((handle, instance));
        Ok(handle)
    }

    fn instance_properties(
        &mut self,
        instance: InstanceHandle,
    ) -> RuntimeResult<RuntimeProperties> {
        let properties = self.instance(instance)?.properties().map_err(fault)?;
        Ok(RuntimeProperties {
            runtime_name: properties.runtime_name,
            runtime_version: to_version(properties.runtime_version),
        })
    }

    fn result_to_string(&self, instance: InstanceHandle, code: RawResult) -> Option<String> {
        let instance = self.instance(instance).ok()?;
        let mut buffer = [0 as c_char; xr::sys::MAX_RESULT_STRING_SIZE];
        // SAFETY: the instance is live and the buffer holds the maximum
        // string size the runtime may write, terminator included.
        let result = unsafe {
            (instance.fp().result_to_string)(
                instance.as_raw(),
                xr::sys::Result::from_raw(code),
                buffer.as_mut_ptr(),
            )
        };
        if result != xr::sys::Result::SUCCESS {
            log::debug!("[xr] xrResultToString({code}) failed: {result:?}");
            return None;
        }
        // SAFETY: on success the runtime wrote a NUL-terminated string
        // inside the buffer.
        let text = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Some(text.to_string_lossy().into_owned())
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.instance(instance)?;
        // Children go first; the instance handle must outlive them.
        self.actions.clear();
        self.action_sets.clear();
        self.spaces.clear();
        self.swapchains.clear();
        self.session = None;
        self.paths.clear();
        self.systems.clear();
        self.instance = None;
        Ok(())
    }

    fn system(&mut self, instance: InstanceHandle) -> RuntimeResult<SystemId> {
        let system = self
            .instance(instance)?
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(fault)?;
        let handle = SystemId::from_raw(self.allocate());
        self.systems.insert(handle, system);
        Ok(handle)
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        let system = self.system_id(system)?;
        let properties = self
            .instance(instance)?
            .system_properties(system)
            .map_err(fault)?;
        Ok(SystemProperties {
            system_name: properties.system_name,
            max_layer_count: properties.graphics_properties.max_layer_count,
            max_swapchain_image_width: properties.graphics_properties.max_swapchain_image_width,
            max_swapchain_image_height: properties.graphics_properties.max_swapchain_image_height,
            orientation_tracking: properties.tracking_properties.orientation_tracking,
            position_tracking: properties.tracking_properties.position_tracking,
        })
    }

    fn enumerate_view_configs(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfig>> {
        let system = self.system_id(system)?;
        let views = self
            .instance(instance)?
            .enumerate_view_configuration_views(system, view_type(view_configuration))
            .map_err(fault)?;
        Ok(views
            .into_iter()
            .map(|view| ViewConfig {
                recommended_width: view.recommended_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                max_width: view.max_image_rect_width,
                max_height: view.max_image_rect_height,
                recommended_sample_count: view.recommended_swapchain_sample_count,
                max_sample_count: view.max_swapchain_sample_count,
            })
            .collect())
    }

    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        let system = self.system_id(system)?;
        let requirements = self
            .instance(instance)?
            .graphics_requirements::<xr::OpenGL>(system)
            .map_err(fault)?;
        Ok(GraphicsRequirements {
            min_api_version: to_version(requirements.min_api_version_supported),
            max_api_version: to_version(requirements.max_api_version_supported),
        })
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SessionHandle> {
        if self.session.is_some() {
            return Err(RuntimeFault::new(result_codes::ERROR_LIMIT_REACHED));
        }
        let system = self.system_id(system)?;
        let xr_instance = self.instance(instance)?;
        // SAFETY: the binding names a live GL context owned by the caller of
        // `load`, current on this thread for the lifetime of the session.
        let (session, waiter, stream) = unsafe {
            xr_instance
                .create_session::<xr::OpenGL>(system, &self.graphics)
                .map_err(fault)?
        };
        let handle = SessionHandle::from_raw(self.allocate());
        self.session = Some(ActiveSession {
            handle,
            session,
            waiter,
            stream,
        });
        Ok(handle)
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.active(session)?
            .session
            .begin(view_type(view_configuration))
            .map_err(fault)?;
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.active(session)?.session.end().map_err(fault)?;
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.active(session)?;
        self.spaces.clear();
        self.swapchains.clear();
        self.session = None;
        Ok(())
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>> {
        let spaces = self
            .active(session)?
            .session
            .enumerate_reference_spaces()
            .map_err(fault)?;
        Ok(spaces.into_iter().map(to_space_type).collect())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        let space = self
            .active(session)?
            .session
            .create_reference_space(from_space_type(space_type), from_pose(pose))
            .map_err(fault)?;
        let handle = SpaceHandle::from_raw(self.allocate());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: XrTime,
    ) -> RuntimeResult<SpaceLocation> {
        let target = self.spaces.get(&space).ok_or_else(missing)?;
        let base = self.spaces.get(&base).ok_or_else(missing)?;
        let location = target
            .locate(base, xr::Time::from_nanos(time.as_nanos()))
            .map_err(fault)?;
        Ok(SpaceLocation {
            pose: to_pose(location.pose),
            position_valid: location
                .location_flags
                .contains(xr::SpaceLocationFlags::POSITION_VALID),
            orientation_valid: location
                .location_flags
                .contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
        })
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        self.spaces.remove(&space).map(drop).ok_or_else(missing)
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>> {
        let formats = self
            .active(session)?
            .session
            .enumerate_swapchain_formats()
            .map_err(fault)?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle> {
        let format = u32::try_from(info.format)
            .map_err(|_| RuntimeFault::new(result_codes::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED))?;
        let mut usage_flags = xr::SwapchainUsageFlags::EMPTY;
        if info.usage.color_attachment {
            usage_flags |= xr::SwapchainUsageFlags::COLOR_ATTACHMENT;
        }
        if info.usage.sampled {
            usage_flags |= xr::SwapchainUsageFlags::SAMPLED;
        }
        let create_info = xr::SwapchainCreateInfo::<xr::OpenGL> {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags,
            format,
            sample_count: info.sample_count,
            width: info.width,
            height: info.height,
            face_count: info.face_count,
            array_size: info.array_size,
            mip_count: info.mip_count,
        };
        let swapchain = self
            .active(session)?
            .session
            .create_swapchain(&create_info)
            .map_err(fault)?;
        let handle = SwapchainHandle::from_raw(self.allocate());
        self.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    fn enumerate_swapchain_images(
        &mut self,
        swapchain: SwapchainHandle,
    ) -> RuntimeResult<Vec<SwapchainImage>> {
        let images = self
            .swapchains
            .get(&swapchain)
            .ok_or_else(missing)?
            .enumerate_images()
            .map_err(fault)?;
        Ok(images
            .into_iter()
            .map(|texture| SwapchainImage { texture })
            .collect())
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(missing)?
            .acquire_image()
            .map_err(fault)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: XrDuration,
    ) -> RuntimeResult<()> {
        let timeout = if timeout == XrDuration::INFINITE {
            xr::Duration::INFINITE
        } else {
            xr::Duration::from_nanos(timeout.as_nanos())
        };
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(missing)?
            .wait_image(timeout)
            .map_err(fault)
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(missing)?
            .release_image()
            .map_err(fault)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.swapchains
            .remove(&swapchain)
            .map(drop)
            .ok_or_else(missing)
    }

    fn string_to_path(
        &mut self,
        instance: InstanceHandle,
        path: &str,
    ) -> RuntimeResult<PathHandle> {
        let path = self.instance(instance)?.string_to_path(path).map_err(fault)?;
        if let Some((&handle, _)) = self.paths.iter().find(|(_, known)| **known == path) {
            return Ok(handle);
        }
        let handle = PathHandle::from_raw(self.allocate());
        self.paths.insert(handle, path);
        Ok(handle)
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> RuntimeResult<ActionSetHandle> {
        let action_set = self
            .instance(instance)?
            .create_action_set(name, localized_name, priority)
            .map_err(fault)?;
        let handle = ActionSetHandle::from_raw(self.allocate());
        self.action_sets.insert(handle, action_set);
        Ok(handle)
    }

    fn create_action(
        &mut self,
        action_set: ActionSetHandle,
        info: &ActionCreateInfo<'_>,
    ) -> RuntimeResult<ActionHandle> {
        let subaction_paths = info
            .subaction_paths
            .iter()
            .map(|path| self.path(*path))
            .collect::<RuntimeResult<Vec<_>>>()?;
        let set = self.action_sets.get(&action_set).ok_or_else(missing)?;
        let (name, localized, paths) = (info.name, info.localized_name, &subaction_paths[..]);
        let action = match info.action_type {
            ActionType::BooleanInput => {
                TypedAction::Boolean(set.create_action(name, localized, paths).map_err(fault)?)
            }
            ActionType::FloatInput => {
                TypedAction::Float(set.create_action(name, localized, paths).map_err(fault)?)
            }
            ActionType::PoseInput => {
                TypedAction::Pose(set.create_action(name, localized, paths).map_err(fault)?)
            }
            ActionType::VibrationOutput => {
                TypedAction::Vibration(set.create_action(name, localized, paths).map_err(fault)?)
            }
        };
        let handle = ActionHandle::from_raw(self.allocate());
        self.actions.insert(handle, action);
        Ok(handle)
    }

    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: PathHandle,
        bindings: &[SuggestedBinding],
    ) -> RuntimeResult<()> {
        let profile = self.path(profile)?;
        let mut suggested = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let path = self.path(binding.binding)?;
            let action = self.actions.get(&binding.action).ok_or_else(missing)?;
            suggested.push(action.binding(path));
        }
        self.instance(instance)?
            .suggest_interaction_profile_bindings(profile, &suggested)
            .map_err(fault)
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
        pose: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        let path = self.path(subaction_path)?;
        let session = self.active(session)?.session.clone();
        let space = match self.actions.get(&action).ok_or_else(missing)? {
            TypedAction::Pose(action) => action
                .create_space(session, path, from_pose(pose))
                .map_err(fault)?,
            _ => return Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH)),
        };
        let handle = SpaceHandle::from_raw(self.allocate());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> RuntimeResult<()> {
        let sets = action_sets
            .iter()
            .map(|handle| self.action_sets.get(handle).ok_or_else(missing))
            .collect::<RuntimeResult<Vec<_>>>()?;
        self.active(session)?
            .session
            .attach_action_sets(&sets)
            .map_err(fault)
    }

    fn sync_actions(
        &mut self,
        session: SessionHandle,
        action_set: ActionSetHandle,
    ) -> RuntimeResult<()> {
        let set = self.action_sets.get(&action_set).ok_or_else(missing)?;
        self.active(session)?
            .session
            .sync_actions(&[xr::ActiveActionSet::new(set)])
            .map_err(fault)
    }

    fn action_state_boolean(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<bool>> {
        let path = self.path(subaction_path)?;
        let session = &self.active(session)?.session;
        match self.actions.get(&action).ok_or_else(missing)? {
            TypedAction::Boolean(action) => {
                let state = action.state(session, path).map_err(fault)?;
                Ok(ActionState {
                    current_state: state.current_state,
                    is_active: state.is_active,
                })
            }
            _ => Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH)),
        }
    }

    fn action_state_float(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: PathHandle,
    ) -> RuntimeResult<ActionState<f32>> {
        let path = self.path(subaction_path)?;
        let session = &self.active(session)?.session;
        match self.actions.get(&action).ok_or_else(missing)? {
            TypedAction::Float(action) => {
                let state = action.state(session, path).map_err(fault)?;
                Ok(ActionState {
                    current_state: state.current_state,
                    is_active: state.is_active,
                })
            }
            _ => Err(RuntimeFault::new(result_codes::ERROR_ACTION_TYPE_MISMATCH)),
        }
    }

    fn destroy_action_set(&mut self, action_set: ActionSetHandle) -> RuntimeResult<()> {
        // Actions belong to a set, but the crate never destroys one without
        // the other, so every action goes with it.
        self.actions.clear();
        self.action_sets
            .remove(&action_set)
            .map(drop)
            .ok_or_else(missing)
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        let session = self.session.as_ref().map(|active| active.handle);
        let Some((current, xr_instance)) = &self.instance else {
            return Err(missing());
        };
        if *current != instance {
            return Err(missing());
        }
        let Some(event) = xr_instance
            .poll_event(&mut self.event_buffer)
            .map_err(fault)?
        else {
            return Ok(None);
        };
        let event = match event {
            xr::Event::SessionStateChanged(changed) => RuntimeEvent::SessionStateChanged {
                session: session.unwrap_or(SessionHandle::NULL),
                state: to_session_state(changed.state()),
                time: XrTime::from_nanos(changed.time().as_nanos()),
            },
            xr::Event::InstanceLossPending(pending) => RuntimeEvent::InstanceLossPending {
                loss_time: XrTime::from_nanos(pending.loss_time().as_nanos()),
            },
            xr::Event::EventsLost(lost) => RuntimeEvent::EventsLost {
                lost_event_count: lost.lost_event_count(),
            },
            xr::Event::ReferenceSpaceChangePending(pending) => {
                RuntimeEvent::ReferenceSpaceChangePending {
                    reference_space_type: to_space_type(pending.reference_space_type()),
                }
            }
            xr::Event::InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
            _ => RuntimeEvent::Other(0),
        };
        Ok(Some(event))
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
        let state = self.active_mut(session)?.waiter.wait().map_err(fault)?;
        Ok(FrameTiming {
            predicted_display_time: XrTime::from_nanos(state.predicted_display_time.as_nanos()),
            predicted_display_period: XrDuration::from_nanos(
                state.predicted_display_period.as_nanos(),
            ),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.active_mut(session)?.stream.begin().map_err(fault)
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> RuntimeResult<Vec<View>> {
        let space = self.spaces.get(&space).ok_or_else(missing)?;
        let (_, views) = self
            .active(session)?
            .session
            .locate_views(
                view_type(view_configuration),
                xr::Time::from_nanos(display_time.as_nanos()),
                space,
            )
            .map_err(fault)?;
        Ok(views
            .into_iter()
            .map(|view| View {
                pose: to_pose(view.pose),
                fov: to_fov(view.fov),
            })
            .collect())
    }

    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo<'_>) -> RuntimeResult<()> {
        let display_time = xr::Time::from_nanos(info.display_time.as_nanos());
        let blend = blend_mode(info.blend_mode);
        let spaces = &self.spaces;
        let swapchains = &self.swapchains;
        let active = self
            .session
            .as_mut()
            .filter(|active| active.handle == session)
            .ok_or_else(missing)?;

        let Some(layer) = info.layer else {
            return active.stream.end(display_time, blend, &[]).map_err(fault);
        };

        let space = spaces.get(&layer.space).ok_or_else(missing)?;
        let mut views = Vec::with_capacity(layer.views.len());
        for view in &layer.views {
            let swapchain = swapchains
                .get(&view.sub_image.swapchain)
                .ok_or_else(missing)?;
            let rect = view.sub_image.rect;
            let sub_image = xr::SwapchainSubImage::new()
                .swapchain(swapchain)
                .image_rect(xr::Rect2Di {
                    offset: xr::Offset2Di {
                        x: rect.offset.x,
                        y: rect.offset.y,
                    },
                    extent: xr::Extent2Di {
                        width: rect.extent.width,
                        height: rect.extent.height,
                    },
                })
                .image_array_index(view.sub_image.array_index);
            views.push(
                xr::CompositionLayerProjectionView::new()
                    .pose(from_pose(view.pose))
                    .fov(from_fov(view.fov))
                    .sub_image(sub_image),
            );
        }
        let projection = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&views);
        active
            .stream
            .end(display_time, blend, &[&projection])
            .map_err(fault)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::ptr;

    fn headless_graphics() -> xr::opengl::SessionCreateInfo {
        xr::opengl::SessionCreateInfo::Xlib {
            x_display: ptr::null_mut(),
            visualid: 0,
            glx_fb_config: ptr::null_mut(),
            glx_drawable: 0,
            glx_context: ptr::null_mut(),
        }
    }

    #[test]
    fn result_names_come_from_the_runtime() {
        let Ok(mut runtime) = OpenXrRuntime::load(headless_graphics()) else {
            eprintln!("[xr] no OpenXR loader installed; skipping");
            return;
        };
        assert_eq!(
            runtime.result_to_string(InstanceHandle::from_raw(1), result_codes::ERROR_RUNTIME_FAILURE),
            None
        );
        let Ok(instance) = runtime.create_instance("theta-xr-test", &[]) else {
            eprintln!("[xr] no OpenXR runtime available; skipping");
            return;
        };

        assert_eq!(
            runtime
                .result_to_string(instance, result_codes::ERROR_RUNTIME_FAILURE)
                .as_deref(),
            Some("XR_ERROR_RUNTIME_FAILURE")
        );
        runtime.destroy_instance(instance).expect("destroy instance");
    }
}
