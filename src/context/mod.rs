//! The session aggregate: one value per XR session, from `init` through
//! the frame loop to `teardown`.

use crate::config::ContextConfig;
use crate::error::{TeardownError, XrError, XrResult, invoke, teardown_steps};
use crate::input::{InputBindings, InputSample};
use crate::render::{FrameOrchestrator, FrameState, FrameStats, FrameTarget, LayerRenderer};
use crate::session::{ExitReason, PollOutcome, SessionStateMachine};
use crate::swapchain::SwapchainManager;
use crate::vr::{
    InstanceHandle, KHR_OPENGL_ENABLE, Pose, ReferenceSpaceType, SessionHandle, SessionState,
    SpaceHandle, SystemId, ViewConfig, ViewConfigurationType, XrRuntime, XrTime,
};

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Rendered(FrameState),
    /// Not ready to render; the loop backed off for the configured interval.
    Idle,
    Exit(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub ticks: u64,
    pub frames_rendered: u64,
    pub exit: Option<ExitReason>,
}

pub struct XrContext<R: XrRuntime> {
    runtime: R,
    config: ContextConfig,
    instance: InstanceHandle,
    system: SystemId,
    session: SessionHandle,
    stage_space: SpaceHandle,
    view_configs: Vec<ViewConfig>,
    input: Option<InputBindings>,
    swapchains: SwapchainManager,
    state: SessionStateMachine,
    frames: FrameOrchestrator,
    torn_down: bool,
}

impl<R: XrRuntime> XrContext<R> {
    /// Brings up instance, system, session, input, stage space and
    /// swapchains. Whatever was created is released again if a step fails.
    pub fn init(runtime: R, config: ContextConfig) -> XrResult<Self> {
        config.validate()?;
        let mut context = Self {
            runtime,
            swapchains: SwapchainManager::new(config.layout()),
            state: SessionStateMachine::new(config.stop_policy),
            frames: FrameOrchestrator::new(config.near_z, config.far_z, config.graphics_api),
            config,
            instance: InstanceHandle::NULL,
            system: SystemId::NULL,
            session: SessionHandle::NULL,
            stage_space: SpaceHandle::NULL,
            view_configs: Vec::new(),
            input: None,
            torn_down: false,
        };

        match context.bootstrap() {
            Ok(()) => Ok(context),
            Err(err) => {
                log::error!("[context] init failed: {err}");
                if let Err(cleanup) = context.teardown() {
                    log::warn!("[context] cleanup after failed init: {cleanup}");
                }
                Err(err)
            }
        }
    }

    fn bootstrap(&mut self) -> XrResult<()> {
        let debug = self.config.flags.debug;

        let extensions = invoke(
            &mut self.runtime,
            InstanceHandle::NULL,
            "xrEnumerateInstanceExtensionProperties",
            XrError::Enumeration,
            |rt| rt.enumerate_extensions(),
        )?;
        if debug {
            log::info!("[context] {} runtime extension(s):", extensions.len());
            for name in &extensions {
                log::info!("[context]   {name}");
            }
        }
        if !extensions.iter().any(|name| name == KHR_OPENGL_ENABLE) {
            log::error!("[context] runtime lacks {KHR_OPENGL_ENABLE}");
            return Err(XrError::MissingExtension(KHR_OPENGL_ENABLE));
        }

        if debug {
            let layers = invoke(
                &mut self.runtime,
                InstanceHandle::NULL,
                "xrEnumerateApiLayerProperties",
                XrError::Enumeration,
                |rt| rt.enumerate_api_layers(),
            )?;
            log::info!("[context] {} API layer(s):", layers.len());
            for layer in &layers {
                log::info!("[context]   {} - {}", layer.name, layer.description);
            }
        }

        let app_name = self.config.app_name.as_str();
        self.instance = invoke(
            &mut self.runtime,
            InstanceHandle::NULL,
            "xrCreateInstance",
            XrError::Creation,
            |rt| rt.create_instance(app_name, &[KHR_OPENGL_ENABLE]),
        )?;
        let instance = self.instance;

        if debug {
            let properties = invoke(
                &mut self.runtime,
                instance,
                "xrGetInstanceProperties",
                XrError::Enumeration,
                |rt| rt.instance_properties(instance),
            )?;
            log::info!(
                "[context] runtime {} {}",
                properties.runtime_name,
                properties.runtime_version
            );
        }

        self.system = invoke(
            &mut self.runtime,
            instance,
            "xrGetSystem",
            XrError::Creation,
            |rt| rt.system(instance),
        )?;
        let system = self.system;

        if debug {
            let properties = invoke(
                &mut self.runtime,
                instance,
                "xrGetSystemProperties",
                XrError::Enumeration,
                |rt| rt.system_properties(instance, system),
            )?;
            log::info!(
                "[context] system {}: max {} layer(s), max swapchain {}x{}, tracking orientation={} position={}",
                properties.system_name,
                properties.max_layer_count,
                properties.max_swapchain_image_width,
                properties.max_swapchain_image_height,
                properties.orientation_tracking,
                properties.position_tracking
            );
        }

        self.view_configs = invoke(
            &mut self.runtime,
            instance,
            "xrEnumerateViewConfigurationViews",
            XrError::Enumeration,
            |rt| rt.enumerate_view_configs(instance, system, ViewConfigurationType::PrimaryStereo),
        )?;
        if self.view_configs.is_empty() {
            return Err(XrError::NoViews);
        }
        if debug {
            for (index, view) in self.view_configs.iter().enumerate() {
                log::info!(
                    "[context] view {index}: recommended {}x{} (max {}x{}), samples {} (max {})",
                    view.recommended_width,
                    view.recommended_height,
                    view.max_width,
                    view.max_height,
                    view.recommended_sample_count,
                    view.max_sample_count
                );
            }
        }

        let requirements = invoke(
            &mut self.runtime,
            instance,
            "xrGetOpenGLGraphicsRequirementsKHR",
            XrError::Enumeration,
            |rt| rt.graphics_requirements(instance, system),
        )?;
        let actual = self.config.gl_version.as_api_version();
        if actual < requirements.min_api_version {
            log::error!(
                "[context] runtime needs OpenGL {} or newer, context is {actual}",
                requirements.min_api_version
            );
            return Err(XrError::UnsupportedGraphicsVersion {
                required: requirements.min_api_version,
                actual,
            });
        }
        if actual > requirements.max_api_version {
            log::warn!(
                "[context] OpenGL {actual} is newer than the runtime has validated ({})",
                requirements.max_api_version
            );
        }

        self.session = invoke(
            &mut self.runtime,
            instance,
            "xrCreateSession",
            XrError::Creation,
            |rt| rt.create_session(instance, system),
        )?;
        let session = self.session;

        self.input = Some(InputBindings::setup(&mut self.runtime, instance, session)?);

        if debug {
            let spaces = invoke(
                &mut self.runtime,
                instance,
                "xrEnumerateReferenceSpaces",
                XrError::Enumeration,
                |rt| rt.enumerate_reference_spaces(session),
            )?;
            log::info!("[context] reference spaces: {spaces:?}");
        }

        self.stage_space = invoke(
            &mut self.runtime,
            instance,
            "xrCreateReferenceSpace",
            XrError::Creation,
            |rt| rt.create_reference_space(session, ReferenceSpaceType::Stage, Pose::IDENTITY),
        )?;

        self.swapchains
            .create(&mut self.runtime, instance, session, &self.view_configs)?;

        log::info!(
            "[context] '{}' ready on {}: {} view(s), {} swapchain(s)",
            self.config.app_name,
            self.runtime.label(),
            self.view_configs.len(),
            self.swapchains.len()
        );
        Ok(())
    }

    fn frame_target(&self) -> XrResult<FrameTarget> {
        if self.session.is_null() {
            return Err(XrError::NotInitialized("session"));
        }
        Ok(FrameTarget {
            instance: self.instance,
            system: self.system,
            session: self.session,
            stage_space: self.stage_space,
        })
    }

    /// Polls the runtime event queue once.
    pub fn poll_events(&mut self) -> XrResult<PollOutcome> {
        let target = self.frame_target()?;
        self.state
            .poll_events(&mut self.runtime, target.instance, target.session)
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn sync_input(&mut self) -> XrResult<()> {
        let target = self.frame_target()?;
        let input = self.input.as_ref().ok_or(XrError::NotInitialized("input"))?;
        input.sync(&mut self.runtime, target.instance, target.session)
    }

    /// Controller state at `time`, relative to the stage space.
    pub fn sample_input(&mut self, time: XrTime) -> XrResult<InputSample> {
        let target = self.frame_target()?;
        let input = self.input.as_ref().ok_or(XrError::NotInitialized("input"))?;
        input.sample(
            &mut self.runtime,
            target.instance,
            target.session,
            target.stage_space,
            time,
        )
    }

    pub fn render_frame(&mut self, renderer: &mut dyn LayerRenderer) -> XrResult<FrameState> {
        let target = self.frame_target()?;
        self.frames.render_frame(
            &mut self.runtime,
            target,
            &mut self.view_configs,
            &mut self.swapchains,
            renderer,
        )
    }

    /// One loop iteration: poll, then sync and render if ready.
    pub fn tick(&mut self, renderer: &mut dyn LayerRenderer) -> XrResult<Tick> {
        if let PollOutcome::ExitRequested(reason) = self.poll_events()? {
            log::info!("[context] leaving frame loop: {reason}");
            return Ok(Tick::Exit(reason));
        }
        if !self.is_ready() {
            std::thread::sleep(self.config.idle_backoff());
            return Ok(Tick::Idle);
        }
        self.sync_input()?;
        let frame = self.render_frame(renderer)?;
        Ok(Tick::Rendered(frame))
    }

    /// Ticks until the runtime asks to exit or `max_frames` frames have
    /// been rendered.
    pub fn run(
        &mut self,
        renderer: &mut dyn LayerRenderer,
        max_frames: Option<u64>,
    ) -> XrResult<RunReport> {
        let mut report = RunReport::default();
        while max_frames.is_none_or(|limit| report.frames_rendered < limit) {
            report.ticks += 1;
            match self.tick(renderer)? {
                Tick::Rendered(_) => report.frames_rendered += 1,
                Tick::Idle => {}
                Tick::Exit(reason) => {
                    report.exit = Some(reason);
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Releases everything `init` created, in reverse dependency order.
    ///
    /// Every step runs even if an earlier one failed; the error carries a
    /// bit per failed step. Calling it again is a no-op.
    pub fn teardown(&mut self) -> Result<(), TeardownError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let mut failures = TeardownError::new();
        let instance = self.instance;

        if let Err(err) = self.swapchains.destroy(&mut self.runtime, instance) {
            failures.record(teardown_steps::SWAPCHAINS, err);
        }

        if !self.session.is_null() {
            if let Err(err) = self
                .state
                .end_session(&mut self.runtime, instance, self.session)
            {
                failures.record(teardown_steps::END_SESSION, err);
            }
        }

        if let Some(input) = self.input.as_mut() {
            if let Err(err) = input.destroy_spaces(&mut self.runtime, instance) {
                failures.record(teardown_steps::HAND_SPACES, err);
            }
        }

        if !self.stage_space.is_null() {
            let stage = std::mem::replace(&mut self.stage_space, SpaceHandle::NULL);
            if let Err(err) = invoke(
                &mut self.runtime,
                instance,
                "xrDestroySpace",
                XrError::Destroy,
                |rt| rt.destroy_space(stage),
            ) {
                failures.record(teardown_steps::STAGE_SPACE, err);
            }
        }

        if let Some(mut input) = self.input.take() {
            if let Err(err) = input.destroy_action_set(&mut self.runtime, instance) {
                failures.record(teardown_steps::ACTION_SET, err);
            }
        }

        if !self.session.is_null() {
            let session = std::mem::replace(&mut self.session, SessionHandle::NULL);
            if let Err(err) = invoke(
                &mut self.runtime,
                instance,
                "xrDestroySession",
                XrError::Destroy,
                |rt| rt.destroy_session(session),
            ) {
                failures.record(teardown_steps::SESSION, err);
            }
        }

        if !instance.is_null() {
            self.instance = InstanceHandle::NULL;
            // The instance is going away; describe failures without it.
            if let Err(err) = invoke(
                &mut self.runtime,
                InstanceHandle::NULL,
                "xrDestroyInstance",
                XrError::Destroy,
                |rt| rt.destroy_instance(instance),
            ) {
                failures.record(teardown_steps::INSTANCE, err);
            }
        }

        match failures.into_result() {
            Ok(()) => {
                log::info!("[context] torn down cleanly");
                Ok(())
            }
            Err(err) => {
                log::error!("[context] {err}");
                Err(err)
            }
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn instance(&self) -> InstanceHandle {
        self.instance
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn stage_space(&self) -> SpaceHandle {
        self.stage_space
    }

    pub fn view_configs(&self) -> &[ViewConfig] {
        &self.view_configs
    }

    pub fn swapchains(&self) -> &SwapchainManager {
        &self.swapchains
    }

    pub fn input(&self) -> Option<&InputBindings> {
        self.input.as_ref()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.state()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frames.stats()
    }

    pub fn last_submitted(&self) -> Option<&FrameState> {
        self.frames.last_submitted()
    }
}

impl<R: XrRuntime> Drop for XrContext<R> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::error!("[context] teardown on drop failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{FrameContext, LayerError, ViewDescriptor};
    use crate::vr::simulated::RuntimeCall;
    use crate::vr::{ApiVersion, SimulatedRuntime, result_codes};

    fn stub(_: &mut FrameContext<'_>, _: &[ViewDescriptor]) -> Result<(), LayerError> {
        Ok(())
    }

    #[test]
    fn missing_opengl_extension_fails_before_instance() {
        let mut runtime =
            SimulatedRuntime::default().with_extensions(vec!["XR_EXT_debug_utils".into()]);
        let result = XrContext::init(&mut runtime, ContextConfig::default());

        assert!(matches!(
            result.err(),
            Some(XrError::MissingExtension(KHR_OPENGL_ENABLE))
        ));
        assert_eq!(runtime.call_count(RuntimeCall::CreateInstance), 0);
    }

    #[test]
    fn old_gl_context_is_rejected_and_cleaned_up() {
        let mut runtime =
            SimulatedRuntime::default().with_min_graphics_version(ApiVersion::new(4, 6, 0));
        let mut config = ContextConfig::default();
        config.gl_version.major = 3;
        config.gl_version.minor = 3;

        let err = XrContext::init(&mut runtime, config).err().expect("init must fail");

        assert!(matches!(err, XrError::UnsupportedGraphicsVersion { .. }));
        assert_ne!(err.code(), 0);
        assert!(!runtime.has_instance());
        assert_eq!(runtime.call_count(RuntimeCall::CreateSession), 0);
    }

    #[test]
    fn late_init_failure_releases_earlier_resources() {
        let mut runtime = SimulatedRuntime::default();
        runtime.fail_next(RuntimeCall::CreateSwapchain, result_codes::ERROR_OUT_OF_MEMORY);

        let err = XrContext::init(&mut runtime, ContextConfig::default())
            .err()
            .expect("init must fail");

        assert!(matches!(err, XrError::Creation(_)));
        assert!(!runtime.has_session());
        assert!(!runtime.has_instance());
        assert_eq!(runtime.live_spaces(), 0);
        assert_eq!(runtime.call_count(RuntimeCall::DestroyActionSet), 1);
    }

    #[test]
    fn debug_flag_dumps_runtime_details() {
        let mut runtime = SimulatedRuntime::default();
        let mut config = ContextConfig::default();
        config.flags.debug = true;

        let mut context = XrContext::init(&mut runtime, config).expect("init");
        context.teardown().expect("teardown");
        drop(context);

        assert_eq!(runtime.call_count(RuntimeCall::EnumerateApiLayers), 1);
        assert_eq!(runtime.call_count(RuntimeCall::InstanceProperties), 1);
        assert_eq!(runtime.call_count(RuntimeCall::SystemProperties), 1);
        assert_eq!(runtime.call_count(RuntimeCall::EnumerateReferenceSpaces), 1);
    }

    #[test]
    fn idle_until_ready_then_renders() {
        let mut config = ContextConfig::default();
        config.idle_backoff_ms = 0;
        let mut context = XrContext::init(SimulatedRuntime::default(), config).expect("init");
        let mut renderer = stub;

        // IDLE arrives first, READY second.
        assert_eq!(context.tick(&mut renderer).expect("tick"), Tick::Idle);
        assert!(matches!(
            context.tick(&mut renderer).expect("tick"),
            Tick::Rendered(_)
        ));
        assert!(context.is_ready());
        assert_eq!(context.session_state(), SessionState::Ready);
    }

    #[test]
    fn run_stops_at_frame_limit() {
        let mut config = ContextConfig::default();
        config.idle_backoff_ms = 0;
        let mut context = XrContext::init(SimulatedRuntime::default(), config).expect("init");
        let mut renderer = stub;

        let report = context.run(&mut renderer, Some(4)).expect("run");

        assert_eq!(report.frames_rendered, 4);
        assert_eq!(report.exit, None);
        assert_eq!(context.frame_stats().submitted, 4);
    }

    #[test]
    fn run_exits_when_runtime_requests_it() {
        let mut config = ContextConfig::default();
        config.idle_backoff_ms = 0;
        let mut runtime = SimulatedRuntime::default().without_auto_lifecycle();
        let mut context = XrContext::init(&mut runtime, config).expect("init");
        context.runtime_mut().push_state(SessionState::Ready);
        context.runtime_mut().push_state(SessionState::Exiting);
        let mut renderer = stub;

        let report = context.run(&mut renderer, None).expect("run");

        assert_eq!(report.exit, Some(ExitReason::SessionExiting));
        assert_eq!(report.frames_rendered, 1);
    }

    #[test]
    fn teardown_is_idempotent_and_ends_running_session() {
        let mut config = ContextConfig::default();
        config.idle_backoff_ms = 0;
        let mut runtime = SimulatedRuntime::default();
        {
            let mut context = XrContext::init(&mut runtime, config).expect("init");
            let mut renderer = stub;
            context.run(&mut renderer, Some(1)).expect("run");
            context.teardown().expect("teardown");
            context.teardown().expect("second teardown");
            assert!(matches!(
                context.render_frame(&mut renderer),
                Err(XrError::NotInitialized(_))
            ));
        }
        assert_eq!(runtime.call_count(RuntimeCall::EndSession), 1);
        assert_eq!(runtime.call_count(RuntimeCall::DestroyInstance), 1);
        assert!(!runtime.has_instance());
    }

    #[test]
    fn teardown_accumulates_failed_steps() {
        let mut config = ContextConfig::default();
        config.idle_backoff_ms = 0;
        let mut runtime = SimulatedRuntime::default();
        let mut context = XrContext::init(&mut runtime, config).expect("init");
        context
            .runtime_mut()
            .fail_next(RuntimeCall::DestroySwapchain, result_codes::ERROR_RUNTIME_FAILURE);
        context
            .runtime_mut()
            .fail_next(RuntimeCall::DestroySession, result_codes::ERROR_RUNTIME_FAILURE);

        let err = context.teardown().unwrap_err();

        assert_eq!(
            err.code(),
            teardown_steps::SWAPCHAINS | teardown_steps::SESSION
        );
        assert_eq!(err.failures().len(), 2);
        drop(context);
        assert_eq!(runtime.call_count(RuntimeCall::DestroyInstance), 1);
    }

    #[test]
    fn drop_tears_down() {
        let mut runtime = SimulatedRuntime::default();
        drop(XrContext::init(&mut runtime, ContextConfig::default()).expect("init"));
        assert!(!runtime.has_instance());
        assert_eq!(runtime.live_swapchains(), 0);
    }
}
