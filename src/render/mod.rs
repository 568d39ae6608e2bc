//! Per-frame protocol: wait, begin, locate, render, end.
//!
//! [`FrameOrchestrator::render_frame`] owns the call ordering the runtime
//! requires. The caller only supplies a [`LayerRenderer`], which draws into
//! the sub-images it is handed through a [`FrameContext`].

use crate::error::{XrError, XrResult, invoke};
use crate::math::{self, GraphicsApi, Mat4};
use crate::swapchain::{AcquiredImage, DepthTargetCache, SwapchainManager};
use crate::vr::{
    EnvironmentBlendMode, FrameEndInfo, FrameTiming, Fov, InstanceHandle, Pose, ProjectionLayer,
    ProjectionView, SessionHandle, SpaceHandle, SubImage, SwapchainImage, SystemId, ViewConfig,
    ViewConfigurationType, XrDuration, XrRuntime, XrTime,
};
use thiserror::Error;

/// Handles the frame loop needs from the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTarget {
    pub instance: InstanceHandle,
    pub system: SystemId,
    pub session: SessionHandle,
    pub stage_space: SpaceHandle,
}

/// Everything a renderer needs to draw one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewDescriptor {
    pub index: usize,
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SubImage,
    /// Swapchain this view renders into; shared by all views when
    /// double-wide.
    pub swapchain_index: usize,
    /// Projection times inverse view pose, column-major.
    pub view_projection: Mat4,
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("renderer skipped the frame: {0}")]
    Skipped(String),
    #[error(transparent)]
    Xr(#[from] XrError),
}

/// Access to the frame's swapchains while a renderer runs.
///
/// Each swapchain is acquired from the runtime at most once per frame. When
/// several views share one (double-wide), the first acquire reaches the
/// runtime and the image goes back only once every sharing view released it.
pub struct FrameContext<'a> {
    runtime: &'a mut dyn XrRuntime,
    instance: InstanceHandle,
    swapchains: &'a mut SwapchainManager,
    depth_targets: &'a mut DepthTargetCache,
    timing: FrameTiming,
    /// Swapchain index of each view, by view index.
    view_swapchains: Vec<usize>,
    released: Vec<bool>,
    acquired_this_frame: Vec<bool>,
}

impl FrameContext<'_> {
    pub fn predicted_display_time(&self) -> XrTime {
        self.timing.predicted_display_time
    }

    pub fn predicted_display_period(&self) -> XrDuration {
        self.timing.predicted_display_period
    }

    pub fn runtime_label(&self) -> &'static str {
        self.runtime.label()
    }

    /// Acquires the image `view` renders into. Views sharing a swapchain get
    /// the image already held instead of a second acquire.
    ///
    /// Fails with [`XrError::SwapchainReacquired`] if the swapchain was
    /// already acquired this frame and is no longer held.
    pub fn acquire(&mut self, view: &ViewDescriptor) -> XrResult<AcquiredImage> {
        let index = view.swapchain_index;
        if let Some(released) = self.released.get_mut(view.index) {
            *released = false;
        }
        let held = self.swapchains.swapchains().get(index).and_then(|chain| {
            chain
                .acquired_index()
                .zip(chain.acquired_image())
                .map(|(image_index, image)| AcquiredImage { image_index, image })
        });
        if let Some(image) = held {
            return Ok(image);
        }
        match self.acquired_this_frame.get_mut(index) {
            Some(true) => {
                log::warn!("[render] swapchain {index} acquired twice in one frame");
                Err(XrError::SwapchainReacquired(index))
            }
            Some(acquired) => {
                *acquired = true;
                self.swapchains
                    .acquire_image(&mut *self.runtime, self.instance, index)
            }
            None => Err(XrError::NotInitialized("swapchain")),
        }
    }

    /// Marks `view` as done with its image. The runtime release happens once
    /// no other view of the same swapchain still draws into it.
    pub fn release(&mut self, view: &ViewDescriptor) -> XrResult<()> {
        let index = view.swapchain_index;
        if let Some(released) = self.released.get_mut(view.index) {
            *released = true;
        }
        let shared_open = self
            .view_swapchains
            .iter()
            .zip(&self.released)
            .any(|(&chain, &released)| chain == index && !released);
        if shared_open || !self.swapchains.is_acquired(index) {
            return Ok(());
        }
        self.swapchains
            .release_image(&mut *self.runtime, self.instance, index)
    }

    pub fn swapchain_images(&self, view: &ViewDescriptor) -> &[SwapchainImage] {
        self.swapchains
            .swapchains()
            .get(view.swapchain_index)
            .map(|chain| chain.images.as_slice())
            .unwrap_or(&[])
    }

    pub fn depth_targets(&mut self) -> &mut DepthTargetCache {
        &mut *self.depth_targets
    }
}

/// Draws one projection layer.
///
/// `Ok` submits the layer; `Err` skips this frame without ending the loop.
pub trait LayerRenderer {
    fn render_layer(
        &mut self,
        frame: &mut FrameContext<'_>,
        views: &[ViewDescriptor],
    ) -> Result<(), LayerError>;
}

impl<F> LayerRenderer for F
where
    F: FnMut(&mut FrameContext<'_>, &[ViewDescriptor]) -> Result<(), LayerError>,
{
    fn render_layer(
        &mut self,
        frame: &mut FrameContext<'_>,
        views: &[ViewDescriptor],
    ) -> Result<(), LayerError> {
        self(frame, views)
    }
}

/// Record of one frame, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub predicted_display_time: XrTime,
    pub predicted_display_period: XrDuration,
    pub should_render: bool,
    pub views: Vec<ViewDescriptor>,
    pub layer_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frames: u64,
    pub submitted: u64,
    pub skipped: u64,
    pub non_monotonic_times: u64,
}

#[derive(Debug)]
pub struct FrameOrchestrator {
    view_type: ViewConfigurationType,
    near_z: f32,
    far_z: f32,
    graphics_api: GraphicsApi,
    depth_targets: DepthTargetCache,
    swapchain_generation: u64,
    last_display_time: Option<XrTime>,
    last_submitted: Option<FrameState>,
    stats: FrameStats,
}

impl FrameOrchestrator {
    pub fn new(near_z: f32, far_z: f32, graphics_api: GraphicsApi) -> Self {
        Self {
            view_type: ViewConfigurationType::PrimaryStereo,
            near_z,
            far_z,
            graphics_api,
            depth_targets: DepthTargetCache::new(),
            swapchain_generation: 0,
            last_display_time: None,
            last_submitted: None,
            stats: FrameStats::default(),
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn last_submitted(&self) -> Option<&FrameState> {
        self.last_submitted.as_ref()
    }

    pub fn depth_targets(&self) -> &DepthTargetCache {
        &self.depth_targets
    }

    /// Runs one frame bracket.
    ///
    /// Once `begin_frame` succeeds, `end_frame` is always called, with zero
    /// layers if anything in between failed or the renderer declined.
    pub fn render_frame<R>(
        &mut self,
        runtime: &mut R,
        target: FrameTarget,
        view_configs: &mut Vec<ViewConfig>,
        swapchains: &mut SwapchainManager,
        renderer: &mut dyn LayerRenderer,
    ) -> XrResult<FrameState>
    where
        R: XrRuntime,
    {
        let FrameTarget {
            instance, session, ..
        } = target;
        self.stats.frames += 1;

        let timing = invoke(runtime, instance, "xrWaitFrame", XrError::Frame, |rt| {
            rt.wait_frame(session)
        })?;
        self.track_display_time(timing.predicted_display_time);

        invoke(runtime, instance, "xrBeginFrame", XrError::Frame, |rt| {
            rt.begin_frame(session)
        })?;

        let mut deferred = None;
        let (mut layer, views) =
            match self.compose(runtime, target, &timing, view_configs, swapchains, renderer) {
                Ok(composed) => composed,
                Err(err) => {
                    deferred = Some(err);
                    (None, Vec::new())
                }
            };

        if let Err(err) = swapchains.release_all(runtime, instance) {
            layer = None;
            deferred.get_or_insert(err);
        }

        let info = FrameEndInfo {
            display_time: timing.predicted_display_time,
            blend_mode: EnvironmentBlendMode::Opaque,
            layer: layer.as_ref(),
        };
        let layer_count = info.layer_count();
        let ended = invoke(runtime, instance, "xrEndFrame", XrError::Frame, |rt| {
            rt.end_frame(session, &info)
        });
        if let Some(err) = deferred {
            self.stats.skipped += 1;
            return Err(err);
        }
        ended?;

        let state = FrameState {
            predicted_display_time: timing.predicted_display_time,
            predicted_display_period: timing.predicted_display_period,
            should_render: timing.should_render,
            views,
            layer_count,
        };
        if layer_count > 0 {
            self.stats.submitted += 1;
            self.last_submitted = Some(state.clone());
        } else {
            self.stats.skipped += 1;
        }
        Ok(state)
    }

    /// Steps between begin and end: resize check, view location, sub-image
    /// assignment and the renderer call.
    fn compose<R>(
        &mut self,
        runtime: &mut R,
        target: FrameTarget,
        timing: &FrameTiming,
        view_configs: &mut Vec<ViewConfig>,
        swapchains: &mut SwapchainManager,
        renderer: &mut dyn LayerRenderer,
    ) -> XrResult<(Option<ProjectionLayer>, Vec<ViewDescriptor>)>
    where
        R: XrRuntime,
    {
        let FrameTarget {
            instance,
            system,
            session,
            stage_space,
        } = target;
        let view_type = self.view_type;

        let current = invoke(
            runtime,
            instance,
            "xrEnumerateViewConfigurationViews",
            XrError::Enumeration,
            |rt| rt.enumerate_view_configs(instance, system, view_type),
        )?;
        if current.is_empty() {
            log::warn!("[render] runtime reported no views; submitting nothing");
            return Ok((None, Vec::new()));
        }
        if current != *view_configs || swapchains.needs_resize(&current) {
            log::info!(
                "[render] view configuration changed ({} -> {} views); recreating swapchains",
                view_configs.len(),
                current.len()
            );
            swapchains.create(runtime, instance, session, &current)?;
            *view_configs = current;
        }
        if swapchains.generation() != self.swapchain_generation {
            self.swapchain_generation = swapchains.generation();
            let stale = self.depth_targets.clear();
            if !stale.is_empty() {
                log::debug!("[render] dropped {} depth target(s)", stale.len());
            }
        }

        let located = invoke(runtime, instance, "xrLocateViews", XrError::Frame, |rt| {
            rt.locate_views(session, view_type, timing.predicted_display_time, stage_space)
        })?;
        let sub_images = swapchains.sub_images(located.len());
        let views: Vec<ViewDescriptor> = located
            .iter()
            .zip(sub_images)
            .enumerate()
            .map(|(index, (view, sub_image))| ViewDescriptor {
                index,
                pose: view.pose,
                fov: view.fov,
                sub_image,
                swapchain_index: swapchains.swapchain_index_for_view(index),
                view_projection: math::view_projection(
                    &view.pose,
                    &view.fov,
                    self.near_z,
                    self.far_z,
                    self.graphics_api,
                ),
            })
            .collect();

        if !timing.should_render || views.is_empty() {
            return Ok((None, views));
        }

        let chain_count = swapchains.len();
        let mut frame = FrameContext {
            runtime: &mut *runtime,
            instance,
            swapchains: &mut *swapchains,
            depth_targets: &mut self.depth_targets,
            timing: *timing,
            view_swapchains: views.iter().map(|view| view.swapchain_index).collect(),
            released: vec![false; views.len()],
            acquired_this_frame: vec![false; chain_count],
        };
        match renderer.render_layer(&mut frame, &views) {
            Ok(()) => {
                let layer = ProjectionLayer {
                    space: stage_space,
                    views: views
                        .iter()
                        .map(|view| ProjectionView {
                            pose: view.pose,
                            fov: view.fov,
                            sub_image: view.sub_image,
                        })
                        .collect(),
                };
                Ok((Some(layer), views))
            }
            Err(err) => {
                log::warn!("[render] {err}; frame submitted without layers");
                Ok((None, views))
            }
        }
    }

    fn track_display_time(&mut self, time: XrTime) {
        if let Some(last) = self.last_display_time {
            if time <= last {
                self.stats.non_monotonic_times += 1;
                log::warn!(
                    "[render] predicted display time did not advance ({} ns after {} ns)",
                    time.as_nanos(),
                    last.as_nanos()
                );
            }
        }
        self.last_display_time = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::SwapchainLayout;
    use crate::vr::simulated::RuntimeCall;
    use crate::vr::{ReferenceSpaceType, SimulatedRuntime, result_codes};

    struct Harness {
        runtime: SimulatedRuntime,
        target: FrameTarget,
        view_configs: Vec<ViewConfig>,
        swapchains: SwapchainManager,
        orchestrator: FrameOrchestrator,
    }

    impl Harness {
        fn new(layout: SwapchainLayout) -> Self {
            let views = vec![ViewConfig::from_resolution(800, 600); 2];
            let mut runtime = SimulatedRuntime::default().with_view_configs(views.clone());
            let instance = runtime.create_instance("frame-test", &[]).expect("instance");
            let system = runtime.system(instance).expect("system");
            let session = runtime.create_session(instance, system).expect("session");
            runtime
                .begin_session(session, ViewConfigurationType::PrimaryStereo)
                .expect("begin");
            let stage_space = runtime
                .create_reference_space(session, ReferenceSpaceType::Stage, Pose::IDENTITY)
                .expect("stage");
            let mut swapchains = SwapchainManager::new(layout);
            swapchains
                .create(&mut runtime, instance, session, &views)
                .expect("swapchains");
            Self {
                runtime,
                target: FrameTarget {
                    instance,
                    system,
                    session,
                    stage_space,
                },
                view_configs: views,
                swapchains,
                orchestrator: FrameOrchestrator::new(0.05, 100.0, GraphicsApi::OpenGl),
            }
        }

        fn frame(&mut self, renderer: &mut dyn LayerRenderer) -> XrResult<FrameState> {
            self.orchestrator.render_frame(
                &mut self.runtime,
                self.target,
                &mut self.view_configs,
                &mut self.swapchains,
                renderer,
            )
        }
    }

    fn draw_all(
        frame: &mut FrameContext<'_>,
        views: &[ViewDescriptor],
    ) -> Result<(), LayerError> {
        for view in views {
            frame.acquire(view)?;
            frame.release(view)?;
        }
        Ok(())
    }

    #[test]
    fn successful_render_submits_one_layer() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut renderer = draw_all;

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(state.layer_count, 1);
        assert_eq!(state.views.len(), 2);
        let submitted = harness.runtime.submitted_frames();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].layer_count, 1);
        assert_eq!(submitted[0].views.len(), 2);
        assert_eq!(harness.orchestrator.stats().submitted, 1);
        assert!(harness.orchestrator.last_submitted().is_some());
    }

    #[test]
    fn renderer_failure_skips_submission() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut renderer = |_: &mut FrameContext<'_>, _: &[ViewDescriptor]| -> Result<(), LayerError> {
            Err(LayerError::Skipped("no scene".into()))
        };

        let state = harness.frame(&mut renderer).expect("frame still completes");

        assert_eq!(state.layer_count, 0);
        assert_eq!(harness.runtime.submitted_frames()[0].layer_count, 0);
        assert_eq!(harness.orchestrator.stats().skipped, 1);
        assert!(harness.orchestrator.last_submitted().is_none());
    }

    #[test]
    fn images_left_acquired_are_released_before_end() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut renderer = |frame: &mut FrameContext<'_>, views: &[ViewDescriptor]| -> Result<(), LayerError> {
            for view in views {
                frame.acquire(view)?;
            }
            Ok(())
        };

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(state.layer_count, 1);
        assert_eq!(
            harness.runtime.call_count(RuntimeCall::ReleaseSwapchainImage),
            2
        );
    }

    #[test]
    fn double_wide_views_share_one_acquire() {
        let mut harness = Harness::new(SwapchainLayout::DoubleWide);
        let mut renderer = draw_all;

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(state.views[0].sub_image.rect.offset.x, 0);
        assert_eq!(state.views[1].sub_image.rect.offset.x, 800);
        assert_eq!(state.views[1].sub_image.rect.extent.width, 800);
        assert_eq!(state.views[0].swapchain_index, 0);
        assert_eq!(state.views[1].swapchain_index, 0);
        assert_eq!(
            harness.runtime.call_count(RuntimeCall::AcquireSwapchainImage),
            1
        );
        assert_eq!(
            harness.runtime.call_count(RuntimeCall::ReleaseSwapchainImage),
            1
        );
        assert_eq!(state.layer_count, 1);
    }

    #[test]
    fn double_wide_release_waits_for_the_last_view() {
        let mut harness = Harness::new(SwapchainLayout::DoubleWide);
        let mut images = Vec::new();
        let mut held_after_first_release = false;
        let mut renderer = |frame: &mut FrameContext<'_>, views: &[ViewDescriptor]| -> Result<(), LayerError> {
            images.push(frame.acquire(&views[0])?.image);
            frame.release(&views[0])?;
            held_after_first_release = frame.swapchains.is_acquired(0);
            images.push(frame.acquire(&views[1])?.image);
            frame.release(&views[1])?;
            Ok(())
        };

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(state.layer_count, 1);
        assert!(held_after_first_release);
        assert_eq!(images[0], images[1]);
        assert_eq!(
            harness.runtime.call_count(RuntimeCall::ReleaseSwapchainImage),
            1
        );
    }

    #[test]
    fn second_acquire_after_release_is_refused() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut refused = None;
        let mut renderer = |frame: &mut FrameContext<'_>, views: &[ViewDescriptor]| -> Result<(), LayerError> {
            frame.acquire(&views[0])?;
            frame.release(&views[0])?;
            refused = frame.acquire(&views[0]).err();
            Ok(())
        };

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(refused, Some(XrError::SwapchainReacquired(0)));
        assert_eq!(state.layer_count, 1);
        assert_eq!(
            harness.runtime.call_count(RuntimeCall::AcquireSwapchainImage),
            1
        );
    }

    #[test]
    fn failed_image_wait_recovers_next_frame() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        harness.runtime.fail_next(
            RuntimeCall::WaitSwapchainImage,
            result_codes::ERROR_RUNTIME_FAILURE,
        );
        let mut renderer = draw_all;

        let first = harness.frame(&mut renderer).expect("frame closes despite the fault");
        assert_eq!(first.layer_count, 0);
        assert!(!harness.swapchains.is_acquired(0));

        let second = harness.frame(&mut renderer).expect("recovered frame");
        assert_eq!(second.layer_count, 1);
        let submitted = harness.runtime.submitted_frames();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].layer_count, 1);
    }

    #[test]
    fn should_render_false_never_calls_renderer() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        harness.runtime.set_should_render(false);
        let mut calls = 0;
        let mut renderer = |_: &mut FrameContext<'_>, _: &[ViewDescriptor]| -> Result<(), LayerError> {
            calls += 1;
            Ok(())
        };

        let state = harness.frame(&mut renderer).expect("frame");

        assert_eq!(state.layer_count, 0);
        assert_eq!(calls, 0);
        assert_eq!(harness.runtime.call_count(RuntimeCall::EndFrame), 1);
    }

    #[test]
    fn locate_failure_still_ends_the_frame() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        harness
            .runtime
            .fail_next(RuntimeCall::LocateViews, result_codes::ERROR_TIME_INVALID);
        let mut renderer = draw_all;

        let err = harness.frame(&mut renderer).unwrap_err();

        assert!(matches!(err, XrError::Frame(_)));
        assert_eq!(harness.runtime.call_count(RuntimeCall::EndFrame), 1);
        assert_eq!(harness.runtime.submitted_frames()[0].layer_count, 0);

        // The bracket was closed, so the next frame runs normally.
        let state = harness.frame(&mut renderer).expect("recovered frame");
        assert_eq!(state.layer_count, 1);
    }

    #[test]
    fn wait_failure_skips_the_bracket() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        harness
            .runtime
            .fail_next(RuntimeCall::WaitFrame, result_codes::ERROR_SESSION_LOST);
        let mut renderer = draw_all;

        let err = harness.frame(&mut renderer).unwrap_err();

        assert_eq!(err.code(), result_codes::ERROR_SESSION_LOST);
        assert_eq!(harness.runtime.call_count(RuntimeCall::BeginFrame), 0);
        assert_eq!(harness.runtime.call_count(RuntimeCall::EndFrame), 0);
    }

    #[test]
    fn resize_recreates_swapchains_and_clears_depth_cache() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut renderer = |frame: &mut FrameContext<'_>, views: &[ViewDescriptor]| -> Result<(), LayerError> {
            for view in views {
                let acquired = frame.acquire(view)?;
                frame.depth_targets().get_or_insert_with(acquired.image, || 1);
                frame.release(view)?;
            }
            Ok(())
        };
        harness.frame(&mut renderer).expect("first frame");
        assert_eq!(harness.orchestrator.depth_targets().len(), 2);

        harness
            .runtime
            .set_view_configs(vec![ViewConfig::from_resolution(1024, 768); 2]);
        harness
            .frame(&mut |_: &mut FrameContext<'_>, _: &[ViewDescriptor]| -> Result<(), LayerError> {
                Ok(())
            })
            .expect("resized frame");

        assert!(harness.orchestrator.depth_targets().is_empty());
        assert!(harness.swapchains.swapchains().iter().all(|c| c.width == 1024));
        assert_eq!(harness.view_configs[0].recommended_width, 1024);
    }

    #[test]
    fn view_projection_matches_math() {
        let mut harness = Harness::new(SwapchainLayout::PerView);
        let mut renderer = draw_all;
        let state = harness.frame(&mut renderer).expect("frame");
        let view = &state.views[0];
        let expected =
            math::view_projection(&view.pose, &view.fov, 0.05, 100.0, GraphicsApi::OpenGl);
        assert_eq!(view.view_projection, expected);
    }

    #[test]
    fn stalled_display_time_is_counted() {
        let mut orchestrator = FrameOrchestrator::new(0.05, 100.0, GraphicsApi::OpenGl);
        orchestrator.track_display_time(XrTime::from_nanos(10));
        orchestrator.track_display_time(XrTime::from_nanos(20));
        orchestrator.track_display_time(XrTime::from_nanos(20));
        orchestrator.track_display_time(XrTime::from_nanos(15));
        assert_eq!(orchestrator.stats().non_monotonic_times, 2);
    }
}
