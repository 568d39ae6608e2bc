use theta_xr::error::teardown_steps;
use theta_xr::render::{FrameContext, LayerError, ViewDescriptor};
use theta_xr::swapchain::{GL_SRGB8, GL_SRGB8_ALPHA8};
use theta_xr::vr::simulated::RuntimeCall;
use theta_xr::vr::{SessionState, SwapchainImage, ViewConfig, result_codes};
use theta_xr::{
    ContextConfig, SimulatedRuntime, StopPolicy, SwapchainLayout, Tick, XrContext, XrError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> ContextConfig {
    ContextConfig {
        idle_backoff_ms: 0,
        ..ContextConfig::default()
    }
}

fn two_eyes(width: u32, height: u32) -> SimulatedRuntime {
    SimulatedRuntime::default().with_view_configs(vec![ViewConfig::from_resolution(width, height); 2])
}

fn draw_and_release(
    frame: &mut FrameContext<'_>,
    views: &[ViewDescriptor],
) -> Result<(), LayerError> {
    for view in views {
        let acquired = frame.acquire(view)?;
        assert!(frame.swapchain_images(view).contains(&acquired.image));
    }
    for view in views {
        frame.release(view)?;
    }
    Ok(())
}

#[test]
fn per_view_session_renders_and_tears_down() {
    init_logging();
    let mut runtime = two_eyes(800, 600);
    let mut context = XrContext::init(&mut runtime, fast_config()).expect("init");

    assert_eq!(context.swapchains().layout(), SwapchainLayout::PerView);
    assert_eq!(context.swapchains().len(), 2);
    assert!(context.swapchains().swapchains().iter().all(|chain| chain.width == 800));

    let mut renderer = draw_and_release;
    let report = context.run(&mut renderer, Some(3)).expect("run");
    assert_eq!(report.frames_rendered, 3);
    context.teardown().expect("teardown");
    drop(context);

    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 3);
    let frames = runtime.submitted_frames();
    assert!(frames.iter().all(|frame| frame.layer_count == 1));
    assert!(frames.windows(2).all(|pair| pair[0].display_time < pair[1].display_time));
    for frame in frames {
        assert_eq!(frame.views.len(), 2);
        assert_ne!(frame.views[0].sub_image.swapchain, frame.views[1].sub_image.swapchain);
        assert_eq!(frame.views[0].sub_image.rect.extent.width, 800);
    }
    assert!(!runtime.has_instance());
    assert_eq!(runtime.live_swapchains(), 0);
    assert_eq!(runtime.live_spaces(), 0);
}

#[test]
fn double_wide_session_slices_one_swapchain() {
    init_logging();
    let mut config = fast_config();
    config.flags.double_wide = true;
    let mut runtime = two_eyes(800, 600);
    let mut context = XrContext::init(&mut runtime, config).expect("init");

    assert_eq!(context.swapchains().len(), 1);
    assert_eq!(context.swapchains().swapchains()[0].width, 1600);
    assert_eq!(context.swapchains().swapchains()[0].height, 600);

    let mut renderer = draw_and_release;
    context.run(&mut renderer, Some(1)).expect("run");
    drop(context);

    let frame = &runtime.submitted_frames()[0];
    let rects: Vec<_> = frame.views.iter().map(|view| view.sub_image.rect).collect();
    assert_eq!(rects[0].offset.x, 0);
    assert_eq!(rects[1].offset.x, 800);
    assert!(rects.iter().all(|rect| rect.extent.width == 800));
    assert_eq!(frame.views[0].sub_image.swapchain, frame.views[1].sub_image.swapchain);
}

fn double_wide_context(runtime: &mut SimulatedRuntime) -> XrContext<&mut SimulatedRuntime> {
    let mut config = fast_config();
    config.flags.double_wide = true;
    XrContext::init(runtime, config).expect("init")
}

#[test]
fn double_wide_eyes_draw_into_one_image_per_frame() {
    init_logging();
    let mut runtime = two_eyes(800, 600);
    let mut context = double_wide_context(&mut runtime);

    let mut drawn: Vec<(usize, SwapchainImage)> = Vec::new();
    let mut renderer = |frame: &mut FrameContext<'_>, views: &[ViewDescriptor]| -> Result<(), LayerError> {
        for view in views {
            let acquired = frame.acquire(view)?;
            drawn.push((view.index, acquired.image));
            frame.release(view)?;
        }
        Ok(())
    };
    let report = context.run(&mut renderer, Some(3)).expect("run");
    drop(context);

    assert_eq!(report.frames_rendered, 3);
    assert_eq!(runtime.call_count(RuntimeCall::AcquireSwapchainImage), 3);
    assert_eq!(runtime.call_count(RuntimeCall::ReleaseSwapchainImage), 3);
    assert_eq!(drawn.len(), 6);
    for pair in drawn.chunks(2) {
        assert_eq!(pair[0].0, 0);
        assert_eq!(pair[1].0, 1);
        assert_eq!(pair[0].1, pair[1].1, "both eyes must share the frame's image");
    }
    assert_ne!(drawn[0].1, drawn[2].1);
    assert!(runtime.submitted_frames().iter().all(|frame| frame.layer_count == 1));
}

#[test]
fn fault_between_acquire_and_release_drops_only_that_frame() {
    init_logging();
    for call in [RuntimeCall::WaitSwapchainImage, RuntimeCall::ReleaseSwapchainImage] {
        let mut runtime = two_eyes(800, 600);
        let mut context = double_wide_context(&mut runtime);
        context
            .runtime_mut()
            .fail_next(call, result_codes::ERROR_RUNTIME_FAILURE);

        let mut renderer = draw_and_release;
        let report = context.run(&mut renderer, Some(3)).expect("run survives the fault");
        drop(context);

        assert_eq!(report.frames_rendered, 3, "{call:?}");
        let layers: Vec<usize> = runtime
            .submitted_frames()
            .iter()
            .map(|frame| frame.layer_count)
            .collect();
        assert_eq!(layers, vec![0, 1, 1], "{call:?}");
        assert_eq!(runtime.live_swapchains(), 0);
    }
}

#[test]
fn swapchains_follow_runtime_formats_and_image_counts() {
    init_logging();
    let mut runtime = two_eyes(640, 480)
        .with_formats(vec![0x8058, GL_SRGB8])
        .with_image_count(2);
    let context = XrContext::init(&mut runtime, fast_config()).expect("init");

    assert_eq!(context.swapchains().format(), Some(GL_SRGB8));
    assert!(context.swapchains().swapchains().iter().all(|chain| chain.images.len() == 2));
    let infos = context.runtime().swapchain_infos();
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|info| info.format == GL_SRGB8));
    assert!(infos.iter().all(|info| info.width == 640 && info.height == 480));
    assert!(infos.iter().all(|info| info.usage.color_attachment && info.sample_count == 1));
    drop(context);

    let mut runtime = two_eyes(640, 480).with_formats(vec![0x881A, GL_SRGB8_ALPHA8]);
    let mut config = fast_config();
    config.flags.double_wide = true;
    let context = XrContext::init(&mut runtime, config).expect("init");
    assert_eq!(context.swapchains().format(), Some(GL_SRGB8_ALPHA8));
    let infos = context.runtime().swapchain_infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].width, 1280);
}

#[test]
fn runtime_without_formats_fails_init() {
    init_logging();
    let mut runtime = SimulatedRuntime::default().with_formats(Vec::new());
    let err = XrContext::init(&mut runtime, fast_config())
        .err()
        .expect("init must fail");

    assert_eq!(err, XrError::NoSwapchainFormats);
    assert!(!runtime.has_instance());
    assert_eq!(runtime.live_swapchains(), 0);
}

#[test]
fn input_is_sampled_against_the_stage() {
    init_logging();
    let mut runtime = SimulatedRuntime::default();
    runtime.set_action_value("grab_object", 0.5);
    let mut context = XrContext::init(&mut runtime, fast_config()).expect("init");
    let mut renderer = draw_and_release;
    context.run(&mut renderer, Some(1)).expect("run");

    let time = context
        .last_submitted()
        .expect("one frame submitted")
        .predicted_display_time;
    let sample = context.sample_input(time).expect("sample");

    assert!(sample.hands.iter().all(|hand| hand.grab == 0.5 && hand.grab_active));
    assert!(!sample.quit_requested);
    assert!(sample.hands[0].location.position_valid);
    assert!(sample.hands[0].location.pose.position.x < sample.hands[1].location.pose.position.x);
}

#[test]
fn exit_request_ends_the_loop_without_error() {
    init_logging();
    let mut config = fast_config();
    config.stop_policy = StopPolicy::OnStopping;
    let mut context = XrContext::init(SimulatedRuntime::default(), config).expect("init");
    let mut renderer = draw_and_release;
    context.run(&mut renderer, Some(2)).expect("run");

    context.runtime_mut().request_exit();
    let mut last = Tick::Idle;
    for _ in 0..16 {
        last = context.tick(&mut renderer).expect("tick");
        if matches!(last, Tick::Exit(_)) {
            break;
        }
    }

    assert!(matches!(last, Tick::Exit(_)), "loop kept running: {last:?}");
    assert!(!context.is_ready());
    assert_eq!(context.session_state(), SessionState::Exiting);
    assert!(!context.runtime().session_running());
    context.teardown().expect("teardown");
}

#[test]
fn failed_bring_up_leaves_nothing_behind() {
    init_logging();
    let mut runtime = SimulatedRuntime::default();
    runtime.fail_next(RuntimeCall::AttachActionSets, result_codes::ERROR_RUNTIME_FAILURE);

    let err = XrContext::init(&mut runtime, fast_config())
        .err()
        .expect("init must fail");

    assert_eq!(err.code(), result_codes::ERROR_RUNTIME_FAILURE);
    assert!(err.call_failure().is_some());
    assert!(!runtime.has_session());
    assert!(!runtime.has_instance());
    assert_eq!(runtime.live_spaces(), 0);
}

#[test]
fn empty_view_list_fails_init() {
    init_logging();
    let runtime = SimulatedRuntime::default().with_view_configs(Vec::new());
    let err = XrContext::init(runtime, fast_config()).err().expect("init must fail");
    assert_eq!(err, XrError::NoViews);
}

#[test]
fn teardown_reports_each_failed_step() {
    init_logging();
    let mut runtime = SimulatedRuntime::default();
    let mut context = XrContext::init(&mut runtime, fast_config()).expect("init");
    context
        .runtime_mut()
        .fail_always(RuntimeCall::DestroySpace, result_codes::ERROR_HANDLE_INVALID);
    context
        .runtime_mut()
        .fail_next(RuntimeCall::DestroyInstance, result_codes::ERROR_RUNTIME_FAILURE);

    let err = context.teardown().expect_err("teardown must report failures");

    assert_eq!(
        err.code(),
        teardown_steps::HAND_SPACES | teardown_steps::STAGE_SPACE | teardown_steps::INSTANCE
    );
    assert!(context.teardown().is_ok());
}
