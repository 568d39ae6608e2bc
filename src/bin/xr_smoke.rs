use std::env;
use theta_xr::render::{FrameContext, LayerError, ViewDescriptor};
use theta_xr::{ContextConfig, SimulatedRuntime, XrContext};

const FRAME_LIMIT: u64 = 90;

fn main() {
    if let Err(err) = run() {
        eprintln!("[xr_smoke] error: {err}");
        std::process::exit(1);
    }
}

fn touch_every_view(
    frame: &mut FrameContext<'_>,
    views: &[ViewDescriptor],
) -> Result<(), LayerError> {
    for view in views {
        let acquired = frame.acquire(view)?;
        frame
            .depth_targets()
            .get_or_insert_with(acquired.image, || acquired.image.texture);
        frame.release(view)?;
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::args().nth(1) {
        Some(path) => ContextConfig::load(path)?,
        None => ContextConfig {
            idle_backoff_ms: 0,
            ..ContextConfig::default()
        },
    };

    let mut context = XrContext::init(SimulatedRuntime::default(), config)?;
    let mut renderer = touch_every_view;
    let report = context.run(&mut renderer, Some(FRAME_LIMIT))?;
    let stats = context.frame_stats();
    context.teardown()?;

    println!(
        "[xr_smoke] {} tick(s), {} frame(s) rendered, {} submitted, {} skipped",
        report.ticks, report.frames_rendered, stats.submitted, stats.skipped
    );
    if let Some(reason) = report.exit {
        println!("[xr_smoke] runtime ended the session: {reason}");
    }
    Ok(())
}
