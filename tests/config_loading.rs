use std::io::Write;
use theta_xr::math::GraphicsApi;
use theta_xr::{ContextConfig, SimulatedRuntime, SwapchainLayout, XrContext, XrError};

#[test]
fn config_file_drives_context_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "app_name": "stereo_cube",
            "gl_version": {{ "major": 4, "minor": 1 }},
            "flags": {{ "debug": true, "double_wide": true }},
            "near_z": 0.1,
            "far_z": 50.0,
            "idle_backoff_ms": 0,
            "graphics_api": "vulkan"
        }}"#
    )
    .expect("write config");

    let config = ContextConfig::load(file.path()).expect("load");
    assert_eq!(config.app_name, "stereo_cube");
    assert_eq!(config.graphics_api, GraphicsApi::Vulkan);
    assert_eq!(config.layout(), SwapchainLayout::DoubleWide);

    let context = XrContext::init(SimulatedRuntime::default(), config).expect("init");
    assert_eq!(context.swapchains().len(), 1);
    assert_eq!(context.config().far_z, 50.0);
}

#[test]
fn missing_config_file_is_reported_with_its_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.json");

    let err = ContextConfig::load(&path).unwrap_err();

    match err {
        XrError::Config(message) => assert!(message.contains("absent.json")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn empty_app_name_is_rejected_before_touching_the_runtime() {
    let mut runtime = SimulatedRuntime::default();
    let config = ContextConfig {
        app_name: "  ".into(),
        ..ContextConfig::default()
    };

    let err = XrContext::init(&mut runtime, config).err().expect("init must fail");

    assert!(matches!(err, XrError::Config(_)));
    assert!(runtime.journal().is_empty());
}
