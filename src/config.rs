use crate::error::{XrError, XrResult};
use crate::math::GraphicsApi;
use crate::session::StopPolicy;
use crate::swapchain::SwapchainLayout;
use crate::vr::ApiVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// OpenGL version of the context the application renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlVersion {
    pub major: u16,
    pub minor: u16,
}

impl GlVersion {
    pub fn as_api_version(self) -> ApiVersion {
        ApiVersion::new(self.major, self.minor, 0)
    }
}

impl Default for GlVersion {
    fn default() -> Self {
        Self { major: 4, minor: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFlags {
    /// Dump runtime, system, view and format details at startup.
    pub debug: bool,
    /// Render all views into one horizontally concatenated swapchain.
    pub double_wide: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub app_name: String,
    pub gl_version: GlVersion,
    pub flags: ContextFlags,
    pub stop_policy: StopPolicy,
    pub near_z: f32,
    /// A far plane at or below `near_z` selects an infinite projection.
    pub far_z: f32,
    pub idle_backoff_ms: u64,
    pub graphics_api: GraphicsApi,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: "theta_xr".to_string(),
            gl_version: GlVersion::default(),
            flags: ContextFlags::default(),
            stop_policy: StopPolicy::default(),
            near_z: 0.05,
            far_z: 100.0,
            idle_backoff_ms: 100,
            graphics_api: GraphicsApi::default(),
        }
    }
}

impl ContextConfig {
    pub fn from_json_str(text: &str) -> XrResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| XrError::Config(format!("malformed context config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> XrResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| XrError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> XrResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| XrError::Config(format!("unserializable context config: {err}")))
    }

    pub fn validate(&self) -> XrResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(XrError::Config("app_name must not be empty".into()));
        }
        if !(self.near_z.is_finite() && self.near_z > 0.0) {
            return Err(XrError::Config(format!(
                "near_z must be a positive distance, got {}",
                self.near_z
            )));
        }
        if self.far_z.is_nan() {
            return Err(XrError::Config("far_z must be a number".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> SwapchainLayout {
        SwapchainLayout::from_double_wide(self.flags.double_wide)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_setup() {
        let config = ContextConfig::default();
        assert_eq!(config.near_z, 0.05);
        assert_eq!(config.far_z, 100.0);
        assert_eq!(config.idle_backoff(), Duration::from_millis(100));
        assert_eq!(config.stop_policy, StopPolicy::AtTeardown);
        assert_eq!(config.layout(), SwapchainLayout::PerView);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ContextConfig::from_json_str(
            r#"{ "app_name": "cube", "flags": { "double_wide": true }, "stop_policy": "on_stopping" }"#,
        )
        .expect("parse");
        assert_eq!(config.app_name, "cube");
        assert!(config.flags.double_wide);
        assert!(!config.flags.debug);
        assert_eq!(config.stop_policy, StopPolicy::OnStopping);
        assert_eq!(config.layout(), SwapchainLayout::DoubleWide);
        assert_eq!(config.gl_version, GlVersion::default());
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = ContextConfig::from_json_str("{ \"near_z\": ").unwrap_err();
        assert!(matches!(err, XrError::Config(_)));
    }

    #[test]
    fn non_positive_near_plane_is_rejected() {
        let err = ContextConfig::from_json_str(r#"{ "near_z": 0.0 }"#).unwrap_err();
        assert!(matches!(err, XrError::Config(message) if message.contains("near_z")));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = ContextConfig::default();
        config.graphics_api = GraphicsApi::Vulkan;
        config.gl_version = GlVersion { major: 3, minor: 3 };
        let text = config.to_json_string().expect("serialize");
        assert_eq!(ContextConfig::from_json_str(&text).expect("parse"), config);
    }
}
