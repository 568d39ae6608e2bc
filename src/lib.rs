//! Session core for stereo head-mounted displays.
//!
//! [`XrContext`] drives an [`XrRuntime`] through instance and session
//! bring-up, the per-frame wait/begin/render/end cycle, controller input and
//! ordered teardown. Rendering is delegated to a [`LayerRenderer`].

pub mod config;
pub mod context;
pub mod error;
pub mod input;
pub mod math;
pub mod render;
pub mod session;
pub mod swapchain;
pub mod vr;

pub use config::{ContextConfig, ContextFlags, GlVersion};
pub use context::{RunReport, Tick, XrContext};
pub use error::{TeardownError, XrError, XrResult};
pub use render::{FrameContext, FrameState, LayerError, LayerRenderer, ViewDescriptor};
pub use session::{ExitReason, StopPolicy};
pub use swapchain::SwapchainLayout;
pub use vr::{SimulatedRuntime, XrRuntime};
