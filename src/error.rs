use crate::vr::{ApiVersion, InstanceHandle, RawResult, RuntimeFault, XrRuntime, result_codes};
use std::fmt;
use thiserror::Error;

/// A failed runtime call, named and translated for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub call: &'static str,
    pub code: RawResult,
    pub description: String,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.call, self.description)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XrError {
    #[error("enumeration failed: {0}")]
    Enumeration(CallFailure),
    #[error("creation failed: {0}")]
    Creation(CallFailure),
    #[error("input sync failed: {0}")]
    Sync(CallFailure),
    #[error("frame failed: {0}")]
    Frame(CallFailure),
    #[error("swapchain acquire failed: {0}")]
    Acquire(CallFailure),
    #[error("swapchain release failed: {0}")]
    Release(CallFailure),
    #[error("event poll failed: {0}")]
    Poll(CallFailure),
    #[error("session transition failed: {0}")]
    Session(CallFailure),
    #[error("destroy failed: {0}")]
    Destroy(CallFailure),
    #[error("required extension {0} not supported by runtime")]
    MissingExtension(&'static str),
    #[error("runtime requires graphics API {required}, context provides {actual}")]
    UnsupportedGraphicsVersion {
        required: ApiVersion,
        actual: ApiVersion,
    },
    #[error("runtime reported no views for the primary stereo configuration")]
    NoViews,
    #[error("runtime advertised no swapchain formats")]
    NoSwapchainFormats,
    #[error("context is not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("swapchain {0} was already acquired and released this frame")]
    SwapchainReacquired(usize),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl XrError {
    /// The runtime call failure behind this error, if any.
    pub fn call_failure(&self) -> Option<&CallFailure> {
        match self {
            XrError::Enumeration(failure)
            | XrError::Creation(failure)
            | XrError::Sync(failure)
            | XrError::Frame(failure)
            | XrError::Acquire(failure)
            | XrError::Release(failure)
            | XrError::Poll(failure)
            | XrError::Session(failure)
            | XrError::Destroy(failure) => Some(failure),
            _ => None,
        }
    }

    /// Nonzero code for callers that want an exit status.
    ///
    /// Runtime-backed errors return the runtime's (negative) result code;
    /// local errors map to the closest runtime error code.
    pub fn code(&self) -> i32 {
        match self {
            XrError::MissingExtension(_) => result_codes::ERROR_EXTENSION_NOT_PRESENT,
            XrError::UnsupportedGraphicsVersion { .. } => {
                result_codes::ERROR_API_VERSION_UNSUPPORTED
            }
            XrError::NoViews => result_codes::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED,
            XrError::NoSwapchainFormats => result_codes::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED,
            XrError::NotInitialized(_) => result_codes::ERROR_HANDLE_INVALID,
            XrError::SwapchainReacquired(_) => result_codes::ERROR_CALL_ORDER_INVALID,
            XrError::Config(_) => result_codes::ERROR_VALIDATION_FAILURE,
            other => other
                .call_failure()
                .map(|failure| failure.code)
                .filter(|code| *code != 0)
                .unwrap_or(result_codes::ERROR_RUNTIME_FAILURE),
        }
    }
}

pub type XrResult<T> = Result<T, XrError>;

/// Describes `fault` using the runtime's translation when an instance
/// exists, otherwise the crate's own result table.
pub fn describe_fault<R: XrRuntime + ?Sized>(
    runtime: &R,
    instance: InstanceHandle,
    fault: RuntimeFault,
) -> String {
    if !instance.is_null() {
        if let Some(text) = runtime.result_to_string(instance, fault.code()) {
            return text;
        }
    }
    fault.to_string()
}

/// Checks one runtime call result, logging and wrapping failures.
pub fn check<T, R, F>(
    runtime: &R,
    instance: InstanceHandle,
    call: &'static str,
    result: Result<T, RuntimeFault>,
    wrap: F,
) -> XrResult<T>
where
    R: XrRuntime + ?Sized,
    F: FnOnce(CallFailure) -> XrError,
{
    result.map_err(|fault| {
        let description = describe_fault(runtime, instance, fault);
        log::error!("[xr] {call} failed [{description}]");
        wrap(CallFailure {
            call,
            code: fault.code(),
            description,
        })
    })
}

/// Runs one runtime call and checks its result in place.
pub fn invoke<T, R, W, F>(
    runtime: &mut R,
    instance: InstanceHandle,
    call: &'static str,
    wrap: W,
    f: F,
) -> XrResult<T>
where
    R: XrRuntime + ?Sized,
    W: FnOnce(CallFailure) -> XrError,
    F: FnOnce(&mut R) -> Result<T, RuntimeFault>,
{
    let result = f(runtime);
    check(&*runtime, instance, call, result, wrap)
}

/// Bits identifying the teardown steps that failed.
pub mod teardown_steps {
    pub const SWAPCHAINS: u32 = 1 << 0;
    pub const END_SESSION: u32 = 1 << 1;
    pub const HAND_SPACES: u32 = 1 << 2;
    pub const STAGE_SPACE: u32 = 1 << 3;
    pub const ACTION_SET: u32 = 1 << 4;
    pub const SESSION: u32 = 1 << 5;
    pub const INSTANCE: u32 = 1 << 6;
}

/// Teardown ran to completion but one or more steps failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("teardown finished with {} failed step(s) (code {code:#x})", .failures.len())]
pub struct TeardownError {
    code: u32,
    failures: Vec<XrError>,
}

impl TeardownError {
    pub(crate) fn new() -> Self {
        Self {
            code: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: u32, error: XrError) {
        self.code |= step;
        self.failures.push(error);
    }

    pub(crate) fn into_result(self) -> Result<(), TeardownError> {
        if self.code == 0 { Ok(()) } else { Err(self) }
    }

    /// Bitwise OR of the failed [`teardown_steps`].
    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn failures(&self) -> &[XrError] {
        &self.failures
    }
}
