//! Session lifecycle driven by polled runtime notifications.

use crate::error::{XrError, XrResult, invoke};
use crate::vr::{
    InstanceHandle, RuntimeEvent, SessionHandle, SessionState, ViewConfigurationType, XrRuntime,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// When the session is ended after the runtime reports STOPPING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Keep the session running; teardown ends it.
    #[default]
    AtTeardown,
    /// End the session as soon as STOPPING is observed.
    OnStopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    SessionExiting,
    SessionLossPending,
    InstanceLossPending,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::SessionExiting => write!(f, "session exiting"),
            ExitReason::SessionLossPending => write!(f, "session loss pending"),
            ExitReason::InstanceLossPending => write!(f, "instance loss pending"),
        }
    }
}

/// Result of one poll of the runtime event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    NoEvent,
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A notification that does not affect the session state.
    Event(RuntimeEvent),
    /// The runtime wants the application to stop; not an error.
    ExitRequested(ExitReason),
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    ready: bool,
    running: bool,
    stop_policy: StopPolicy,
    view_type: ViewConfigurationType,
}

impl SessionStateMachine {
    pub fn new(stop_policy: StopPolicy) -> Self {
        Self {
            state: SessionState::Unknown,
            ready: false,
            running: false,
            stop_policy,
            view_type: ViewConfigurationType::PrimaryStereo,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether frames should be rendered this tick.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether `begin_session` succeeded and has not been matched by
    /// `end_session` yet.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop_policy(&self) -> StopPolicy {
        self.stop_policy
    }

    /// Polls the runtime once without blocking and applies what it returns.
    pub fn poll_events<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
    ) -> XrResult<PollOutcome>
    where
        R: XrRuntime + ?Sized,
    {
        let event = invoke(runtime, instance, "xrPollEvent", XrError::Poll, |rt| {
            rt.poll_event(instance)
        })?;
        match event {
            Some(event) => self.handle_event(runtime, instance, session, event),
            None => Ok(PollOutcome::NoEvent),
        }
    }

    /// Applies one runtime notification.
    pub fn handle_event<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
        event: RuntimeEvent,
    ) -> XrResult<PollOutcome>
    where
        R: XrRuntime + ?Sized,
    {
        match event {
            RuntimeEvent::SessionStateChanged {
                session: target,
                state,
                ..
            } => {
                if !target.is_null() && target != session {
                    log::warn!("[session] state change for foreign session {target:?} ignored");
                    return Ok(PollOutcome::Event(event));
                }
                self.transition(runtime, instance, session, state)
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                log::warn!(
                    "[session] instance loss pending at {} ns",
                    loss_time.as_nanos()
                );
                self.ready = false;
                Ok(PollOutcome::ExitRequested(ExitReason::InstanceLossPending))
            }
            RuntimeEvent::EventsLost { lost_event_count } => {
                log::warn!("[session] runtime dropped {lost_event_count} event(s)");
                Ok(PollOutcome::Event(event))
            }
            RuntimeEvent::ReferenceSpaceChangePending {
                reference_space_type,
            } => {
                log::info!("[session] reference space {reference_space_type:?} change pending");
                Ok(PollOutcome::Event(event))
            }
            RuntimeEvent::InteractionProfileChanged => {
                log::info!("[session] interaction profile changed");
                Ok(PollOutcome::Event(event))
            }
            RuntimeEvent::Other(kind) => {
                log::debug!("[session] unhandled event type {kind}");
                Ok(PollOutcome::Event(event))
            }
        }
    }

    fn transition<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
        state: SessionState,
    ) -> XrResult<PollOutcome>
    where
        R: XrRuntime + ?Sized,
    {
        let from = self.state;
        self.state = state;
        log::info!("[session] {} -> {}", from.label(), state.label());

        match state {
            SessionState::Ready => {
                if from == SessionState::Ready || self.running {
                    log::warn!("[session] READY while already running; begin skipped");
                } else {
                    let view_type = self.view_type;
                    let begun = invoke(runtime, instance, "xrBeginSession", XrError::Session, |rt| {
                        rt.begin_session(session, view_type)
                    });
                    if let Err(err) = begun {
                        self.state = from;
                        return Err(err);
                    }
                    self.running = true;
                }
                self.ready = true;
            }
            SessionState::Stopping => match self.stop_policy {
                StopPolicy::AtTeardown => {
                    log::info!("[session] stopping; session stays running until teardown");
                }
                StopPolicy::OnStopping => {
                    self.end_session(runtime, instance, session)?;
                }
            },
            SessionState::LossPending => {
                self.ready = false;
                return Ok(PollOutcome::ExitRequested(ExitReason::SessionLossPending));
            }
            SessionState::Exiting => {
                self.ready = false;
                return Ok(PollOutcome::ExitRequested(ExitReason::SessionExiting));
            }
            SessionState::Unknown
            | SessionState::Idle
            | SessionState::Synchronized
            | SessionState::Visible
            | SessionState::Focused => {}
        }
        Ok(PollOutcome::StateChanged { from, to: state })
    }

    /// Ends the session if it is running. Lowers readiness either way.
    pub fn end_session<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
    ) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        self.ready = false;
        if !self.running {
            return Ok(());
        }
        // Cleared first so a failed end is not retried at teardown.
        self.running = false;
        invoke(runtime, instance, "xrEndSession", XrError::Session, |rt| {
            rt.end_session(session)
        })
    }
}
