//! Request lifecycle state machine.
//!
//! ```text
//! Created -> Encoded -> Sent(opaque) -> Completed
//!                ^            |-------> TimedOut -> Retried
//!                |            |-------> Failed
//!                |            |-------> Cancelled
//!                +-- Retried <+
//! ```
//!
//! `Sent` is entered once per attempt. A dropped [`Lifecycle`] that is
//! still waiting on the wire ends in `Cancelled`.

use crate::error::ClientError;
use crate::event::{Event, EventContext, EventSink, Severity};
use std::sync::Arc;

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Encoded,
    Sent { opaque: u32 },
    Completed,
    TimedOut,
    Retried,
    /// Surfaced to the caller with an error other than a timeout.
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }

    fn allows(&self, next: &RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, Encoded)
                | (Retried, Encoded)
                | (Encoded, Sent { .. })
                | (Encoded, Retried)
                | (Sent { .. }, Completed)
                | (Sent { .. }, TimedOut)
                | (Sent { .. }, Retried)
                | (Sent { .. }, Failed)
                | (Sent { .. }, Cancelled)
                | (TimedOut, Retried)
                | (TimedOut, Failed)
                | (Created, Failed)
                | (Encoded, Failed)
                | (Retried, Failed)
                | (Created, Cancelled)
                | (Encoded, Cancelled)
                | (Retried, Cancelled)
        )
    }
}

/// Tracks one logical request across all of its attempts.
pub struct Lifecycle {
    state: RequestState,
    attempts: u32,
    sink: Option<(Arc<dyn EventSink>, EventContext)>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RequestState::Created,
            attempts: 0,
            sink: None,
        }
    }

    /// Reports cancellation through `sink` if the lifecycle is dropped early.
    pub fn with_events(mut self, sink: Arc<dyn EventSink>, context: EventContext) -> Self {
        self.sink = Some((sink, context));
        self
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Number of times the request has been written to the wire.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn transition(&mut self, next: RequestState) -> Result<(), ClientError> {
        if !self.state.allows(&next) {
            return Err(ClientError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if let RequestState::Sent { .. } = next {
            self.attempts += 1;
        }
        self.state = next;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.state.is_terminal() || self.state == RequestState::Created {
            return;
        }
        let from = self.state;
        self.state = RequestState::Cancelled;
        tracing::debug!(?from, attempts = self.attempts, "request cancelled");
        if let Some((sink, context)) = self.sink.take() {
            let context = EventContext::builder_from(&context)
                .field("state", format!("{:?}", from))
                .field("attempts", self.attempts)
                .build();
            sink.emit(Event::new("request_cancelled", Severity::Debug, context));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventSink;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(RequestState::Encoded).unwrap();
        lifecycle.transition(RequestState::Sent { opaque: 1 }).unwrap();
        lifecycle.transition(RequestState::Completed).unwrap();
        assert_eq!(lifecycle.attempts(), 1);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn test_retry_reenters_encoded() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(RequestState::Encoded).unwrap();
        lifecycle.transition(RequestState::Sent { opaque: 1 }).unwrap();
        lifecycle.transition(RequestState::TimedOut).unwrap();
        lifecycle.transition(RequestState::Retried).unwrap();
        lifecycle.transition(RequestState::Encoded).unwrap();
        lifecycle.transition(RequestState::Sent { opaque: 2 }).unwrap();
        lifecycle.transition(RequestState::Completed).unwrap();
        assert_eq!(lifecycle.attempts(), 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.transition(RequestState::Sent { opaque: 1 }),
            Err(ClientError::InvalidTransition { .. })
        ));

        lifecycle.transition(RequestState::Encoded).unwrap();
        lifecycle.transition(RequestState::Sent { opaque: 1 }).unwrap();
        lifecycle.transition(RequestState::Completed).unwrap();
        // terminal
        assert!(lifecycle.transition(RequestState::Retried).is_err());
        assert!(lifecycle.transition(RequestState::Encoded).is_err());
    }

    #[test]
    fn test_drop_while_sent_reports_cancellation() {
        let sink = Arc::new(MemoryEventSink::new());
        {
            let mut lifecycle = Lifecycle::new().with_events(sink.clone(), EventContext::default());
            lifecycle.transition(RequestState::Encoded).unwrap();
            lifecycle.transition(RequestState::Sent { opaque: 9 }).unwrap();
        }
        assert_eq!(sink.names(), vec!["request_cancelled"]);
    }

    #[test]
    fn test_drop_after_completion_is_silent() {
        let sink = Arc::new(MemoryEventSink::new());
        {
            let mut lifecycle = Lifecycle::new().with_events(sink.clone(), EventContext::default());
            lifecycle.transition(RequestState::Encoded).unwrap();
            lifecycle.transition(RequestState::Sent { opaque: 9 }).unwrap();
            lifecycle.transition(RequestState::Completed).unwrap();
        }
        assert!(sink.names().is_empty());
    }
}
