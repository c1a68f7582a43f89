//! Dispatch cycle bookkeeping.
//!
//! Every event moves through the states below exactly once, ending in one of
//! the three terminal states:
//!
//! ```text
//! Received → MiddlewareRunning → Routed → HandlerExecuting → Committed
//!                   │               │                      ↘ Failed
//!                   ↓               ↓
//!                Dropped         Dropped
//! ```
//!
//! Storage failures and timeouts may end the cycle in `Failed` from any
//! non-terminal state.

use std::fmt;
use std::sync::Arc;

use taskbot_core::{Delivery, FsmKey};

use crate::error::DispatchError;

/// The lifecycle state of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    Received,
    MiddlewareRunning,
    Routed,
    HandlerExecuting,
    /// A handler ran to completion.
    Committed,
    /// A middleware short-circuited or nothing matched.
    Dropped,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::MiddlewareRunning => "middleware_running",
            Self::Routed => "routed",
            Self::HandlerExecuting => "handler_executing",
            Self::Committed => "committed",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Dropped | Self::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the middleware chain and router did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exactly one handler was selected and completed.
    Handled { handler: String },
    /// No registration matched; the event was dropped.
    NoMatch,
    /// A middleware stopped the chain before routing.
    ShortCircuited { middleware: String },
}

impl Outcome {
    pub fn short_circuited(middleware: impl Into<String>) -> Self {
        Self::ShortCircuited {
            middleware: middleware.into(),
        }
    }

    /// The terminal state a successful cycle with this outcome ends in.
    pub fn terminal_state(&self) -> CycleState {
        match self {
            Self::Handled { .. } => CycleState::Committed,
            Self::NoMatch | Self::ShortCircuited { .. } => CycleState::Dropped,
        }
    }

    /// Name of the handler that ran, if any.
    pub fn handler(&self) -> Option<&str> {
        match self {
            Self::Handled { handler } => Some(handler),
            _ => None,
        }
    }
}

/// Summary of a finished dispatch cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub key: FsmKey,
    /// Always a terminal state.
    pub state: CycleState,
    /// `None` when the cycle failed.
    pub outcome: Option<Outcome>,
    pub error: Option<Arc<DispatchError>>,
}

impl CycleReport {
    pub(crate) fn finished(key: FsmKey, outcome: Outcome) -> Self {
        Self {
            key,
            state: outcome.terminal_state(),
            outcome: Some(outcome),
            error: None,
        }
    }

    pub(crate) fn failed(key: FsmKey, error: Arc<DispatchError>) -> Self {
        Self {
            key,
            state: CycleState::Failed,
            outcome: None,
            error: Some(error),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == CycleState::Committed
    }

    pub fn handler(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(Outcome::handler)
    }

    /// How the transport should acknowledge the update behind this cycle.
    ///
    /// Only transient failures ask for redelivery. Handler failures are
    /// final: redelivering them would repeat side effects that already
    /// happened.
    pub fn delivery(&self) -> Delivery {
        match &self.error {
            Some(err) if err.is_retryable() => Delivery::Retry,
            _ => Delivery::Processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskbot_core::StorageError;

    #[test]
    fn test_terminal_states() {
        assert_eq!(
            Outcome::Handled { handler: "a".into() }.terminal_state(),
            CycleState::Committed
        );
        assert_eq!(Outcome::NoMatch.terminal_state(), CycleState::Dropped);
        assert!(CycleState::Failed.is_terminal());
        assert!(!CycleState::Routed.is_terminal());
    }

    #[test]
    fn test_delivery_classification() {
        let key = FsmKey::new(1, 1);
        assert_eq!(
            CycleReport::finished(key, Outcome::NoMatch).delivery(),
            Delivery::Processed
        );

        let retry = [
            DispatchError::Timeout(Duration::from_millis(5)),
            DispatchError::StoreUnavailable(StorageError::Unavailable("down".into())),
        ];
        for err in retry {
            assert_eq!(
                CycleReport::failed(key, Arc::new(err)).delivery(),
                Delivery::Retry
            );
        }

        let report = CycleReport::failed(key, Arc::new(DispatchError::middleware("m", "x")));
        assert_eq!(report.delivery(), Delivery::Processed);
        assert_eq!(report.state, CycleState::Failed);
    }
}
