//! Error types for the Taskbot framework.

use std::time::Duration;

use thiserror::Error;

use taskbot_core::StorageError;

use crate::router::Category;

/// A boxed, thread-safe error as returned by handlers and middlewares.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building routers or the dispatcher.
///
/// Registration is a setup-time concern: every variant describes a routing
/// table that would never let some handler run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A registration sits behind a catch-all filter of the same category.
    #[error(
        "registration '{shadowed}' in the {category} category is unreachable behind catch-all '{catch_all}'"
    )]
    Shadowed {
        category: Category,
        /// Name of the registration that can never match.
        shadowed: String,
        /// Name of the catch-all registration in front of it.
        catch_all: String,
    },

    /// Two registrations in one router share a name.
    #[error("router '{router}' already has a registration named '{name}'")]
    DuplicateName { router: String, name: String },
}

/// Errors that end a dispatch cycle in the `Failed` state.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A middleware failed on its own account.
    #[error("middleware '{middleware}' failed: {source}")]
    MiddlewareFatal {
        middleware: String,
        #[source]
        source: BoxError,
    },

    /// The selected handler returned an error.
    ///
    /// State writes the handler completed before failing are kept.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: BoxError,
    },

    /// FSM storage could not be read or written.
    ///
    /// Only [`StorageError::Unavailable`] is retryable; a record that does
    /// not (de)serialize fails the same way on every delivery.
    #[error(transparent)]
    StoreUnavailable(#[from] StorageError),

    /// The cycle exceeded the configured event timeout.
    #[error("dispatch cycle timed out after {0:?}")]
    Timeout(Duration),

    /// A handler or middleware asked for a context value nobody injected.
    #[error("'{0}' was not injected into the context")]
    MissingResource(&'static str),
}

impl DispatchError {
    /// Wraps a middleware's own failure.
    pub fn middleware(name: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Self::MiddlewareFatal {
            middleware: name.into(),
            source: err.into(),
        }
    }

    /// Classifies a handler failure.
    ///
    /// An unreachable FSM store anywhere in the error chain surfaces as
    /// [`StoreUnavailable`](Self::StoreUnavailable) so that the event can be
    /// redelivered. Everything else, including records that fail to
    /// serialize, is a plain handler failure.
    pub(crate) fn from_handler(handler: &str, err: BoxError) -> Self {
        let unavailable = {
            let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err.as_ref());
            let mut found = None;
            while let Some(e) = current {
                if let Some(storage @ StorageError::Unavailable(_)) =
                    e.downcast_ref::<StorageError>()
                {
                    found = Some(storage.clone());
                    break;
                }
                current = e.source();
            }
            found
        };
        match unavailable {
            Some(storage) => Self::StoreUnavailable(storage),
            None => Self::Handler {
                handler: handler.to_string(),
                source: err,
            },
        }
    }

    /// Returns `true` if the same event may succeed when delivered again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(StorageError::Unavailable(_)) | Self::Timeout(_)
        )
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("wrapped")]
    struct Wrapped(#[source] StorageError);

    #[test]
    fn test_handler_errors_are_classified() {
        let err = DispatchError::from_handler("h", Box::new(StorageError::Unavailable("x".into())));
        assert!(matches!(err, DispatchError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let err = DispatchError::from_handler(
            "h",
            Box::new(Wrapped(StorageError::Unavailable("x".into()))),
        );
        assert!(matches!(err, DispatchError::StoreUnavailable(_)));

        let err = DispatchError::from_handler(
            "h",
            Box::new(StorageError::Serialization("key must be a string".into())),
        );
        assert!(matches!(err, DispatchError::Handler { .. }));
        assert!(!err.is_retryable());

        let err = DispatchError::from_handler("h", "boom".into());
        assert!(matches!(err, DispatchError::Handler { ref handler, .. } if handler == "h"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = DispatchError::middleware("ban_check", "db down");
        assert_eq!(err.to_string(), "middleware 'ban_check' failed: db down");
        assert!(DispatchError::Timeout(Duration::from_secs(1)).is_retryable());
        let corrupt = DispatchError::StoreUnavailable(StorageError::Serialization("bad".into()));
        assert!(!corrupt.is_retryable());
        assert_eq!(
            DispatchError::MissingResource("Locale").to_string(),
            "'Locale' was not injected into the context"
        );
    }
}
