//! Weak reference and finalization errors

use crate::value::Value;
use thiserror::Error;

/// Errors reported by mutator-side operations.
///
/// Collection-time failures never show up here: allocation failure while
/// queuing a record during sweep aborts instead.
#[derive(Debug, Error)]
pub enum WeakRefError {
    /// Target is not an object or a non-registered symbol
    #[error("TypeError: {0}")]
    InvalidTarget(String),

    /// `register` with a held value that is the target itself
    #[error("TypeError: FinalizationRegistry.prototype.register: target and holdings must not be same")]
    HeldValueIsTarget,

    /// Unregister token that cannot be held weakly
    #[error("TypeError: FinalizationRegistry.prototype.{method}: invalid unregister token {value}")]
    InvalidUnregisterToken {
        /// Method that received the token
        method: &'static str,
        /// The offending token
        value: String,
    },

    /// The host refused to keep a wrapper target alive
    #[error("InternalError: cannot preserve wrapper of weak target")]
    CannotPreserveWrapper,

    /// Allocation failed; the operation was rolled back
    #[error("OutOfMemory")]
    OutOfMemory,

    /// Handle whose storage has been reclaimed
    #[error("InternalError: stale {0} handle")]
    StaleHandle(&'static str),

    /// A cleanup callback threw
    #[error("Uncaught exception in cleanup callback: {0}")]
    Callback(Value),
}

impl WeakRefError {
    /// Create an invalid target error
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Create an invalid unregister token error
    pub fn invalid_token(method: &'static str, value: &Value) -> Self {
        Self::InvalidUnregisterToken {
            method,
            value: value.to_string(),
        }
    }

    /// Check if this is an out of memory error
    pub fn is_oom(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

/// Result type for weak reference operations
pub type WeakRefResult<T> = std::result::Result<T, WeakRefError>;

/// Abort on an allocation failure that cannot be reported.
///
/// Used during sweep, where there is no caller to hand an error to and
/// dropping the record would silently lose a finalization callback.
#[cold]
#[track_caller]
pub(crate) fn oom_unsafe_crash(reason: &str) -> ! {
    panic!("out of memory: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WeakRefError::invalid_target("WeakRef: target must be an object");
        assert_eq!(err.to_string(), "TypeError: WeakRef: target must be an object");

        let err = WeakRefError::invalid_token("unregister", &Value::number(1.0));
        assert_eq!(
            err.to_string(),
            "TypeError: FinalizationRegistry.prototype.unregister: invalid unregister token 1"
        );

        assert!(WeakRefError::OutOfMemory.is_oom());
        assert!(!WeakRefError::HeldValueIsTarget.is_oom());
    }

    #[test]
    #[should_panic(expected = "out of memory: queue")]
    fn test_oom_unsafe_crash_panics() {
        oom_unsafe_crash("queue");
    }
}
