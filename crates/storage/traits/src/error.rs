//! Error types for backing-state operations.

use thiserror::Error;

/// Error type for backing-state operations.
///
/// Errors from the durable store propagate through the caches unchanged;
/// nothing in the execution core retries a failed state operation.
#[derive(Debug, Error)]
pub enum StateError {
    /// Error surfaced by the underlying store.
    #[error("backend error: {0}")]
    Backend(String),

    /// Lock was poisoned.
    #[error("lock poisoned")]
    LockPoisoned,

    /// Durable save failed.
    #[error("save failed: {0}")]
    Save(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_display() {
        let err = StateError::Backend("disk full".to_string());
        assert_eq!(err.to_string(), "backend error: disk full");
    }

    #[test]
    fn lock_poisoned_display() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "lock poisoned");
    }

    #[test]
    fn save_display() {
        let err = StateError::Save("fsync".to_string());
        assert_eq!(err.to_string(), "save failed: fsync");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StateError>();
    }
}
