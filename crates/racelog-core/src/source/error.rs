//! Source errors

use thiserror::Error;

/// Errors raised by a telemetry source
#[derive(Error, Debug)]
pub enum SourceError {
    /// The device or file could not be acquired. Fatal to the session.
    #[error("Failed to open '{target}': {reason}")]
    Open { target: String, reason: String },

    /// No complete line arrived within the read timeout. The caller may retry.
    #[error("Read timed out")]
    Timeout,

    /// The link dropped (device unplugged, peer closed). Terminal for the session.
    #[error("Source disconnected: {0}")]
    Disconnected(String),

    /// The source was shut down while a read was outstanding
    #[error("Source closed")]
    Closed,

    #[error("Source is not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the caller may simply call `read_next` again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Timeout)
    }
}

impl Clone for SourceError {
    /// `io::Error` is not `Clone`; the copy keeps its kind and message.
    fn clone(&self) -> Self {
        match self {
            SourceError::Open { target, reason } => SourceError::Open {
                target: target.clone(),
                reason: reason.clone(),
            },
            SourceError::Timeout => SourceError::Timeout,
            SourceError::Disconnected(reason) => SourceError::Disconnected(reason.clone()),
            SourceError::Closed => SourceError::Closed,
            SourceError::NotOpen => SourceError::NotOpen,
            SourceError::Io(e) => SourceError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_recoverable() {
        assert!(SourceError::Timeout.is_recoverable());
        assert!(!SourceError::Disconnected("unplugged".into()).is_recoverable());
        assert!(!SourceError::Closed.is_recoverable());
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err = SourceError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        match err.clone() {
            SourceError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe);
                assert_eq!(e.to_string(), "pipe");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
