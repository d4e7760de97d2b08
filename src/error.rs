/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind};

use thiserror::Error;

/// Result type used throughout **mnio**
pub type Result<T> = std::result::Result<T, NioError>;

/// The error type for **mnio** buffer, channel and selector operations
///
/// "Would block", partial transfers and end-of-stream are **not** errors; they
/// are reported through the `Ok` values of the respective operations.
/// Errors from the **`mio`** layer are passed through as
/// [`NioError::Io`](NioError::Io), except for failures of the readiness
/// mechanism itself, which are reported as
/// [`NioError::PollFailure`](NioError::PollFailure).
#[derive(Debug, Error)]
pub enum NioError {
    /// A cursor operation would break `mark <= position <= limit <= capacity`.
    #[error("buffer cursor invariant violated: {0}")]
    BufferState(&'static str),
    /// A relative `put` would write past the buffer's limit.
    #[error("buffer overflow: {requested} bytes requested, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },
    /// A relative `get` would read past the buffer's limit.
    #[error("buffer underflow: {requested} bytes requested, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },
    /// `reset()` was called without a `mark()` since the last flip/clear/rewind.
    #[error("reset() called, but no mark has been set")]
    MarkNotSet,
    /// A write was attempted on a buffer backed by a read-only mapping.
    #[error("the buffer is read-only")]
    ReadOnlyBuffer,
    /// The channel has been closed (or its input side has already reported
    /// end-of-stream).
    #[error("the channel is closed")]
    ClosedChannel,
    /// The channel can not be (re-)registered in its current state.
    #[error("registration rejected: {0}")]
    Registration(#[from] RegistrationError),
    /// The underlying readiness mechanism failed. The selector that reported
    /// this error must not be used any longer.
    #[error("polling for readiness events failed: {0}")]
    PollFailure(#[source] IoError),
    /// A blocking-mode operation did not complete in time.
    #[error("the channel operation timed out")]
    TimedOut,
    /// Any other I/O error reported by the operating system.
    #[error(transparent)]
    Io(#[from] IoError),
}

/// The reason a registration request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("the channel is already registered with a selector")]
    AlreadyRegistered,
    #[error("the channel is in blocking mode")]
    Blocking,
    #[error("the interest set is not supported by this kind of channel")]
    InvalidInterest,
    #[error("the channel is not registered with a selector")]
    NotRegistered,
}

impl NioError {
    /// The [`std::io::ErrorKind`](std::io::ErrorKind) this error maps to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BufferState(_) | Self::MarkNotSet | Self::Registration(_) => ErrorKind::InvalidInput,
            Self::Overflow { .. } => ErrorKind::WriteZero,
            Self::Underflow { .. } => ErrorKind::UnexpectedEof,
            Self::ReadOnlyBuffer => ErrorKind::PermissionDenied,
            Self::ClosedChannel => ErrorKind::NotConnected,
            Self::TimedOut => ErrorKind::TimedOut,
            Self::PollFailure(error) | Self::Io(error) => error.kind(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedChannel)
    }
}

impl From<NioError> for IoError {
    fn from(error: NioError) -> Self {
        match error {
            NioError::Io(inner) => inner,
            other => IoError::new(other.kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_pass_through_unchanged() {
        let error: IoError = NioError::Io(IoError::new(ErrorKind::ConnectionReset, "reset")).into();
        assert_eq!(error.kind(), ErrorKind::ConnectionReset);
        assert!(error.get_ref().is_some());
    }

    #[test]
    fn nio_errors_are_wrapped_with_their_kind() {
        let error: IoError = NioError::ClosedChannel.into();
        assert_eq!(error.kind(), ErrorKind::NotConnected);
        let inner = error.into_inner().expect("inner error");
        assert!(inner.downcast_ref::<NioError>().map(NioError::is_closed).unwrap_or(false));
    }

    #[test]
    fn registration_errors_convert() {
        let error: NioError = RegistrationError::AlreadyRegistered.into();
        assert!(matches!(error, NioError::Registration(RegistrationError::AlreadyRegistered)));
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }
}
