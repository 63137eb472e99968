//! Error model: two domain sentinels (`Eof`, `Cancelled`) plus rewrapped OS
//! and address-resolution errors.
//!
//! Grounded on `coronet::errc` (`eof = -1`, `cancelled = -2`) and
//! `folo::io::operation_result::OperationError`'s use of `thiserror`.

use std::io;

/// A classification of [`Error`] cheap enough to copy into a socket/server's
/// `last_error()` slot (spec §4.2/§6) without holding on to the original
/// `io::Error` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// No error has been recorded yet.
    #[default]
    None,
    /// Peer closed or stream ended cleanly. Not logged as an error.
    Eof,
    /// Local cancellation (reactor stopped, generator dropped). Not logged
    /// as an error.
    Cancelled,
    /// A rewrapped kernel error.
    Os,
    /// An address-resolution error from the external `getaddrinfo`-style
    /// collaborator.
    Addr,
}

/// The crate's error type. `Eof` and `Cancelled` are control signals, not
/// failures — user code should not log them as errors (§7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Peer closed or stream ended cleanly.
    #[error("end of stream")]
    Eof,
    /// Local cancellation: reactor stopped or generator dropped.
    #[error("cancelled")]
    Cancelled,
    /// A rewrapped kernel error.
    #[error("{0}")]
    Os(#[source] io::Error),
    /// An address-resolution failure.
    #[error("address resolution failed: {0}")]
    Addr(#[source] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Eof => ErrorKind::Eof,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Os(_) => ErrorKind::Os,
            Error::Addr(_) => ErrorKind::Addr,
        }
    }

    /// The §7 user-visible rendering: lower-cased OS text. Sentinels render
    /// as their own short names since there is no OS text to lower-case.
    pub fn lowercased_message(&self) -> String {
        match self {
            Error::Eof => "eof".to_string(),
            Error::Cancelled => "cancelled".to_string(),
            Error::Os(e) | Error::Addr(e) => e.to_string().to_lowercase(),
        }
    }

    /// `true` for the two control-signal variants that §7 says must not be
    /// logged as errors by user code.
    pub fn is_control_signal(&self) -> bool {
        matches!(self, Error::Eof | Error::Cancelled)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::Os(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_control_signals() {
        assert!(Error::Eof.is_control_signal());
        assert!(Error::Cancelled.is_control_signal());
        assert!(!Error::Os(io::Error::other("boom")).is_control_signal());
    }

    #[test]
    fn os_message_is_lowercased() {
        let err = Error::Os(io::Error::other("Connection Reset"));
        assert_eq!(err.lowercased_message(), "connection reset");
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::Eof.kind(), ErrorKind::Eof);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::Os(io::Error::other("x")).kind(), ErrorKind::Os);
        assert_eq!(Error::Addr(io::Error::other("x")).kind(), ErrorKind::Addr);
    }
}
