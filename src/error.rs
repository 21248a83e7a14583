//! Error handling for qudio.
//!
//! Provides a unified error type based on gRPC status codes, with mapping
//! from the underlying I/O, parsing and websocket errors to categories.
//!
//! Errors only travel through the plumbing: configuration loading, GPIO
//! file access and the connection to the playback service. The control
//! engine itself resolves every failure to "do nothing" or "play the
//! failure sound" and never hands an error back to its caller.
//!
//! # Example
//!
//! ```rust
//! use qudio::error::{Error, ErrorKind, Result};
//!
//! fn pin_number(value: &str) -> Result<u32> {
//!     let pin = value.parse::<u32>()?;
//!     if pin > 27 {
//!         return Err(Error::out_of_range(format!("no such pin: {pin}")));
//!     }
//!     Ok(pin)
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for qudio operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("operation was cancelled")]
    Cancelled = 1,

    #[error("unknown error")]
    Unknown = 2,

    #[error("invalid argument specified")]
    InvalidArgument = 3,

    #[error("operation timed out")]
    DeadlineExceeded = 4,

    #[error("not found")]
    NotFound = 5,

    #[error("permission denied")]
    PermissionDenied = 7,

    #[error("invalid state")]
    FailedPrecondition = 9,

    #[error("out of range")]
    OutOfRange = 11,

    #[error("not implemented")]
    Unimplemented = 12,

    #[error("internal error")]
    Internal = 13,

    #[error("service unavailable")]
    Unavailable = 14,

    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

macro_rules! constructor {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "no such gpio");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Creates an error for operations that were cancelled before completion.
        cancelled => Cancelled
    );
    constructor!(
        /// Creates an error for corrupted or truncated data.
        data_loss => DataLoss
    );
    constructor!(
        /// Creates an error for operations that did not finish in time.
        deadline_exceeded => DeadlineExceeded
    );
    constructor!(
        /// Creates an error for operations attempted in the wrong state,
        /// such as sending on a closed connection.
        failed_precondition => FailedPrecondition
    );
    constructor!(
        /// Creates an error for broken invariants.
        internal => Internal
    );
    constructor!(
        /// Creates an error for malformed input, like an unparsable
        /// configuration value.
        invalid_argument => InvalidArgument
    );
    constructor!(
        /// Creates an error for missing files and devices.
        not_found => NotFound
    );
    constructor!(
        /// Creates an error for values outside their valid range.
        out_of_range => OutOfRange
    );
    constructor!(
        /// Creates an error for denied file or device access.
        permission_denied => PermissionDenied
    );
    constructor!(
        /// Creates an error for functionality not available on this platform.
        unimplemented => Unimplemented
    );
    constructor!(
        /// Creates an error for an unreachable playback service.
        unavailable => Unavailable
    );
    constructor!(
        /// Creates an error that fits no other category.
        unknown => Unknown
    );
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Maps standard IO errors to their logical equivalents:
/// * `NotFound` -> `NotFound`
/// * `PermissionDenied` -> `PermissionDenied`
/// * `ConnectionRefused` -> `Unavailable`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted | Interrupted => {
                Self::cancelled(err)
            }
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            Unsupported => Self::unimplemented(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts WebSocket errors into appropriate error kinds.
///
/// * `ConnectionClosed` -> `Cancelled`
/// * `AlreadyClosed` -> `FailedPrecondition`
/// * `Io` -> through the IO error mapping
/// * `Capacity` -> `OutOfRange`
/// * others -> `Unknown`
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            ConnectionClosed => Self::cancelled(err),
            AlreadyClosed => Self::failed_precondition(err),
            Io(err) => err.into(),
            Capacity(err) => Self::out_of_range(err),
            err => Self::unknown(err),
        }
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_kinds() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: Error = std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::not_found("gpio22");
        assert_eq!(err.to_string(), "not found: gpio22");
    }

    #[test]
    fn config_errors_are_invalid_arguments() {
        let err: Error = toml::from_str::<toml::Value>("= 1").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.downcast::<toml::de::Error>().is_some());
    }
}
