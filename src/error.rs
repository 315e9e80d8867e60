//! Crate-wide error type and the numeric codes exposed across the FFI boundary.

use std::fmt;

/// Every fallible operation in this crate returns this error.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("argument out of range: {0}")]
    InvalidArgument(String),

    #[error("null handle passed to FFI entry point")]
    NullArgument,

    #[error("system is not connected")]
    NotConnected,

    #[error("system is already connected")]
    Connected,

    #[error("system is not scanning")]
    NotScanning,

    #[error("system is already scanning")]
    Scanning,

    #[error("scan head reported incompatible major version: local={local_major} remote={remote_major}")]
    VersionIncompatible { local_major: u32, remote_major: u32 },

    #[error("no valid broadcast interfaces")]
    NoBroadcastInterfaces,

    #[error("serial {0} or id {1} already registered")]
    DuplicateHead(u32, u32),

    #[error("no scan head with serial {0} or id {0} is registered")]
    UnknownHead(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("temperature request failed: {0}")]
    Http(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// The numeric codes surfaced across the C host API (§7 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Internal = -1,
    NullArgument = -2,
    InvalidArgument = -3,
    NotConnected = -4,
    Connected = -5,
    NotScanning = -6,
    Scanning = -7,
    VersionCompatibility = -8,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

impl From<&ScanError> for ErrorCode {
    fn from(err: &ScanError) -> Self {
        match err {
            ScanError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ScanError::NullArgument => ErrorCode::NullArgument,
            ScanError::NotConnected => ErrorCode::NotConnected,
            ScanError::Connected => ErrorCode::Connected,
            ScanError::NotScanning => ErrorCode::NotScanning,
            ScanError::Scanning => ErrorCode::Scanning,
            ScanError::VersionIncompatible { .. } => ErrorCode::VersionCompatibility,
            ScanError::NoBroadcastInterfaces => ErrorCode::Internal,
            ScanError::DuplicateHead(..) => ErrorCode::InvalidArgument,
            ScanError::UnknownHead(_) => ErrorCode::InvalidArgument,
            ScanError::Io(_) => ErrorCode::Internal,
            ScanError::Http(_) => ErrorCode::Internal,
            ScanError::Internal(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
