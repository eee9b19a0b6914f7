//! Error types for the PCM plugin framework
//!
//! Every fallible entry point returns [`Result`]. Callers that need the
//! classic negative error code (zero on success) use [`Error::code`].

use thiserror::Error;

use crate::pcm::params::ParamKind;

/// errno values used by [`Error::code`]
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const ENXIO: i32 = 6;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
    pub const EPIPE: i32 = 32;
    pub const ENOSYS: i32 = 38;
    pub const EBADFD: i32 = 77;
    pub const ENOTSUP: i32 = 95;
    /// Library specific: incompatible plugin ABI version
    pub const INCOMPATIBLE_VERSION: i32 = 500_000;
}

/// Main error type for the framework
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("Incompatible parameters: {0} has no remaining value")]
    IncompatibleParams(ParamKind),

    #[error("Parameter refinement did not converge after {0} iterations")]
    NotConverged(usize),

    #[error("Parameters are not fully determined: {0}")]
    Unresolved(ParamKind),

    #[error("PCM {0} has no active slave")]
    NoSlave(String),

    #[error("Invalid state: {0}")]
    BadState(String),

    #[error("Operation would block")]
    WouldBlock,

    #[error("Buffer underrun/overrun")]
    Xrun,

    #[error("Operation not supported by {0}")]
    NotSupported(String),

    #[error("Unknown PCM {0}")]
    UnknownPcm(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Unknown field {field} in {context}")]
    UnknownField { context: String, field: String },

    #[error("Missing field {field} in {context}")]
    MissingField { context: String, field: String },

    #[error("Invalid type for {field} in {context}")]
    InvalidType { context: String, field: String },

    #[error("Invalid value {value:?} for {field}")]
    InvalidValue { field: String, value: String },

    #[error("{0} is not defined")]
    Undefined(String),
}

/// Dynamic loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Cannot open shared library {0}")]
    LibraryNotFound(String),

    #[error("Symbol {symbol} is not defined inside {library}")]
    SymbolMissing { symbol: String, library: String },

    #[error("Symbol {symbol} has an incompatible version (expected {expected})")]
    IncompatibleVersion { symbol: String, expected: String },

    #[error("Unknown {subsystem} type {type_name}")]
    UnknownType { subsystem: String, type_name: String },
}

impl LoaderError {
    /// Negative error code for this loader failure
    pub fn code(&self) -> i32 {
        match self {
            LoaderError::LibraryNotFound(_) => -errno::ENOENT,
            LoaderError::SymbolMissing { .. } => -errno::ENXIO,
            LoaderError::IncompatibleVersion { .. } => -errno::INCOMPATIBLE_VERSION,
            LoaderError::UnknownType { .. } => -errno::ENOENT,
        }
    }
}

impl Error {
    /// Negative error code equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => -errno::EINVAL,
            Error::NoMemory(_) => -errno::ENOMEM,
            Error::IncompatibleParams(_) => -errno::EINVAL,
            Error::NotConverged(_) => -errno::EINVAL,
            Error::Unresolved(_) => -errno::EINVAL,
            Error::NoSlave(_) => -errno::EBADFD,
            Error::BadState(_) => -errno::EBADFD,
            Error::WouldBlock => -errno::EAGAIN,
            Error::Xrun => -errno::EPIPE,
            Error::NotSupported(_) => -errno::ENOSYS,
            Error::UnknownPcm(_) => -errno::ENOENT,
            Error::Config(_) => -errno::EINVAL,
            Error::Loader(e) => e.code(),
            Error::Backend(_) => -errno::ENXIO,
            Error::Io(e) => -e.raw_os_error().unwrap_or(errno::EINVAL),
        }
    }
}

/// Result type alias for the framework
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative() {
        let errors = [
            Error::InvalidArgument("capture".into()),
            Error::NoMemory("table".into()),
            Error::IncompatibleParams(ParamKind::Format),
            Error::NoSlave("fs".into()),
            Error::Config(ConfigError::Undefined("slaves".into())),
            Error::Loader(LoaderError::LibraryNotFound("libx.so".into())),
        ];
        for err in &errors {
            assert!(err.code() < 0, "{} should map to a negative code", err);
        }
    }

    #[test]
    fn test_loader_codes_are_distinct() {
        let missing_lib = LoaderError::LibraryNotFound("a".into()).code();
        let missing_sym = LoaderError::SymbolMissing {
            symbol: "s".into(),
            library: "a".into(),
        }
        .code();
        let bad_version = LoaderError::IncompatibleVersion {
            symbol: "s".into(),
            expected: "v".into(),
        }
        .code();
        assert_ne!(missing_lib, missing_sym);
        assert_ne!(missing_sym, bad_version);
        assert_eq!(missing_lib, -errno::ENOENT);
        assert_eq!(missing_sym, -errno::ENXIO);
    }
}
