use std::fmt;
use std::io;
use thiserror::Error;

/// Numeric status code reported by an engine.
///
/// The well-known codes follow the B+tree engine's status table. Codes an
/// engine reports that are not listed here pass through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const FILE: Status = Status(0x101);
    pub const FILE_READ: Status = Status(0x103);
    pub const FILE_WRITE: Status = Status(0x104);
    pub const COMPACT: Status = Status(0x107);
    pub const ALLOC: Status = Status(0x301);
    pub const NOT_FOUND: Status = Status(0x401);
    pub const UPDATE_CONFLICT: Status = Status(0x404);
    pub const REMOVE_CONFLICT: Status = Status(0x405);

    /// Wrap a raw engine code
    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    /// Raw numeric code
    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Status::OK => "ok",
            Status::FILE => "file error",
            Status::FILE_READ => "file read error",
            Status::FILE_WRITE => "file write error",
            Status::COMPACT => "compaction error",
            Status::ALLOC => "allocation error",
            Status::NOT_FOUND => "not found",
            Status::UPDATE_CONFLICT => "update conflict",
            Status::REMOVE_CONFLICT => "remove conflict",
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:x})", name, self.0),
            None => write!(f, "engine status {}", self.0),
        }
    }
}

/// Error returned by an engine call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct EngineError {
    status: Status,
    message: String,
}

impl EngineError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(Status::NOT_FOUND, "key not found")
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn code(&self) -> i32 {
        self.status.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum BplusError {
    #[error("Store is not opened")]
    NotOpen,

    #[error("Store is already opened")]
    AlreadyOpen,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("No async runtime available to run the task")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BplusError {
    /// Engine status carried by this error, if it came from the engine
    pub fn status(&self) -> Option<Status> {
        match self {
            BplusError::Engine(e) => Some(e.status()),
            _ => None,
        }
    }

    /// True for an engine not-found status
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(Status::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, BplusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::NOT_FOUND.to_string(), "not found (0x401)");
        assert_eq!(Status::from_code(-30798).to_string(), "engine status -30798");
    }

    #[test]
    fn test_engine_error_status_surfaces() {
        let err: BplusError = EngineError::not_found().into();
        assert!(err.is_not_found());
        assert_eq!(err.status().map(Status::code), Some(0x401));
        assert_eq!(BplusError::NotOpen.status(), None);
    }
}
