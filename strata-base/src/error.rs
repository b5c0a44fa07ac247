use crate::ResourceUuid;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum StrataError {
    StringError(String),
    // Lookup of a UUID that is not in the ledger
    NotFound(ResourceUuid),
    // Preamble, size or layout of a resource file (or the ledger) does not match
    InvalidResourceFile(String),
    // Failure reported by an external decoder or while reading a text resource
    ParseError(String),
    // Path or UUID generation exhausted its retries
    TooManyAttempts(String),
    InvalidPathHint(String),
    UnsupportedEncoding(String),
    // A promise was dropped without ever being resolved
    BrokenPromise,
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
    ImageError(Arc<image::ImageError>),
    UuidError(uuid::Error),
}

impl std::error::Error for StrataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            StrataError::StringError(_) => None,
            StrataError::NotFound(_) => None,
            StrataError::InvalidResourceFile(_) => None,
            StrataError::ParseError(_) => None,
            StrataError::TooManyAttempts(_) => None,
            StrataError::InvalidPathHint(_) => None,
            StrataError::UnsupportedEncoding(_) => None,
            StrataError::BrokenPromise => None,
            StrataError::IoError(ref e) => Some(&**e),
            StrataError::JsonError(ref e) => Some(&**e),
            StrataError::ImageError(ref e) => Some(&**e),
            StrataError::UuidError(ref e) => Some(e),
        }
    }
}

impl core::fmt::Display for StrataError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            StrataError::StringError(ref e) => e.fmt(fmt),
            StrataError::NotFound(ref uuid) => write!(fmt, "Resource {} not found", uuid),
            StrataError::InvalidResourceFile(ref e) => write!(fmt, "Invalid resource file: {}", e),
            StrataError::ParseError(ref e) => write!(fmt, "Parse error: {}", e),
            StrataError::TooManyAttempts(ref e) => write!(fmt, "Too many attempts: {}", e),
            StrataError::InvalidPathHint(ref e) => write!(fmt, "Invalid path hint: {}", e),
            StrataError::UnsupportedEncoding(ref e) => write!(fmt, "Unsupported encoding: {}", e),
            StrataError::BrokenPromise => "BrokenPromise".fmt(fmt),
            StrataError::IoError(ref e) => e.fmt(fmt),
            StrataError::JsonError(ref e) => e.fmt(fmt),
            StrataError::ImageError(ref e) => e.fmt(fmt),
            StrataError::UuidError(ref e) => e.fmt(fmt),
        }
    }
}

impl From<&str> for StrataError {
    fn from(str: &str) -> Self {
        StrataError::StringError(str.to_string())
    }
}

impl From<String> for StrataError {
    fn from(string: String) -> Self {
        StrataError::StringError(string)
    }
}

impl From<std::io::Error> for StrataError {
    fn from(error: std::io::Error) -> Self {
        StrataError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(error: serde_json::Error) -> Self {
        StrataError::JsonError(Arc::new(error))
    }
}

impl From<image::ImageError> for StrataError {
    fn from(error: image::ImageError) -> Self {
        StrataError::ImageError(Arc::new(error))
    }
}

impl From<uuid::Error> for StrataError {
    fn from(error: uuid::Error) -> Self {
        StrataError::UuidError(error)
    }
}

pub type StrataResult<T> = Result<T, StrataError>;
