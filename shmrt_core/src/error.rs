//! Error types for shared memory operations

use shmrt_common::config::ConfigError;
use thiserror::Error;

/// Coarse classification of [`ShmError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmErrorKind {
    /// The OS could not provide the object or mapping, or the request was invalid.
    Resource,
    /// No live backing object under the requested name.
    NotFound,
    /// Attach size disagrees with the creation size.
    SizeMismatch,
    /// Mutex state does not fit (or is misplaced) inside the segment.
    OffsetOutOfRange,
}

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Invalid segment size
    #[error("Invalid segment size: {size} bytes (must be 1 byte to 1GB)")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Invalid segment name
    #[error("Invalid segment name: {name:?}")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// Attach size does not match creation size
    #[error("Size mismatch for segment {name}: created with {actual} bytes, attach requested {expected}")]
    SizeMismatch {
        /// Segment name
        name: String,
        /// Size requested by the caller
        expected: usize,
        /// Size of the live backing object
        actual: usize,
    },

    /// Mutex state would not fit inside the segment
    #[error("Mutex at offset {offset} needs {required} bytes but segment holds {segment_size}")]
    OffsetOutOfRange {
        /// Requested byte offset
        offset: usize,
        /// Bytes of lock state
        required: usize,
        /// Segment size in bytes
        segment_size: usize,
    },

    /// Mutex offset not aligned for the lock state
    #[error("Mutex offset {offset} not aligned to {alignment}")]
    MisalignedOffset {
        /// Requested byte offset
        offset: usize,
        /// Required alignment
        alignment: usize,
    },

    /// OS failed to create, size or map a backing object
    #[error("Resource error on {object}: {source}")]
    Resource {
        /// OS object name
        object: String,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },

    /// Runtime configuration rejected
    #[error("Invalid runtime configuration: {source}")]
    Config {
        /// Source validation error
        #[from]
        source: ConfigError,
    },

    /// Process-shared lock call failed
    #[error("Mutex operation {operation} failed: {source}")]
    Lock {
        /// pthread call that failed
        operation: &'static str,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },
}

impl ShmError {
    /// Classify the error.
    pub fn kind(&self) -> ShmErrorKind {
        match self {
            ShmError::NotFound { .. } => ShmErrorKind::NotFound,
            ShmError::SizeMismatch { .. } => ShmErrorKind::SizeMismatch,
            ShmError::OffsetOutOfRange { .. } | ShmError::MisalignedOffset { .. } => {
                ShmErrorKind::OffsetOutOfRange
            }
            ShmError::InvalidSize { .. }
            | ShmError::InvalidName { .. }
            | ShmError::Resource { .. }
            | ShmError::Config { .. }
            | ShmError::Lock { .. } => ShmErrorKind::Resource,
        }
    }

    pub(crate) fn resource(object: &str, source: impl Into<std::io::Error>) -> Self {
        ShmError::Resource {
            object: object.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn lock(operation: &'static str, code: libc::c_int) -> Self {
        ShmError::Lock {
            operation,
            source: std::io::Error::from_raw_os_error(code),
        }
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
