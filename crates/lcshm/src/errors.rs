use std::io;
use thiserror::Error;

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, LcshmError>;

#[derive(Error, Debug)]
pub enum LcshmError {
    /// The semaphore or the shared-memory segment could not be opened,
    /// created, or mapped.
    #[error("semaphore or shared memory unavailable: {0}")]
    Unavailable(#[source] io::Error),

    /// A lock or unlock call failed at the OS level.
    #[error("semaphore lock operation failed: {0}")]
    LockLost(#[source] io::Error),

    /// The encoded message would not fit in the message area.
    #[error("encoded message is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    /// The slot or registry contents do not parse. Readers treat the slot
    /// as empty and may clear it.
    #[error("corrupt shared memory contents: {0}")]
    Corrupt(&'static str),

    /// The connection registry already holds its maximum of entries.
    #[error("connection registry is full")]
    Full,

    /// The connection to remove is not registered.
    #[error("connection is not registered")]
    NotFound,

    /// The connection name fails the validity predicate.
    #[error("invalid connection name")]
    InvalidName,

    /// A field value is outside its enumerated or permitted set.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        let err = LcshmError::TooLarge {
            size: 40961,
            max: 40960,
        };
        assert_eq!(
            err.to_string(),
            "encoded message is 40961 bytes, limit is 40960"
        );

        let err = LcshmError::Corrupt("message size out of range");
        assert_eq!(
            err.to_string(),
            "corrupt shared memory contents: message size out of range"
        );

        assert_eq!(
            LcshmError::Full.to_string(),
            "connection registry is full"
        );
        assert_eq!(
            LcshmError::NotFound.to_string(),
            "connection is not registered"
        );
    }

    #[test]
    fn test_os_errors_keep_their_source() {
        use std::error::Error as _;

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = LcshmError::Unavailable(io_err);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("access denied"));
    }
}
