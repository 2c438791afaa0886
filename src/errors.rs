use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepackerError {
    /// The job server has no more dates available.
    #[error("no dates available")]
    Empty,

    /// The job server may have more dates in the future; retry after a delay.
    #[error("more dates may become available")]
    Wait,

    /// A processor determined that file content is corrupt and should be
    /// dropped from the output archive.
    #[error("file content is corrupt")]
    Corrupt,

    /// Input and output archive file counts disagree after a repack.
    #[error("archive count mismatch")]
    CountMismatch,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("wrong response status: {0}")]
    BadStatus(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for RepackerError {
    fn from(err: reqwest::Error) -> Self {
        RepackerError::Request(err.to_string())
    }
}

impl From<std::io::Error> for RepackerError {
    fn from(err: std::io::Error) -> Self {
        RepackerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch_display() {
        assert_eq!(
            RepackerError::CountMismatch.to_string(),
            "archive count mismatch"
        );
    }

    #[test]
    fn test_empty_and_wait_display() {
        assert_eq!(RepackerError::Empty.to_string(), "no dates available");
        assert_eq!(
            RepackerError::Wait.to_string(),
            "more dates may become available"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: RepackerError = io_err.into();
        match err {
            RepackerError::Storage(msg) => assert!(msg.contains("file missing")),
            other => panic!("Expected Storage, got: {:?}", other),
        }
    }
}
