use thiserror::Error;

/// Errors that can occur during upload operations
#[derive(Error, Debug)]
pub enum UploadError {
    /// Credentials were rejected (HTTP 401)
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Request parameters were rejected (HTTP 400)
    #[error("Request parameters validation error: {message}")]
    Validation { message: String },

    /// The project is not allowed to perform the request (HTTP 403)
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Rate limit still in effect after the transport retries ran out
    #[error("Request was throttled{}", retry_hint(.retry_after))]
    Throttled { retry_after: Option<u64> },

    /// Payload exceeds what the endpoint accepts (HTTP 413 or local check)
    #[error("File too large: {message}")]
    FileTooLarge { message: String },

    /// Any other non-success HTTP status
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-related error
    #[error("Network error: {message}")]
    Network { message: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller supplied invalid or missing parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The remote from-URL job reported a failure
    #[error("Remote upload failed: {0}")]
    RemoteJob(String),

    /// The provider does not know the from-URL token
    #[error("Unknown upload token: {token}")]
    UnknownToken { token: String },

    /// A part still failed after all of its attempts
    #[error("Part {index} failed after {attempts} attempt(s): {source}")]
    PartUpload {
        index: usize,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    /// Declared size differs from what the data source holds
    #[error("Declared size {declared} bytes does not match data source length {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    /// The caller cancelled the operation
    #[error("Upload cancelled")]
    Cancelled,

    /// The background worker ended without reporting an outcome
    #[error("Upload worker stopped without a result")]
    WorkerGone,

    /// Generic error wrapper
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) if *secs > 0 => format!(". Expected available in {} second(s)", secs),
        _ => String::new(),
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network {
            message: error.to_string(),
        }
    }
}

impl UploadError {
    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Throttled { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::PartUpload { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth { message } => {
                format!(
                    "Authentication failed: {}\n\nPossible solutions:\n  \
                     1. Check UPLOADCARE_PUBLIC_KEY in .env\n  \
                     2. Verify the key belongs to an active project",
                    message
                )
            }
            Self::Throttled { retry_after } => {
                format!(
                    "Request was throttled{}\n\nPossible solutions:\n  \
                     1. Wait and restart the upload\n  \
                     2. Lower UPLOADCARE_MAX_CONCURRENT",
                    retry_hint(retry_after)
                )
            }
            Self::FileTooLarge { message } => {
                format!(
                    "File too large: {}\n\nPossible solutions:\n  \
                     1. Use multipart upload for files > 10MB\n  \
                     2. Check the file size cap of your project",
                    message
                )
            }
            Self::Network { message } => {
                format!(
                    "Network error: {}\n\nPossible solutions:\n  \
                     1. Check your internet connection\n  \
                     2. Verify UPLOADCARE_UPLOAD_BASE points to the upload API\n  \
                     3. Check if you're behind a proxy/firewall",
                    message
                )
            }
            Self::SizeMismatch { declared, actual } => {
                format!(
                    "Declared size {} bytes does not match data source length {} bytes\n\n\
                     Pass the exact byte length of the data as the multipart size",
                    declared, actual
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_message() {
        let err = UploadError::Throttled {
            retry_after: Some(10),
        };
        assert_eq!(
            err.to_string(),
            "Request was throttled. Expected available in 10 second(s)"
        );

        let err = UploadError::Throttled { retry_after: None };
        assert_eq!(err.to_string(), "Request was throttled");
    }

    #[test]
    fn test_part_upload_keeps_source() {
        let err = UploadError::PartUpload {
            index: 3,
            attempts: 2,
            source: Box::new(UploadError::Http {
                status: 503,
                body: "slow down".to_string(),
            }),
        };
        assert!(err.to_string().contains("Part 3 failed after 2 attempt(s)"));
        assert!(err.is_transient());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            UploadError::Network {
                message: "reset".to_string()
            }
            .is_transient()
        );
        assert!(!UploadError::Cancelled.is_transient());
        assert!(
            !UploadError::Validation {
                message: "bad".to_string()
            }
            .is_transient()
        );
        assert!(
            !UploadError::Http {
                status: 404,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_user_message_has_suggestions() {
        let msg = UploadError::FileTooLarge {
            message: "200 bytes (max: 100 bytes)".to_string(),
        }
        .user_message();
        assert!(msg.contains("Possible solutions"));
        assert!(msg.contains("multipart"));

        assert_eq!(UploadError::Cancelled.user_message(), "Upload cancelled");
    }
}
