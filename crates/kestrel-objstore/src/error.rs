//! Error types for object storage

use thiserror::Error;

/// Errors from object store operations
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backing bucket has not been created yet
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Embedded database failure
    #[error("database error: {0}")]
    Database(String),

    /// Non-success HTTP response from a remote backend
    #[error("{method} {key}: HTTP {status}: {message}")]
    Http {
        method: String,
        key: String,
        status: u16,
        message: String,
    },

    /// Transport failure talking to a remote backend
    #[error("request failed: {0}")]
    Request(String),

    /// Invalid backend configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("lock error: {0}")]
    Lock(String),
}

impl ObjectStoreError {
    /// True if the object itself is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::NotFound(_))
    }

    /// True if the bucket is absent
    pub fn is_bucket_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::BucketNotFound(_))
    }
}

impl From<reqwest::Error> for ObjectStoreError {
    fn from(err: reqwest::Error) -> Self {
        ObjectStoreError::Request(err.to_string())
    }
}

/// Result type for object store operations
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ObjectStoreError::NotFound("operations/op-1.json".to_string());
        assert_eq!(err.to_string(), "object not found: operations/op-1.json");

        let err = ObjectStoreError::BucketNotFound("kestrel-state".to_string());
        assert_eq!(err.to_string(), "bucket not found: kestrel-state");

        let err = ObjectStoreError::Http {
            method: "PUT".to_string(),
            key: "a.json".to_string(),
            status: 403,
            message: "AccessDenied".to_string(),
        };
        assert_eq!(err.to_string(), "PUT a.json: HTTP 403: AccessDenied");
    }

    #[test]
    fn test_error_kinds() {
        assert!(ObjectStoreError::NotFound("k".into()).is_not_found());
        assert!(!ObjectStoreError::NotFound("k".into()).is_bucket_not_found());
        assert!(ObjectStoreError::BucketNotFound("b".into()).is_bucket_not_found());
        assert!(!ObjectStoreError::Database("boom".into()).is_not_found());
    }
}
