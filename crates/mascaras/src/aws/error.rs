//! AWS error classification and handling
//!
//! Provides typed errors for RDS and S3 operations using the error code from
//! `ProvideErrorMetadata` instead of string matching on Debug output.

use aws_sdk_rds::error::ProvideErrorMetadata;
use thiserror::Error;

/// AWS error categories for cleanup and retry decisions
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("resource not found ({code}): {message}")]
    NotFound { code: String, message: String },

    /// Resource already exists
    #[error("resource already exists ({code}): {message}")]
    AlreadyExists { code: String, message: String },

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    Throttled,

    /// Resource is not in a state that allows the operation
    #[error("invalid resource state ({code}): {message}")]
    InvalidState { code: String, message: String },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}{}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "DBClusterNotFoundFault",
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "DBClusterSnapshotNotFoundFault",
    "DBSnapshotNotFound",
    "ExportTaskNotFound",
    "NoSuchBucket",
    "NoSuchKey",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "DBClusterAlreadyExistsFault",
    "DBInstanceAlreadyExists",
    "DBClusterSnapshotAlreadyExistsFault",
    "ExportTaskAlreadyExists",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for operations rejected because of resource state
const INVALID_STATE_CODES: &[&str] = &[
    "InvalidDBClusterStateFault",
    "InvalidDBInstanceState",
    "InvalidDBClusterSnapshotStateFault",
    "InvalidExportSourceState",
];

/// Classify an AWS error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            code: c.to_string(),
            message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists {
            code: c.to_string(),
            message,
        },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if INVALID_STATE_CODES.contains(&c) => AwsError::InvalidState {
            code: c.to_string(),
            message,
        },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK error that exposes error metadata.
///
/// Errors without a service message (dispatch failures, timeouts) keep
/// their display text so the cause is not lost.
pub fn classify_sdk_error<E>(err: &E) -> AwsError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let fallback = err.to_string();
    classify_aws_error(err.code(), Some(err.message().unwrap_or(&fallback)))
}

/// Classify an error from an anyhow::Error chain.
///
/// Every SDK call in this crate converts its failure with
/// [`classify_sdk_error`] before adding context, so walking the chain for an
/// [`AwsError`] finds the classification.
pub fn classify_anyhow_error(error: &anyhow::Error) -> Option<&AwsError> {
    error.chain().find_map(|cause| cause.downcast_ref::<AwsError>())
}

/// True when the error chain contains a "not found" classification
pub fn is_not_found(error: &anyhow::Error) -> bool {
    classify_anyhow_error(error).is_some_and(AwsError::is_not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(
                matches!(&err, AwsError::NotFound { code: c, .. } if c == code),
                "Expected NotFound for code: {code}"
            );
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                matches!(err, AwsError::AlreadyExists { .. }),
                "Expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                matches!(err, AwsError::Throttled),
                "Expected Throttled for code: {code}"
            );
        }
    }

    #[test]
    fn invalid_state_codes() {
        for code in INVALID_STATE_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(matches!(err, AwsError::InvalidState { .. }));
            assert!(!err.is_not_found());
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err2 = classify_aws_error(None, None);
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
        assert_eq!(err2.to_string(), "AWS error: Unknown error");
        assert_eq!(err.to_string(), "AWS error: details (SomeNewError)");
    }

    #[test]
    fn not_found_survives_context() {
        let err = anyhow::Error::new(classify_aws_error(
            Some("DBInstanceNotFound"),
            Some("DBInstance x not found"),
        ))
        .context("Failed to delete db instance");
        assert!(is_not_found(&err));

        let plain: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let plain = plain.context("Failed to delete db cluster").unwrap_err();
        assert!(!is_not_found(&plain));
        assert!(classify_anyhow_error(&plain).is_none());
    }
}
