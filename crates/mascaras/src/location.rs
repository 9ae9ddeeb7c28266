//! Reading config files and mask scripts from local paths or S3
//!
//! Accepted forms:
//! - `path/to/file.sql` (relative or absolute)
//! - `file:///abs/path/file.sql`
//! - `s3://bucket/key/file.sql`

use crate::aws::{AwsContext, S3Client};
use anyhow::{Context, Result};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("scheme {scheme} is not supported, can not get {location}")]
    UnsupportedScheme { scheme: String, location: String },

    #[error("invalid s3 location {location}, expected s3://bucket/key")]
    InvalidS3 { location: String },

    #[error("s3 location {location} can not be read without AWS configuration")]
    S3Unavailable { location: String },
}

/// A parsed location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl Location {
    pub fn parse(location: &str) -> Result<Self, LocationError> {
        let Some((scheme, rest)) = location.split_once("://") else {
            return Ok(Location::Local(PathBuf::from(location)));
        };

        match scheme {
            "file" => Ok(Location::Local(PathBuf::from(rest))),
            "s3" => {
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                let key = key.trim_start_matches('/');
                if bucket.is_empty() || key.is_empty() {
                    return Err(LocationError::InvalidS3 {
                        location: location.to_string(),
                    });
                }
                Ok(Location::S3 {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            other => Err(LocationError::UnsupportedScheme {
                scheme: other.to_string(),
                location: location.to_string(),
            }),
        }
    }
}

/// Source of config and SQL bytes
#[allow(async_fn_in_trait)]
pub trait LocationReader {
    async fn read(&self, location: &str) -> Result<Vec<u8>>;

    async fn read_to_string(&self, location: &str) -> Result<String> {
        let bytes = self.read(location).await?;
        String::from_utf8(bytes).with_context(|| format!("{location} is not valid UTF-8"))
    }
}

/// Reads local files directly and S3 objects through the SDK.
pub struct DefaultLocationReader {
    s3: Option<S3Client>,
    /// Skip bucket region discovery when set (`AWS_DEFAULT_REGION`)
    region: Option<String>,
}

impl DefaultLocationReader {
    pub fn new(ctx: &AwsContext) -> Self {
        Self {
            s3: Some(S3Client::from_context(ctx)),
            region: std::env::var("AWS_DEFAULT_REGION")
                .ok()
                .filter(|r| !r.is_empty()),
        }
    }

    /// Reader that only understands local paths
    pub fn local_only() -> Self {
        Self {
            s3: None,
            region: None,
        }
    }
}

impl LocationReader for DefaultLocationReader {
    async fn read(&self, location: &str) -> Result<Vec<u8>> {
        match Location::parse(location)? {
            Location::Local(path) => {
                debug!(path = %path.display(), "Reading local file");
                tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))
            }
            Location::S3 { bucket, key } => {
                let s3 = self.s3.as_ref().ok_or_else(|| LocationError::S3Unavailable {
                    location: location.to_string(),
                })?;
                debug!(bucket = %bucket, key = %key, "Reading from S3");
                s3.get_object(&bucket, &key, self.region.as_deref()).await
            }
        }
    }
}
