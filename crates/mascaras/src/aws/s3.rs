//! S3 object retrieval for config files and mask scripts

use crate::aws::context::AwsContext;
use crate::aws::error::classify_sdk_error;
use anyhow::{Context, Result};
use tracing::debug;

/// Region S3 reports (as an empty location constraint) for us-east-1 buckets
const LEGACY_DEFAULT_REGION: &str = "us-east-1";

/// S3 client that follows each bucket to its own region
pub struct S3Client {
    ctx: AwsContext,
}

impl S3Client {
    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Look up the region a bucket lives in
    pub async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let output = self
            .ctx
            .s3_client_for_region(LEGACY_DEFAULT_REGION)
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to get location of bucket {bucket}"))?;

        let region = output
            .location_constraint()
            .map(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .unwrap_or(LEGACY_DEFAULT_REGION)
            .to_string();
        debug!(bucket = %bucket, region = %region, "Resolved bucket region");
        Ok(region)
    }

    /// Download an object into memory.
    ///
    /// When `region` is `None` the bucket region is discovered first.
    pub async fn get_object(&self, bucket: &str, key: &str, region: Option<&str>) -> Result<Vec<u8>> {
        let region = match region {
            Some(region) => region.to_string(),
            None => self.bucket_region(bucket).await?,
        };
        debug!(bucket = %bucket, key = %key, region = %region, "Downloading object");

        let output = self
            .ctx
            .s3_client_for_region(&region)
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to get s3://{bucket}/{key}"))?;

        let body = output
            .body
            .collect()
            .await
            .context("Failed to read object body")?;
        Ok(body.into_bytes().to_vec())
    }
}
