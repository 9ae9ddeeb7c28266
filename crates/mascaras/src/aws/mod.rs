//! AWS service clients
//!
//! - [`context`]: shared SDK configuration
//! - [`error`]: error code classification
//! - [`rds`]: the [`RdsOperations`] trait and its SDK-backed client
//! - [`s3`]: object downloads for remote config and SQL files
//! - [`types`]: SDK-free views of RDS resources

pub mod context;
pub mod error;
pub mod rds;
pub mod s3;
pub mod types;

pub use context::AwsContext;
pub use error::{classify_anyhow_error, is_not_found, AwsError};
pub use rds::{RdsClient, RdsOperations};
pub use s3::S3Client;
pub use types::{
    ClusterInfo, CreateInstanceRequest, EndpointInfo, ExportTaskFailure, ExportTaskInfo,
    ExportTaskRequest, InstanceInfo, RestoreClusterRequest, SnapshotInfo,
};
