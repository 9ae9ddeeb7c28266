//! Domain views of the RDS resources a run touches
//!
//! These carry just the fields the orchestrator reads, so the orchestrator
//! and its tests never see SDK types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

const AVAILABLE: &str = "available";

fn is_available(status: &str) -> bool {
    status.eq_ignore_ascii_case(AVAILABLE)
}

/// Aurora cluster as reported by RestoreDBClusterToPointInTime / DescribeDBClusters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub identifier: String,
    pub arn: String,
    pub engine: String,
    pub status: String,
    pub port: Option<u16>,
    pub latest_restorable_time: Option<DateTime<Utc>>,
}

impl ClusterInfo {
    pub fn is_available(&self) -> bool {
        is_available(&self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub identifier: String,
    pub arn: String,
    pub status: String,
}

impl InstanceInfo {
    pub fn is_available(&self) -> bool {
        is_available(&self.status)
    }
}

/// Cluster endpoint (host name plus role)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub endpoint: String,
    pub endpoint_type: String,
    pub status: String,
}

impl EndpointInfo {
    pub const WRITER: &'static str = "WRITER";

    pub fn is_available(&self) -> bool {
        is_available(&self.status)
    }

    pub fn is_writer(&self) -> bool {
        self.endpoint_type.eq_ignore_ascii_case(Self::WRITER)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub identifier: String,
    pub arn: String,
    pub status: String,
    pub percent_progress: i32,
}

impl SnapshotInfo {
    pub fn is_available(&self) -> bool {
        is_available(&self.status)
    }
}

/// Copy-on-write clone of a source cluster at its latest restorable time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreClusterRequest {
    pub source_cluster: String,
    pub target_cluster: String,
    pub security_group_ids: Vec<String>,
}

impl RestoreClusterRequest {
    pub const RESTORE_TYPE: &'static str = "copy-on-write";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    pub cluster: String,
    pub instance: String,
    pub instance_class: String,
    pub engine: String,
    pub publicly_accessible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTaskRequest {
    pub task_id: String,
    pub source_arn: String,
    pub iam_role_arn: String,
    pub kms_key_id: String,
    pub s3_bucket: String,
    pub s3_prefix: Option<String>,
    pub export_only: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportTaskInfo {
    pub task_id: String,
    pub status: Option<String>,
    pub failure_cause: Option<String>,
    pub warning_message: Option<String>,
}

/// StartExportTask failure, with whatever diagnostics the service attached
#[derive(Debug, Error)]
#[error("StartExportTask failed")]
pub struct ExportTaskFailure {
    pub failure_cause: Option<String>,
    pub warning_message: Option<String>,
    #[source]
    pub source: anyhow::Error,
}

impl ExportTaskFailure {
    pub fn new(source: anyhow::Error) -> Self {
        Self {
            failure_cause: None,
            warning_message: None,
            source,
        }
    }
}
