//! RDS cluster, instance, snapshot and export task management

use crate::aws::context::AwsContext;
use crate::aws::error::classify_sdk_error;
use crate::aws::types::{
    ClusterInfo, CreateInstanceRequest, EndpointInfo, ExportTaskFailure, ExportTaskInfo,
    ExportTaskRequest, InstanceInfo, RestoreClusterRequest, SnapshotInfo,
};
use anyhow::{Context, Result};
use aws_sdk_rds::primitives::DateTime as SmithyDateTime;
use aws_sdk_rds::types::{DbCluster, DbClusterEndpoint, DbClusterSnapshot, DbInstance};
use aws_sdk_rds::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Operations the orchestrator needs from RDS.
///
/// Describe calls return `Ok(None)` when the service answered with an empty
/// list, so callers can tell "gone" apart from a failed call.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
pub trait RdsOperations: Send + Sync {
    /// Clone a cluster with copy-on-write at its latest restorable time
    async fn restore_cluster(&self, request: &RestoreClusterRequest) -> Result<ClusterInfo>;

    async fn describe_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>>;

    /// Create a DB instance inside a cluster
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<InstanceInfo>;

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>>;

    /// List the cluster's WRITER endpoints
    async fn describe_writer_endpoints(&self, cluster_id: &str) -> Result<Vec<EndpointInfo>>;

    async fn create_cluster_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
    ) -> Result<SnapshotInfo>;

    async fn describe_cluster_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>>;

    /// Start exporting a snapshot to S3
    async fn start_export_task(
        &self,
        request: &ExportTaskRequest,
    ) -> std::result::Result<ExportTaskInfo, ExportTaskFailure>;

    /// Delete an instance without a final snapshot
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;

    /// Delete a cluster without a final snapshot
    async fn delete_cluster(&self, cluster_id: &str) -> Result<()>;
}

/// RDS client backed by the AWS SDK
#[derive(Clone)]
pub struct RdsClient {
    client: Client,
}

impl RdsClient {
    /// Create an RDS client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.rds_client(),
        }
    }
}

fn to_chrono(dt: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn cluster_info(cluster: &DbCluster) -> ClusterInfo {
    ClusterInfo {
        identifier: cluster.db_cluster_identifier().unwrap_or_default().to_string(),
        arn: cluster.db_cluster_arn().unwrap_or_default().to_string(),
        engine: cluster.engine().unwrap_or_default().to_string(),
        status: cluster.status().unwrap_or_default().to_string(),
        port: cluster.port().and_then(|p| u16::try_from(p).ok()),
        latest_restorable_time: cluster.latest_restorable_time().and_then(to_chrono),
    }
}

fn instance_info(instance: &DbInstance) -> InstanceInfo {
    InstanceInfo {
        identifier: instance.db_instance_identifier().unwrap_or_default().to_string(),
        arn: instance.db_instance_arn().unwrap_or_default().to_string(),
        status: instance.db_instance_status().unwrap_or_default().to_string(),
    }
}

fn endpoint_info(endpoint: &DbClusterEndpoint) -> EndpointInfo {
    EndpointInfo {
        endpoint: endpoint.endpoint().unwrap_or_default().to_string(),
        endpoint_type: endpoint.endpoint_type().unwrap_or_default().to_string(),
        status: endpoint.status().unwrap_or_default().to_string(),
    }
}

fn snapshot_info(snapshot: &DbClusterSnapshot) -> SnapshotInfo {
    SnapshotInfo {
        identifier: snapshot
            .db_cluster_snapshot_identifier()
            .unwrap_or_default()
            .to_string(),
        arn: snapshot.db_cluster_snapshot_arn().unwrap_or_default().to_string(),
        status: snapshot.status().unwrap_or_default().to_string(),
        percent_progress: snapshot.percent_progress().unwrap_or_default(),
    }
}

impl RdsOperations for RdsClient {
    async fn restore_cluster(&self, request: &RestoreClusterRequest) -> Result<ClusterInfo> {
        info!(
            source = %request.source_cluster,
            target = %request.target_cluster,
            "Restoring db cluster to point in time"
        );

        let security_groups = if request.security_group_ids.is_empty() {
            None
        } else {
            Some(request.security_group_ids.clone())
        };

        let output = self
            .client
            .restore_db_cluster_to_point_in_time()
            .source_db_cluster_identifier(&request.source_cluster)
            .db_cluster_identifier(&request.target_cluster)
            .restore_type(RestoreClusterRequest::RESTORE_TYPE)
            .use_latest_restorable_time(true)
            .set_vpc_security_group_ids(security_groups)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to restore db cluster")?;

        output
            .db_cluster()
            .map(cluster_info)
            .context("RestoreDBClusterToPointInTime returned no cluster")
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>> {
        let output = self
            .client
            .describe_db_clusters()
            .db_cluster_identifier(cluster_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to describe db cluster")?;

        Ok(output.db_clusters().first().map(cluster_info))
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<InstanceInfo> {
        info!(
            cluster = %request.cluster,
            instance = %request.instance,
            class = %request.instance_class,
            "Creating db instance"
        );

        let output = self
            .client
            .create_db_instance()
            .db_cluster_identifier(&request.cluster)
            .db_instance_identifier(&request.instance)
            .db_instance_class(&request.instance_class)
            .engine(&request.engine)
            .publicly_accessible(request.publicly_accessible)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to create db instance")?;

        output
            .db_instance()
            .map(instance_info)
            .context("CreateDBInstance returned no instance")
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>> {
        let output = self
            .client
            .describe_db_instances()
            .db_instance_identifier(instance_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to describe db instance")?;

        Ok(output.db_instances().first().map(instance_info))
    }

    async fn describe_writer_endpoints(&self, cluster_id: &str) -> Result<Vec<EndpointInfo>> {
        let output = self
            .client
            .describe_db_cluster_endpoints()
            .db_cluster_identifier(cluster_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to describe db cluster endpoints")?;

        let endpoints: Vec<EndpointInfo> = output
            .db_cluster_endpoints()
            .iter()
            .map(endpoint_info)
            .filter(EndpointInfo::is_writer)
            .collect();
        debug!(cluster = %cluster_id, count = endpoints.len(), "Described writer endpoints");
        Ok(endpoints)
    }

    async fn create_cluster_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
    ) -> Result<SnapshotInfo> {
        info!(cluster = %cluster_id, snapshot = %snapshot_id, "Creating db cluster snapshot");

        let output = self
            .client
            .create_db_cluster_snapshot()
            .db_cluster_identifier(cluster_id)
            .db_cluster_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to create db cluster snapshot")?;

        output
            .db_cluster_snapshot()
            .map(snapshot_info)
            .context("CreateDBClusterSnapshot returned no snapshot")
    }

    async fn describe_cluster_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>> {
        let output = self
            .client
            .describe_db_cluster_snapshots()
            .db_cluster_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to describe db cluster snapshot")?;

        Ok(output.db_cluster_snapshots().first().map(snapshot_info))
    }

    async fn start_export_task(
        &self,
        request: &ExportTaskRequest,
    ) -> std::result::Result<ExportTaskInfo, ExportTaskFailure> {
        info!(
            task = %request.task_id,
            source = %request.source_arn,
            bucket = %request.s3_bucket,
            "Starting export task"
        );

        let export_only = if request.export_only.is_empty() {
            None
        } else {
            Some(request.export_only.clone())
        };

        let output = self
            .client
            .start_export_task()
            .export_task_identifier(&request.task_id)
            .source_arn(&request.source_arn)
            .iam_role_arn(&request.iam_role_arn)
            .kms_key_id(&request.kms_key_id)
            .s3_bucket_name(&request.s3_bucket)
            .set_s3_prefix(request.s3_prefix.clone())
            .set_export_only(export_only)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to start export task")
            .map_err(ExportTaskFailure::new)?;

        Ok(ExportTaskInfo {
            task_id: output
                .export_task_identifier()
                .unwrap_or(request.task_id.as_str())
                .to_string(),
            status: output.status().map(str::to_string),
            failure_cause: output.failure_cause().map(str::to_string),
            warning_message: output.warning_message().map(str::to_string),
        })
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance = %instance_id, "Deleting db instance");

        self.client
            .delete_db_instance()
            .db_instance_identifier(instance_id)
            .skip_final_snapshot(true)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to delete db instance")?;

        Ok(())
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        info!(cluster = %cluster_id, "Deleting db cluster");

        self.client
            .delete_db_cluster()
            .db_cluster_identifier(cluster_id)
            .skip_final_snapshot(true)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .context("Failed to delete db cluster")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_smithy_timestamps() {
        let dt = SmithyDateTime::from_secs_and_nanos(1_700_000_000, 500);
        let converted = to_chrono(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 500);
    }

    #[test]
    fn cluster_conversion_reads_port_and_engine() {
        let cluster = DbCluster::builder()
            .db_cluster_identifier("demo-test")
            .engine("aurora-postgresql")
            .status("available")
            .port(5432)
            .build();
        let info = cluster_info(&cluster);
        assert_eq!(info.identifier, "demo-test");
        assert_eq!(info.engine, "aurora-postgresql");
        assert_eq!(info.port, Some(5432));
        assert!(info.is_available());
        assert!(info.latest_restorable_time.is_none());
    }

    #[test]
    fn snapshot_conversion_defaults_progress() {
        let snapshot = DbClusterSnapshot::builder()
            .db_cluster_snapshot_identifier("demo-test-snapshot")
            .status("creating")
            .build();
        let info = snapshot_info(&snapshot);
        assert_eq!(info.percent_progress, 0);
        assert!(!info.is_available());
    }
}
