//! Temporary RDS resource types and cleanup ordering
//!
//! Resources must be released in dependency order: RDS refuses to delete a
//! cluster that still has member instances.

use serde::Serialize;

/// Types of temporary resources a mascaras run creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Writer instance attached to the temporary cluster
    DbInstance,
    /// Copy-on-write clone of the source cluster
    DbCluster,
    /// Snapshot of the masked cluster (kept after the run)
    ClusterSnapshot,
    /// Snapshot export to S3 (kept after the run)
    ExportTask,
}

impl ResourceKind {
    /// Get cleanup priority (lower number = cleanup first)
    ///
    /// - 0: Delete the DB instance (the cluster cannot go while it exists)
    /// - 1: Delete the DB cluster
    ///
    /// Snapshots and export tasks are the product of the run and are never
    /// deleted; they report `None`.
    pub fn cleanup_priority(self) -> Option<u8> {
        match self {
            ResourceKind::DbInstance => Some(0),
            ResourceKind::DbCluster => Some(1),
            ResourceKind::ClusterSnapshot | ResourceKind::ExportTask => None,
        }
    }

    /// Human readable name used in log lines
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::DbInstance => "db instance",
            ResourceKind::DbCluster => "db cluster",
            ResourceKind::ClusterSnapshot => "db cluster snapshot",
            ResourceKind::ExportTask => "export task",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_before_cluster() {
        assert!(
            ResourceKind::DbInstance.cleanup_priority() < ResourceKind::DbCluster.cleanup_priority(),
            "Instances must be deleted before their cluster"
        );
    }

    #[test]
    fn test_products_are_never_cleaned() {
        assert_eq!(ResourceKind::ClusterSnapshot.cleanup_priority(), None);
        assert_eq!(ResourceKind::ExportTask.cleanup_priority(), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ResourceKind::DbInstance.to_string(), "db instance");
        assert_eq!(ResourceKind::DbCluster.to_string(), "db cluster");
    }
}
