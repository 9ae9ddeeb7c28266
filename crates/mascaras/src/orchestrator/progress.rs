//! Progress reporting for a run
//!
//! The orchestrator reports through [`RunReporter`] instead of logging
//! directly, so tests can observe phases and warnings without a subscriber.

use crate::error::RunError;
use mascaras_common::ResourceKind;
use std::fmt;
use tracing::{error, info, warn};

use super::RunReport;

/// Major transitions of a run, in the order they normally happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Validating,
    Cloning,
    WaitingForCluster,
    CreatingInstance,
    WaitingForInstance,
    WaitingForEndpoint,
    Masking,
    Interactive,
    WaitingForRestorableTime,
    Snapshotting,
    CleaningUp,
    WaitingForSnapshot,
    Exporting,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Validating => "validating configuration",
            RunPhase::Cloning => "cloning source cluster",
            RunPhase::WaitingForCluster => "waiting for temp cluster",
            RunPhase::CreatingInstance => "creating temp instance",
            RunPhase::WaitingForInstance => "waiting for temp instance",
            RunPhase::WaitingForEndpoint => "waiting for writer endpoint",
            RunPhase::Masking => "running mask script",
            RunPhase::Interactive => "interactive prompt",
            RunPhase::WaitingForRestorableTime => "waiting for restorable time",
            RunPhase::Snapshotting => "creating snapshot",
            RunPhase::CleaningUp => "cleaning up temp resources",
            RunPhase::WaitingForSnapshot => "waiting for snapshot",
            RunPhase::Exporting => "starting export task",
        };
        f.write_str(s)
    }
}

/// Trait for reporting run progress
pub trait RunReporter: Send + Sync {
    /// Report a phase change
    fn report_phase(&self, phase: RunPhase);

    /// Report a resource the run created
    fn report_resource(&self, kind: ResourceKind, id: &str, arn: Option<&str>);

    /// Report a non-fatal condition the operator should see
    fn report_warning(&self, message: &str);

    /// Report a failed scope-exit cleanup; never changes the run result
    fn report_cleanup_failure(&self, error: &anyhow::Error);

    /// Report the final outcome
    fn report_finished(&self, result: &Result<RunReport, RunError>);
}

/// Progress reporter that logs through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl RunReporter for LogReporter {
    fn report_phase(&self, phase: RunPhase) {
        info!(phase = ?phase, "{phase}");
    }

    fn report_resource(&self, kind: ResourceKind, id: &str, arn: Option<&str>) {
        match arn {
            Some(arn) => info!(kind = %kind, id = %id, arn = %arn, "Created {kind}"),
            None => info!(kind = %kind, id = %id, "Created {kind}"),
        }
    }

    fn report_warning(&self, message: &str) {
        warn!("{message}");
    }

    fn report_cleanup_failure(&self, error: &anyhow::Error) {
        warn!(error = %format!("{error:#}"), "Cleanup failed, temp resources may be left behind");
    }

    fn report_finished(&self, result: &Result<RunReport, RunError>) {
        match result {
            Ok(report) => info!(
                temp_cluster = %report.temp_cluster,
                snapshot = ?report.snapshot_identifier,
                export_task = ?report.export_task_identifier,
                "Run succeeded"
            ),
            Err(RunError::Cancelled) => warn!("Run cancelled"),
            Err(e) => error!(error = %e, "Run failed"),
        }
    }
}
