//! Run orchestration
//!
//! A run restores a copy-on-write clone of the source cluster, adds a writer
//! instance, runs the mask against it, waits until the masked data is
//! covered by the cluster's restorable time, snapshots it and optionally
//! exports the snapshot to S3. The temp cluster and instance are deleted on
//! every exit path.

mod progress;

pub use progress::{LogReporter, RunPhase, RunReporter};

use crate::aws::{
    ClusterInfo, CreateInstanceRequest, EndpointInfo, ExportTaskInfo, ExportTaskRequest,
    InstanceInfo, RdsOperations, RestoreClusterRequest, SnapshotInfo,
};
use crate::cleanup::{CleanupGuard, TempResourceSet};
use crate::config::{Config, ConfigError};
use crate::error::RunError;
use crate::executor::{
    render_table, ConnectTarget, ExecutorFactory, MaskExecutor, QueryTable, StatementOutcome,
};
use crate::session::{LineSource, MaskSession, SessionEnd, SessionOutput};
use crate::wait::{wait_until, Probe, WaitSpec};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use mascaras_common::defaults::{
    BACKOFF_CEILING_FACTOR, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WAIT_BUDGET_SECS,
    DEFAULT_WAIT_HARD_LIMIT_SECS, DEFAULT_WAIT_JITTER,
};
use mascaras_common::{EngineDialect, ResourceKind, TempIdentifiers};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a single run should do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRun {
    pub source_cluster: String,
    /// Mask script text, passed to the executor byte for byte (may be empty)
    pub mask_sql: String,
    pub interactive: bool,
    pub export_enabled: bool,
}

impl WorkflowRun {
    pub fn from_config(config: &Config, mask_sql: impl Into<String>) -> Self {
        Self {
            source_cluster: config.source_db_cluster_identifier.clone(),
            mask_sql: mask_sql.into(),
            interactive: config.interactive,
            export_enabled: config.enable_export_task,
        }
    }

    /// Whether the clone has to be connected to at all
    pub fn needs_mask(&self) -> bool {
        !self.mask_sql.is_empty() || self.interactive
    }
}

/// Timing of every wait point
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub wait_budget: Duration,
    pub hard_limit: Option<Duration>,
    pub jitter: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            wait_budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            hard_limit: Some(Duration::from_secs(DEFAULT_WAIT_HARD_LIMIT_SECS)),
            jitter: DEFAULT_WAIT_JITTER,
        }
    }
}

impl OrchestratorSettings {
    fn wait_spec(&self) -> WaitSpec {
        WaitSpec {
            interval: self.poll_interval,
            budget: self.wait_budget,
            hard_limit: self.hard_limit,
            jitter: self.jitter,
            ceiling_factor: BACKOFF_CEILING_FACTOR,
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub source_cluster: String,
    pub temp_cluster: String,
    pub temp_instance: String,
    pub engine: Option<String>,
    pub masked_at: Option<DateTime<Utc>>,
    pub snapshot_identifier: Option<String>,
    pub snapshot_arn: Option<String>,
    pub export_task_identifier: Option<String>,
    /// Resources tracked at the end of the run; the cluster and instance
    /// are only present when deleting them failed
    pub resources: TempResourceSet,
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.is_empty())
}

/// Await a provider call unless the run is cancelled first
async fn provider_call<T>(
    cancel: &CancellationToken,
    operation: &'static str,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        result = call => result.map_err(|e| RunError::provider(operation, e)),
    }
}

/// Drives one run against a resource provider and an executor factory
pub struct Orchestrator<P, F, R = LogReporter> {
    rds: P,
    executors: F,
    reporter: R,
    config: Config,
    settings: OrchestratorSettings,
    session_output: SessionOutput,
}

impl<P, F, R> Orchestrator<P, F, R>
where
    P: RdsOperations,
    F: ExecutorFactory,
    R: RunReporter,
{
    pub fn new(rds: P, executors: F, reporter: R, config: Config) -> Self {
        Self {
            rds,
            executors,
            reporter,
            config,
            settings: OrchestratorSettings::default(),
            session_output: SessionOutput::stderr(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_session_output(mut self, output: SessionOutput) -> Self {
        self.session_output = output;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate(&self, run: &WorkflowRun) -> Result<(), ConfigError> {
        if run.source_cluster.is_empty() {
            return Err(ConfigError::MissingSourceCluster);
        }
        self.config.validate()?;
        if run.export_enabled {
            self.config.export_task.validate()?;
        }
        Ok(())
    }

    /// Execute the run.
    ///
    /// Nothing is created when validation fails. Otherwise the temp cluster
    /// and instance are deleted before this returns, whatever the outcome;
    /// a failed scope-exit cleanup is reported but never replaces the
    /// run's own result.
    pub async fn run<L: LineSource>(
        &self,
        run: &WorkflowRun,
        lines: &mut L,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.reporter.report_phase(RunPhase::Validating);
        if let Err(e) = self.validate(run) {
            let result = Err(RunError::Config(e));
            self.reporter.report_finished(&result);
            return result;
        }

        let ids = TempIdentifiers::resolve(
            self.config.temp_cluster.explicit_identifier(),
            &self.config.temp_cluster.db_cluster_identifier_prefix,
        );
        let mut report = RunReport {
            source_cluster: run.source_cluster.clone(),
            temp_cluster: ids.cluster.clone(),
            temp_instance: ids.instance.clone(),
            ..Default::default()
        };

        let mut guard = CleanupGuard::new(&self.rds);
        let outcome = self
            .drive(run, &ids, &mut guard, &mut report, lines, cancel)
            .await;

        if !guard.resources().is_clean() {
            self.reporter.report_phase(RunPhase::CleaningUp);
        }
        if let Err(e) = guard.cleanup().await {
            self.reporter.report_cleanup_failure(&e);
        }
        report.resources = guard.resources().clone();

        let result = outcome.map(|()| report);
        self.reporter.report_finished(&result);
        result
    }

    async fn drive<L: LineSource>(
        &self,
        run: &WorkflowRun,
        ids: &TempIdentifiers,
        guard: &mut CleanupGuard<'_, P>,
        report: &mut RunReport,
        lines: &mut L,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        self.reporter.report_phase(RunPhase::Cloning);
        let request = RestoreClusterRequest {
            source_cluster: run.source_cluster.clone(),
            target_cluster: ids.cluster.clone(),
            security_group_ids: self.config.temp_cluster.security_group_ids(),
        };
        let restored = provider_call(
            cancel,
            "RestoreDBClusterToPointInTime",
            self.rds.restore_cluster(&request),
        )
        .await?;
        guard.register_cluster(&ids.cluster);
        self.reporter
            .report_resource(ResourceKind::DbCluster, &ids.cluster, non_empty(&restored.arn));

        self.reporter.report_phase(RunPhase::WaitingForCluster);
        let cluster = self.wait_for_cluster(&ids.cluster, cancel).await?;
        let engine = non_empty(&cluster.engine)
            .unwrap_or(restored.engine.as_str())
            .to_string();
        report.engine = non_empty(&engine).map(str::to_string);

        self.reporter.report_phase(RunPhase::CreatingInstance);
        let request = CreateInstanceRequest {
            cluster: ids.cluster.clone(),
            instance: ids.instance.clone(),
            instance_class: self.config.temp_cluster.db_instance_class.clone(),
            engine: engine.clone(),
            publicly_accessible: self.config.temp_cluster.publicly_accessible,
        };
        let instance =
            provider_call(cancel, "CreateDBInstance", self.rds.create_instance(&request)).await?;
        guard.register_instance(&ids.instance);
        self.reporter
            .report_resource(ResourceKind::DbInstance, &ids.instance, non_empty(&instance.arn));

        self.reporter.report_phase(RunPhase::WaitingForInstance);
        self.wait_for_instance(&ids.instance, cancel).await?;

        self.reporter.report_phase(RunPhase::WaitingForEndpoint);
        let endpoint = self.wait_for_writer_endpoint(&ids.cluster, cancel).await?;
        info!(endpoint = %endpoint.endpoint, "Writer endpoint available");

        if run.needs_mask() {
            let dialect = match EngineDialect::from_engine(&engine) {
                Some(dialect) => dialect,
                None => {
                    let dialect = EngineDialect::default();
                    self.reporter.report_warning(&format!(
                        "unknown engine `{engine}`, assuming {dialect}"
                    ));
                    dialect
                }
            };
            let target = ConnectTarget {
                dialect,
                host: endpoint.endpoint.clone(),
                port: cluster.port.unwrap_or_else(|| dialect.default_port()),
                user: self.config.db_user_name.clone(),
                password: self.config.db_user_password.clone(),
                database: self.config.database.clone(),
                ssl_mode: self.config.ssl_mode.clone(),
            };
            let masked_at = self.mask(run, ids, &target, lines, cancel).await?;
            report.masked_at = Some(masked_at);

            self.reporter.report_phase(RunPhase::WaitingForRestorableTime);
            self.wait_for_restorable_time(&ids.cluster, masked_at, cancel)
                .await?;
        } else {
            info!("No mask script and not interactive, snapshotting the clone as is");
        }

        self.reporter.report_phase(RunPhase::Snapshotting);
        let snapshot = provider_call(
            cancel,
            "CreateDBClusterSnapshot",
            self.rds.create_cluster_snapshot(&ids.cluster, &ids.snapshot),
        )
        .await?;
        guard.record_snapshot(&ids.snapshot);
        report.snapshot_identifier = Some(ids.snapshot.clone());
        report.snapshot_arn = non_empty(&snapshot.arn).map(str::to_string);
        self.reporter
            .report_resource(ResourceKind::ClusterSnapshot, &ids.snapshot, non_empty(&snapshot.arn));

        if !run.export_enabled {
            return Ok(());
        }

        // The clone is no longer needed once the snapshot exists; release it
        // before the potentially long snapshot wait.
        self.reporter.report_phase(RunPhase::CleaningUp);
        guard
            .cleanup()
            .await
            .map_err(|e| RunError::provider("cleanup", e))?;

        self.reporter.report_phase(RunPhase::WaitingForSnapshot);
        let available = self.wait_for_snapshot(&ids.snapshot, cancel).await?;
        let source_arn = non_empty(&available.arn)
            .unwrap_or(snapshot.arn.as_str())
            .to_string();
        report.snapshot_arn = non_empty(&source_arn).map(str::to_string);

        self.reporter.report_phase(RunPhase::Exporting);
        let export = &self.config.export_task;
        let request = ExportTaskRequest {
            task_id: ids.export_task(non_empty(&export.task_identifier)),
            source_arn,
            iam_role_arn: export.iam_role_arn.clone(),
            kms_key_id: export.kms_key_id.clone(),
            s3_bucket: export.s3_bucket.clone(),
            s3_prefix: export.s3_prefix(),
            export_only: export.export_only(),
        };
        let info = self.start_export(&request, cancel).await?;
        guard.record_export_task(&info.task_id);
        report.export_task_identifier = Some(info.task_id.clone());
        self.reporter
            .report_resource(ResourceKind::ExportTask, &info.task_id, None);
        Ok(())
    }

    /// Connect, run the script and the prompt, and return the mask time
    async fn mask<L: LineSource>(
        &self,
        run: &WorkflowRun,
        ids: &TempIdentifiers,
        target: &ConnectTarget,
        lines: &mut L,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Utc>, RunError> {
        self.reporter.report_phase(RunPhase::Masking);
        let mut executor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            connected = self.executors.connect(target) => connected.map_err(RunError::Execution)?,
        };
        executor.on_table_select(Box::new(|table: &QueryTable| {
            info!(query = %table.query, "\n{}", render_table(table));
        }));
        executor.on_statement_result(Box::new(|outcome: &StatementOutcome| {
            info!(query = %outcome.query, "{outcome}");
        }));

        let outcome = self.run_mask(run, ids, &mut executor, lines, cancel).await;
        if let Err(e) = executor.close().await {
            warn!(error = %format!("{e:#}"), "Failed to close connection to temp cluster");
        }
        outcome?;

        Ok(executor.last_execute_time().unwrap_or_else(Utc::now))
    }

    async fn run_mask<E: MaskExecutor, L: LineSource>(
        &self,
        run: &WorkflowRun,
        ids: &TempIdentifiers,
        executor: &mut E,
        lines: &mut L,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        if !run.mask_sql.is_empty() {
            info!(bytes = run.mask_sql.len(), "Executing mask script");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                result = executor.execute(&run.mask_sql) => result.map_err(RunError::Execution)?,
            }
        }

        if run.interactive {
            self.reporter.report_phase(RunPhase::Interactive);
            let mut session = MaskSession::new(executor, &ids.cluster, self.session_output.clone());
            let end = session
                .run(lines, cancel)
                .await
                .map_err(RunError::Execution)?;
            debug!(end = ?end, "Prompt closed");
            match end {
                SessionEnd::Exit | SessionEnd::EndOfInput => {}
                SessionEnd::Abort => return Err(RunError::SessionAborted),
                SessionEnd::Cancelled => return Err(RunError::Cancelled),
            }
        }
        Ok(())
    }

    async fn wait_for_cluster(
        &self,
        cluster_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, RunError> {
        let rds = &self.rds;
        let resource = format!("db cluster {cluster_id}");
        wait_until(&self.settings.wait_spec(), cancel, &resource, move || async move {
            match rds.describe_cluster(cluster_id).await {
                Ok(Some(cluster)) if cluster.is_available() => Probe::Met(cluster),
                Ok(Some(cluster)) => {
                    info!(cluster = %cluster_id, status = %cluster.status, "Temp cluster not available yet");
                    Probe::NotYet
                }
                Ok(None) => Probe::Failed(anyhow!("db cluster {cluster_id} not found")),
                Err(e) => Probe::Failed(e),
            }
        })
        .await
        .map(|ready| ready.value)
        .map_err(|e| RunError::from_wait("DescribeDBClusters", e))
    }

    async fn wait_for_instance(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<InstanceInfo, RunError> {
        let rds = &self.rds;
        let resource = format!("db instance {instance_id}");
        wait_until(&self.settings.wait_spec(), cancel, &resource, move || async move {
            match rds.describe_instance(instance_id).await {
                Ok(Some(instance)) if instance.is_available() => Probe::Met(instance),
                Ok(Some(instance)) => {
                    info!(instance = %instance_id, status = %instance.status, "Temp instance not available yet");
                    Probe::NotYet
                }
                Ok(None) => Probe::Failed(anyhow!("db instance {instance_id} not found")),
                Err(e) => Probe::Failed(e),
            }
        })
        .await
        .map(|ready| ready.value)
        .map_err(|e| RunError::from_wait("DescribeDBInstances", e))
    }

    async fn wait_for_writer_endpoint(
        &self,
        cluster_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EndpointInfo, RunError> {
        let rds = &self.rds;
        let resource = format!("writer endpoint of {cluster_id}");
        wait_until(&self.settings.wait_spec(), cancel, &resource, move || async move {
            let endpoints = match rds.describe_writer_endpoints(cluster_id).await {
                Ok(endpoints) => endpoints,
                Err(e) => return Probe::Failed(e),
            };
            if endpoints.is_empty() {
                return Probe::Failed(anyhow!("writer endpoint of {cluster_id} not found"));
            }
            match endpoints.into_iter().find(|e| e.is_writer() && e.is_available()) {
                Some(endpoint) => Probe::Met(endpoint),
                None => {
                    info!(cluster = %cluster_id, "Writer endpoint not available yet");
                    Probe::NotYet
                }
            }
        })
        .await
        .map(|ready| ready.value)
        .map_err(|e| RunError::from_wait("DescribeDBClusterEndpoints", e))
    }

    async fn wait_for_restorable_time(
        &self,
        cluster_id: &str,
        masked_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let rds = &self.rds;
        let resource = format!("restorable time of {cluster_id}");
        wait_until(&self.settings.wait_spec(), cancel, &resource, move || async move {
            match rds.describe_cluster(cluster_id).await {
                Ok(Some(cluster)) => match cluster.latest_restorable_time {
                    Some(latest) if latest > masked_at => Probe::Met(()),
                    latest => {
                        info!(
                            cluster = %cluster_id,
                            latest_restorable_time = ?latest,
                            masked_at = %masked_at,
                            "Latest restorable time has not passed the mask yet"
                        );
                        Probe::NotYet
                    }
                },
                Ok(None) => Probe::Failed(anyhow!("db cluster {cluster_id} not found")),
                Err(e) => Probe::Failed(e),
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| RunError::from_wait("DescribeDBClusters", e))
    }

    async fn wait_for_snapshot(
        &self,
        snapshot_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SnapshotInfo, RunError> {
        let rds = &self.rds;
        let resource = format!("db cluster snapshot {snapshot_id}");
        wait_until(&self.settings.wait_spec(), cancel, &resource, move || async move {
            match rds.describe_cluster_snapshot(snapshot_id).await {
                Ok(Some(snapshot)) if snapshot.is_available() => Probe::Met(snapshot),
                Ok(Some(snapshot)) => {
                    info!(
                        snapshot = %snapshot_id,
                        status = %snapshot.status,
                        progress = snapshot.percent_progress,
                        "Snapshot {}% complete",
                        snapshot.percent_progress
                    );
                    Probe::NotYet
                }
                Ok(None) => {
                    Probe::Failed(anyhow!("db cluster snapshot {snapshot_id} not found"))
                },
                Err(e) => Probe::Failed(e),
            }
        })
        .await
        .map(|ready| ready.value)
        .map_err(|e| RunError::from_wait("DescribeDBClusterSnapshots", e))
    }

    async fn start_export(
        &self,
        request: &ExportTaskRequest,
        cancel: &CancellationToken,
    ) -> Result<ExportTaskInfo, RunError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            result = self.rds.start_export_task(request) => result,
        };

        match result {
            Ok(info) => {
                self.report_export_diagnostics(
                    &request.task_id,
                    info.failure_cause.as_deref(),
                    info.warning_message.as_deref(),
                );
                Ok(info)
            }
            Err(failure) => {
                self.report_export_diagnostics(
                    &request.task_id,
                    failure.failure_cause.as_deref(),
                    failure.warning_message.as_deref(),
                );
                Err(RunError::ExportTask {
                    task_id: request.task_id.clone(),
                    failure_cause: failure.failure_cause,
                    source: failure.source,
                })
            }
        }
    }

    fn report_export_diagnostics(
        &self,
        task_id: &str,
        failure_cause: Option<&str>,
        warning_message: Option<&str>,
    ) {
        if let Some(cause) = failure_cause.and_then(non_empty) {
            self.reporter
                .report_warning(&format!("export task {task_id} failure cause: {cause}"));
        }
        if let Some(message) = warning_message.and_then(non_empty) {
            self.reporter
                .report_warning(&format!("export task {task_id} warning: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_needed_for_script_or_prompt() {
        let mut run = WorkflowRun {
            source_cluster: "prod".into(),
            ..Default::default()
        };
        assert!(!run.needs_mask());
        run.interactive = true;
        assert!(run.needs_mask());
        run.interactive = false;
        run.mask_sql = "UPDATE users SET email='x';\n".into();
        assert!(run.needs_mask());
    }

    #[test]
    fn workflow_from_config() {
        let config = Config {
            source_db_cluster_identifier: "prod".into(),
            interactive: true,
            enable_export_task: true,
            ..Config::with_defaults()
        };
        let run = WorkflowRun::from_config(&config, "SELECT 1;");
        assert_eq!(run.source_cluster, "prod");
        assert_eq!(run.mask_sql, "SELECT 1;");
        assert!(run.interactive);
        assert!(run.export_enabled);
    }

    #[test]
    fn settings_feed_the_wait_spec() {
        let settings = OrchestratorSettings {
            poll_interval: Duration::from_secs(10),
            wait_budget: Duration::from_secs(35),
            hard_limit: None,
            jitter: 0.0,
        };
        let spec = settings.wait_spec();
        assert_eq!(spec.constant_attempts(), 3);
        assert_eq!(spec.max_delay(), Duration::from_secs(50));
        assert!(spec.hard_limit.is_none());
    }
}
