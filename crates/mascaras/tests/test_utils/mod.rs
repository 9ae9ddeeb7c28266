//! Shared fakes for orchestrator integration tests
//!
//! Every fake records what it was asked to do so tests can assert on call
//! order without talking to AWS or a database.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mascaras::aws::{
    AwsError, ClusterInfo, CreateInstanceRequest, EndpointInfo, ExportTaskFailure, ExportTaskInfo,
    ExportTaskRequest, InstanceInfo, RdsOperations, RestoreClusterRequest, SnapshotInfo,
};
use mascaras::config::Config;
use mascaras::error::RunError;
use mascaras::executor::{
    ConnectTarget, ExecutorFactory, MaskExecutor, QueryTable, StatementOutcome,
    StatementResultHook, TableSelectHook,
};
use mascaras::orchestrator::{
    Orchestrator, OrchestratorSettings, RunPhase, RunReport, RunReporter,
};
use mascaras::session::{LineEvent, LineSource, SessionOutput};
use mascaras_common::ResourceKind;
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SOURCE_CLUSTER: &str = "prod-cluster";
pub const WRITER_ENDPOINT: &str = "demo-test.cluster-abc.ap-northeast-1.rds.amazonaws.com";

/// One provider call, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RestoreCluster(RestoreClusterRequest),
    DescribeCluster(String),
    CreateInstance(CreateInstanceRequest),
    DescribeInstance(String),
    DescribeWriterEndpoints(String),
    CreateSnapshot { cluster: String, snapshot: String },
    DescribeSnapshot(String),
    StartExportTask(ExportTaskRequest),
    DeleteInstance(String),
    DeleteCluster(String),
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::RestoreCluster(_) => "restore_cluster",
            Call::DescribeCluster(_) => "describe_cluster",
            Call::CreateInstance(_) => "create_instance",
            Call::DescribeInstance(_) => "describe_instance",
            Call::DescribeWriterEndpoints(_) => "describe_writer_endpoints",
            Call::CreateSnapshot { .. } => "create_cluster_snapshot",
            Call::DescribeSnapshot(_) => "describe_cluster_snapshot",
            Call::StartExportTask(_) => "start_export_task",
            Call::DeleteInstance(_) => "delete_instance",
            Call::DeleteCluster(_) => "delete_cluster",
        }
    }

    fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::DescribeCluster(_)
                | Call::DescribeInstance(_)
                | Call::DescribeWriterEndpoints(_)
                | Call::DescribeSnapshot(_)
        )
    }
}

struct FakeRdsState {
    calls: Vec<Call>,
    failing: HashSet<&'static str>,
    not_found: HashSet<&'static str>,
    missing: HashSet<&'static str>,
    engine: String,
    port: Option<u16>,
    cluster_pending_polls: u32,
    cluster_never_available: bool,
    snapshot_pending_polls: u32,
    restorable_time_held: Option<(DateTime<Utc>, u32)>,
    endpoints: Vec<EndpointInfo>,
    export_failure_cause: Option<String>,
    export_warning: Option<String>,
    export_fails: bool,
}

/// In-memory RDS that answers every call from configurable state
#[derive(Clone)]
pub struct FakeRds {
    state: Arc<Mutex<FakeRdsState>>,
}

impl Default for FakeRds {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRds {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeRdsState {
                calls: Vec::new(),
                failing: HashSet::new(),
                not_found: HashSet::new(),
                missing: HashSet::new(),
                engine: "aurora-mysql".into(),
                port: Some(3306),
                cluster_pending_polls: 0,
                cluster_never_available: false,
                snapshot_pending_polls: 0,
                restorable_time_held: None,
                endpoints: vec![EndpointInfo {
                    endpoint: WRITER_ENDPOINT.into(),
                    endpoint_type: EndpointInfo::WRITER.into(),
                    status: "available".into(),
                }],
                export_failure_cause: None,
                export_warning: None,
                export_fails: false,
            })),
        }
    }

    /// Make `operation` (a [`Call::name`]) fail with a generic SDK error
    pub fn fail(self, operation: &'static str) -> Self {
        self.state.lock().unwrap().failing.insert(operation);
        self
    }

    /// Make `operation` fail with a "not found" error
    pub fn not_found(self, operation: &'static str) -> Self {
        self.state.lock().unwrap().not_found.insert(operation);
        self
    }

    /// Stop failing `operation`
    /// Make a describe `operation` answer that the resource does not exist
    pub fn missing(self, operation: &'static str) -> Self {
        self.state.lock().unwrap().missing.insert(operation);
        self
    }

    /// Report `at` as the latest restorable time for the first `polls`
    /// cluster describes after the writer endpoint was looked up
    pub fn restorable_time_held_at(self, at: DateTime<Utc>, polls: u32) -> Self {
        self.state.lock().unwrap().restorable_time_held = Some((at, polls));
        self
    }

    /// Calls made strictly between the first `after` and the first `before`
    pub fn count_between(&self, operation: &str, after: &str, before: &str) -> usize {
        let calls = self.calls();
        let (Some(start), Some(end)) = (
            calls.iter().position(|c| c.name() == after),
            calls.iter().position(|c| c.name() == before),
        ) else {
            return 0;
        };
        calls[start + 1..end]
            .iter()
            .filter(|c| c.name() == operation)
            .count()
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    pub fn with_engine(self, engine: &str, port: Option<u16>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.engine = engine.into();
            state.port = port;
        }
        self
    }

    pub fn cluster_pending_for(self, polls: u32) -> Self {
        self.state.lock().unwrap().cluster_pending_polls = polls;
        self
    }

    pub fn cluster_never_available(self) -> Self {
        self.state.lock().unwrap().cluster_never_available = true;
        self
    }

    pub fn snapshot_pending_for(self, polls: u32) -> Self {
        self.state.lock().unwrap().snapshot_pending_polls = polls;
        self
    }

    pub fn with_endpoints(self, endpoints: Vec<EndpointInfo>) -> Self {
        self.state.lock().unwrap().endpoints = endpoints;
        self
    }

    /// StartExportTask returns an error carrying this failure cause
    pub fn export_fails_with(self, cause: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.export_fails = true;
            state.export_failure_cause = Some(cause.into());
        }
        self
    }

    /// StartExportTask succeeds but carries a warning message
    pub fn export_warns(self, message: &str) -> Self {
        self.state.lock().unwrap().export_warning = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of the calls that create or delete something, in order
    pub fn mutations(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .filter(|c| c.is_mutation())
            .map(Call::name)
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.name() == operation).count()
    }

    pub fn position(&self, operation: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.name() == operation)
    }

    pub fn export_requests(&self) -> Vec<ExportTaskRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::StartExportTask(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = call.name();
        state.calls.push(call);
        if state.not_found.contains(name) {
            return Err(anyhow::Error::new(AwsError::NotFound {
                code: "NotFound".into(),
                message: format!("{name}: resource not found"),
            }));
        }
        if state.failing.contains(name) {
            return Err(anyhow!("injected {name} failure"));
        }
        Ok(())
    }

    fn is_missing(&self, operation: &str) -> bool {
        self.state.lock().unwrap().missing.contains(operation)
    }

    fn restorable_time(&self) -> DateTime<Utc> {
        let mut state = self.state.lock().unwrap();
        let endpoint_seen = state
            .calls
            .iter()
            .any(|c| matches!(c, Call::DescribeWriterEndpoints(_)));
        match state.restorable_time_held.as_mut() {
            Some((at, polls)) if endpoint_seen && *polls > 0 => {
                *polls -= 1;
                *at
            }
            _ => Utc::now() + chrono::Duration::seconds(1),
        }
    }

    fn cluster(&self, id: &str, status: &str) -> ClusterInfo {
        let latest_restorable_time = self.restorable_time();
        let state = self.state.lock().unwrap();
        ClusterInfo {
            identifier: id.into(),
            arn: format!("arn:aws:rds:ap-northeast-1:123456789012:cluster:{id}"),
            engine: state.engine.clone(),
            status: status.into(),
            port: state.port,
            latest_restorable_time: Some(latest_restorable_time),
        }
    }
}

pub fn snapshot_arn(snapshot: &str) -> String {
    format!("arn:aws:rds:ap-northeast-1:123456789012:cluster-snapshot:{snapshot}")
}

impl RdsOperations for FakeRds {
    async fn restore_cluster(&self, request: &RestoreClusterRequest) -> Result<ClusterInfo> {
        self.record(Call::RestoreCluster(request.clone()))?;
        Ok(self.cluster(&request.target_cluster, "creating"))
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>> {
        self.record(Call::DescribeCluster(cluster_id.into()))?;
        if self.is_missing("describe_cluster") {
            return Ok(None);
        }
        let available = {
            let mut state = self.state.lock().unwrap();
            if state.cluster_never_available {
                false
            } else if state.cluster_pending_polls > 0 {
                state.cluster_pending_polls -= 1;
                false
            } else {
                true
            }
        };
        let status = if available { "available" } else { "creating" };
        Ok(Some(self.cluster(cluster_id, status)))
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<InstanceInfo> {
        self.record(Call::CreateInstance(request.clone()))?;
        Ok(InstanceInfo {
            identifier: request.instance.clone(),
            arn: format!("arn:aws:rds:ap-northeast-1:123456789012:db:{}", request.instance),
            status: "creating".into(),
        })
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>> {
        self.record(Call::DescribeInstance(instance_id.into()))?;
        if self.is_missing("describe_instance") {
            return Ok(None);
        }
        Ok(Some(InstanceInfo {
            identifier: instance_id.into(),
            arn: String::new(),
            status: "available".into(),
        }))
    }

    async fn describe_writer_endpoints(&self, cluster_id: &str) -> Result<Vec<EndpointInfo>> {
        self.record(Call::DescribeWriterEndpoints(cluster_id.into()))?;
        Ok(self.state.lock().unwrap().endpoints.clone())
    }

    async fn create_cluster_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
    ) -> Result<SnapshotInfo> {
        self.record(Call::CreateSnapshot {
            cluster: cluster_id.into(),
            snapshot: snapshot_id.into(),
        })?;
        Ok(SnapshotInfo {
            identifier: snapshot_id.into(),
            arn: snapshot_arn(snapshot_id),
            status: "creating".into(),
            percent_progress: 0,
        })
    }

    async fn describe_cluster_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>> {
        self.record(Call::DescribeSnapshot(snapshot_id.into()))?;
        if self.is_missing("describe_cluster_snapshot") {
            return Ok(None);
        }
        let mut state = self.state.lock().unwrap();
        let (status, progress) = if state.snapshot_pending_polls > 0 {
            state.snapshot_pending_polls -= 1;
            ("creating", 50)
        } else {
            ("available", 100)
        };
        Ok(Some(SnapshotInfo {
            identifier: snapshot_id.into(),
            arn: snapshot_arn(snapshot_id),
            status: status.into(),
            percent_progress: progress,
        }))
    }

    async fn start_export_task(
        &self,
        request: &ExportTaskRequest,
    ) -> std::result::Result<ExportTaskInfo, ExportTaskFailure> {
        self.record(Call::StartExportTask(request.clone()))
            .map_err(ExportTaskFailure::new)?;
        let state = self.state.lock().unwrap();
        if state.export_fails {
            return Err(ExportTaskFailure {
                failure_cause: state.export_failure_cause.clone(),
                warning_message: state.export_warning.clone(),
                source: anyhow!("InvalidExportSourceState"),
            });
        }
        Ok(ExportTaskInfo {
            task_id: request.task_id.clone(),
            status: Some("STARTING".into()),
            failure_cause: None,
            warning_message: state.export_warning.clone(),
        })
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.record(Call::DeleteInstance(instance_id.into()))
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        self.record(Call::DeleteCluster(cluster_id.into()))
    }
}

#[derive(Default)]
struct ExecutorLog {
    connects: Vec<ConnectTarget>,
    executed: Vec<String>,
    closed: usize,
}

/// Executor factory whose executors only record what they were given
#[derive(Clone, Default)]
pub struct RecordingExecutors {
    log: Arc<Mutex<ExecutorLog>>,
    fail_execute: bool,
    fail_connect: bool,
    executed_at: Option<DateTime<Utc>>,
}

impl RecordingExecutors {
    pub fn failing_execute() -> Self {
        Self {
            fail_execute: true,
            ..Default::default()
        }
    }

    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// Stamp every statement with `at` instead of the wall clock
    pub fn executing_at(at: DateTime<Utc>) -> Self {
        Self {
            executed_at: Some(at),
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().executed.clone()
    }

    pub fn connects(&self) -> Vec<ConnectTarget> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

pub struct RecordingExecutor {
    log: Arc<Mutex<ExecutorLog>>,
    fail: bool,
    executed_at: Option<DateTime<Utc>>,
    last_execute_time: Option<DateTime<Utc>>,
    table_hook: Option<TableSelectHook>,
    result_hook: Option<StatementResultHook>,
}

impl ExecutorFactory for RecordingExecutors {
    type Executor = RecordingExecutor;

    async fn connect(&self, target: &ConnectTarget) -> Result<RecordingExecutor> {
        if self.fail_connect {
            return Err(anyhow!("connection refused"));
        }
        self.log.lock().unwrap().connects.push(target.clone());
        Ok(RecordingExecutor {
            log: self.log.clone(),
            fail: self.fail_execute,
            executed_at: self.executed_at,
            last_execute_time: None,
            table_hook: None,
            result_hook: None,
        })
    }
}

impl MaskExecutor for RecordingExecutor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.log.lock().unwrap().executed.push(sql.to_string());
        if self.fail {
            return Err(anyhow!("Table 'app.users' doesn't exist"));
        }
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            if let Some(hook) = &self.table_hook {
                hook(&QueryTable {
                    query: sql.into(),
                    columns: vec!["1".into()],
                    rows: vec![vec![Some("1".into())]],
                });
            }
        } else if let Some(hook) = &self.result_hook {
            hook(&StatementOutcome {
                query: sql.into(),
                rows_affected: 1,
                last_insert_id: None,
            });
        }
        self.last_execute_time = Some(self.executed_at.unwrap_or_else(Utc::now));
        Ok(())
    }

    fn last_execute_time(&self) -> Option<DateTime<Utc>> {
        self.last_execute_time
    }

    fn on_table_select(&mut self, hook: TableSelectHook) {
        self.table_hook = Some(hook);
    }

    fn on_statement_result(&mut self, hook: StatementResultHook) {
        self.result_hook = Some(hook);
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// What a [`RecordingReporter`] saw
#[derive(Debug, Default)]
pub struct Reported {
    pub phases: Vec<RunPhase>,
    pub resources: Vec<(ResourceKind, String)>,
    pub warnings: Vec<String>,
    pub cleanup_failures: Vec<String>,
    pub finished: Option<bool>,
}

#[derive(Clone, Default)]
pub struct RecordingReporter {
    seen: Arc<Mutex<Reported>>,
}

impl RecordingReporter {
    pub fn warnings(&self) -> Vec<String> {
        self.seen.lock().unwrap().warnings.clone()
    }

    pub fn phases(&self) -> Vec<RunPhase> {
        self.seen.lock().unwrap().phases.clone()
    }

    pub fn resources(&self) -> Vec<(ResourceKind, String)> {
        self.seen.lock().unwrap().resources.clone()
    }

    pub fn cleanup_failures(&self) -> Vec<String> {
        self.seen.lock().unwrap().cleanup_failures.clone()
    }

    pub fn finished(&self) -> Option<bool> {
        self.seen.lock().unwrap().finished
    }
}

impl RunReporter for RecordingReporter {
    fn report_phase(&self, phase: RunPhase) {
        self.seen.lock().unwrap().phases.push(phase);
    }

    fn report_resource(&self, kind: ResourceKind, id: &str, _arn: Option<&str>) {
        self.seen.lock().unwrap().resources.push((kind, id.to_string()));
    }

    fn report_warning(&self, message: &str) {
        self.seen.lock().unwrap().warnings.push(message.to_string());
    }

    fn report_cleanup_failure(&self, error: &anyhow::Error) {
        self.seen
            .lock()
            .unwrap()
            .cleanup_failures
            .push(format!("{error:#}"));
    }

    fn report_finished(&self, result: &std::result::Result<RunReport, RunError>) {
        self.seen.lock().unwrap().finished = Some(result.is_ok());
    }
}

/// Line source replaying a fixed script, then end of input
pub struct ScriptedLines {
    events: VecDeque<LineEvent>,
}

impl ScriptedLines {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            events: lines.iter().map(|l| LineEvent::Line(l.to_string())).collect(),
        }
    }

    pub fn none() -> Self {
        Self::new(&[])
    }
}

impl LineSource for ScriptedLines {
    async fn read_line(&mut self, _prompt: &str) -> Result<LineEvent> {
        Ok(self.events.pop_front().unwrap_or(LineEvent::Eof))
    }
}

/// Writer collecting prompt output in memory
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Config for a run against [`SOURCE_CLUSTER`] with a fixed temp cluster id
pub fn demo_config() -> Config {
    let mut config = Config::with_defaults();
    config.source_db_cluster_identifier = SOURCE_CLUSTER.into();
    config.temp_cluster.db_cluster_identifier = "demo-test".into();
    config.db_user_password = "password".into();
    config.database = "app".into();
    config
}

pub fn export_config() -> Config {
    let mut config = demo_config();
    config.enable_export_task = true;
    config.export_task.iam_role_arn = "arn:aws:iam::123456789012:role/export".into();
    config.export_task.kms_key_id = "arn:aws:kms:ap-northeast-1:123456789012:key/abc".into();
    config.export_task.s3_bucket = "masked-exports".into();
    config.export_task.s3_prefix = "daily".into();
    config.export_task.export_only = "app.users, app.orders".into();
    config
}

/// Millisecond-scale waits so scenarios finish quickly
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        poll_interval: Duration::from_millis(5),
        wait_budget: Duration::from_millis(20),
        hard_limit: Some(Duration::from_secs(5)),
        jitter: 0.0,
    }
}

pub type TestOrchestrator = Orchestrator<FakeRds, RecordingExecutors, RecordingReporter>;

/// Orchestrator over clones of the given fakes, with fast waits and
/// prompt output captured in `output`
pub fn orchestrator(
    rds: &FakeRds,
    executors: &RecordingExecutors,
    reporter: &RecordingReporter,
    config: Config,
    output: &CapturedOutput,
) -> TestOrchestrator {
    Orchestrator::new(rds.clone(), executors.clone(), reporter.clone(), config)
        .with_settings(fast_settings())
        .with_session_output(SessionOutput::new(output.clone()))
}
