//! mascaras: clone an Aurora cluster, mask it, snapshot it, export it
//!
//! Every flag can also be set through a `MASCARAS_`-prefixed environment
//! variable (`--db-user-password` is `MASCARAS_DB_USER_PASSWORD`).

use anyhow::{Context, Result};
use clap::Parser;
use mascaras::aws::{AwsContext, RdsClient};
use mascaras::config::{Config, ConfigError, ExportTaskConfig, TempClusterConfig};
use mascaras::error::RunError;
use mascaras::executor::SqlExecutorFactory;
use mascaras::location::{DefaultLocationReader, LocationReader};
use mascaras::orchestrator::{
    LogReporter, Orchestrator, OrchestratorSettings, RunReport, WorkflowRun,
};
use mascaras::session::ConsoleInput;
use mascaras_common::defaults::{
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WAIT_BUDGET_SECS, DEFAULT_WAIT_HARD_LIMIT_SECS,
    DEFAULT_WAIT_JITTER,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code for a run stopped by a signal
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "mascaras")]
#[command(about = "Create a masked snapshot of an Aurora DB cluster")]
#[command(version)]
struct Args {
    /// Source Aurora DB cluster identifier (overrides --src-db-cluster)
    #[arg(value_name = "SOURCE_DB_CLUSTER")]
    source_db_cluster: Option<String>,

    /// Config file path (local path, file:// or s3://)
    #[arg(long, env = "MASCARAS_CONFIG")]
    config: Option<String>,

    /// Mask SQL file (local path, file:// or s3://)
    #[arg(long, env = "MASCARAS_SQL_FILE", default_value = "")]
    sql_file: String,

    /// Source Aurora DB cluster identifier
    #[arg(long, env = "MASCARAS_SRC_DB_CLUSTER", default_value = "")]
    src_db_cluster: String,

    /// Cloned Aurora DB cluster identifier
    #[arg(long, env = "MASCARAS_DB_CLUSTER_IDENTIFIER", default_value = "")]
    db_cluster_identifier: String,

    /// Cloned Aurora DB cluster identifier prefix, used when no identifier is set
    #[arg(long, env = "MASCARAS_DB_CLUSTER_IDENTIFIER_PREFIX", default_value = "")]
    db_cluster_identifier_prefix: String,

    /// Cloned Aurora DB instance class
    #[arg(long, env = "MASCARAS_DB_INSTANCE_CLASS", default_value = "")]
    db_instance_class: String,

    /// Make the cloned instance publicly accessible
    #[arg(long, env = "MASCARAS_PUBLICLY_ACCESSIBLE")]
    publicly_accessible: bool,

    /// Comma-separated VPC security group IDs for the cloned cluster
    #[arg(long, env = "MASCARAS_SECURITY_GROUP_IDS", default_value = "")]
    security_group_ids: String,

    /// Cloned Aurora DB user name
    #[arg(long, env = "MASCARAS_DB_USER_NAME", default_value = "")]
    db_user_name: String,

    /// Cloned Aurora DB user password
    #[arg(long, env = "MASCARAS_DB_USER_PASSWORD", default_value = "", hide_env_values = true)]
    db_user_password: String,

    /// Database to run the mask SQL in
    #[arg(long, env = "MASCARAS_DATABASE", default_value = "")]
    database: String,

    /// SSL mode, PostgreSQL-compatible clusters only
    #[arg(long, env = "MASCARAS_SSL_MODE", default_value = "")]
    ssl_mode: String,

    /// Open an interactive prompt after the mask SQL
    #[arg(long, env = "MASCARAS_INTERACTIVE")]
    interactive: bool,

    /// Export the created snapshot to S3
    #[arg(long, env = "MASCARAS_ENABLE_EXPORT_TASK")]
    enable_export_task: bool,

    /// Export task identifier (default: <snapshot>-export-task)
    #[arg(long, env = "MASCARAS_EXPORT_TASK_IDENTIFIER", default_value = "")]
    export_task_identifier: String,

    /// IAM role the export task runs as; required with --enable-export-task
    #[arg(long, env = "MASCARAS_EXPORT_TASK_IAM_ROLE_ARN", default_value = "")]
    export_task_iam_role_arn: String,

    /// KMS key for the exported data; required with --enable-export-task
    #[arg(long, env = "MASCARAS_EXPORT_TASK_KMS_KEY_ID", default_value = "")]
    export_task_kms_key_id: String,

    /// Destination bucket; required with --enable-export-task
    #[arg(long, env = "MASCARAS_EXPORT_TASK_S3_BUCKET", default_value = "")]
    export_task_s3_bucket: String,

    /// Destination key prefix
    #[arg(long, env = "MASCARAS_EXPORT_TASK_S3_PREFIX", default_value = "")]
    export_task_s3_prefix: String,

    /// Comma-separated databases, schemas or tables to export
    #[arg(long, env = "MASCARAS_EXPORT_TASK_EXPORT_ONLY", default_value = "")]
    export_task_export_only: String,

    /// AWS region (default: from the environment)
    #[arg(long, env = "MASCARAS_REGION")]
    region: Option<String>,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long, env = "MASCARAS_AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Base polling interval for every wait, in seconds
    #[arg(long, env = "MASCARAS_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Give up on a single wait after this many seconds (0 waits until cancelled)
    #[arg(long, env = "MASCARAS_WAIT_HARD_LIMIT_SECS", default_value_t = DEFAULT_WAIT_HARD_LIMIT_SECS)]
    wait_hard_limit_secs: u64,

    /// Write the run report as JSON to this file
    #[arg(short, long, env = "MASCARAS_OUTPUT")]
    output: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "MASCARAS_DEBUG")]
    debug: bool,
}

impl Args {
    /// Flag and environment values as a config layer
    fn overrides(&self) -> Config {
        Config {
            temp_cluster: TempClusterConfig {
                db_cluster_identifier_prefix: self.db_cluster_identifier_prefix.clone(),
                db_cluster_identifier: self.db_cluster_identifier.clone(),
                db_instance_class: self.db_instance_class.clone(),
                security_group_ids: self.security_group_ids.clone(),
                publicly_accessible: self.publicly_accessible,
            },
            db_user_name: self.db_user_name.clone(),
            db_user_password: self.db_user_password.clone(),
            database: self.database.clone(),
            ssl_mode: self.ssl_mode.clone(),
            sql_file: self.sql_file.clone(),
            source_db_cluster_identifier: self
                .source_db_cluster
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| self.src_db_cluster.clone()),
            interactive: self.interactive,
            enable_export_task: self.enable_export_task,
            export_task: ExportTaskConfig {
                task_identifier: self.export_task_identifier.clone(),
                iam_role_arn: self.export_task_iam_role_arn.clone(),
                kms_key_id: self.export_task_kms_key_id.clone(),
                s3_bucket: self.export_task_s3_bucket.clone(),
                s3_prefix: self.export_task_s3_prefix.clone(),
                export_only: self.export_task_export_only.clone(),
            },
        }
    }

    fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            wait_budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            hard_limit: Some(self.wait_hard_limit_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            jitter: DEFAULT_WAIT_JITTER,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) if is_cancelled(&e) => {
            eprintln!("\nRun cancelled by signal");
            EXIT_CANCELLED
        }
        Err(e) => {
            print_error(&e);
            1
        }
    };
    std::process::exit(code);
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.downcast_ref::<RunError>()
        .is_some_and(RunError::is_cancelled)
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    // Reduce noise from the AWS SDK and the SQL driver
    for target in ["aws_config", "aws_sdk_rds", "aws_sdk_s3", "aws_smithy_runtime", "sqlx"] {
        if let Ok(directive) = format!("{target}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `cancel` on SIGINT, SIGTERM or SIGHUP
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                info!("Signal caught, cancelling run");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install signal handler"),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
        _ = hangup.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn load_config(args: &Args, reader: &impl LocationReader) -> Result<Config> {
    let base = match args.config.as_deref() {
        Some(location) => {
            info!(location = %location, "Loading config");
            let text = reader
                .read_to_string(location)
                .await
                .map_err(|source| ConfigError::Read {
                    location: location.to_string(),
                    source,
                })?;
            Config::parse(&text, location)?
        }
        None => Config::with_defaults(),
    };
    Ok(base.merge_in(&args.overrides()))
}

fn write_report(path: &str, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write run report to {path}"))?;
    info!(path = %path, "Run report written");
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    if let Some(profile) = &args.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let aws = AwsContext::load(args.region.as_deref(), args.aws_profile.as_deref()).await;
    let reader = DefaultLocationReader::new(&aws);

    let config = load_config(&args, &reader).await?;

    let mask_sql = if config.sql_file.is_empty() {
        String::new()
    } else {
        info!(location = %config.sql_file, "Reading mask SQL");
        reader.read_to_string(&config.sql_file).await?
    };
    let workflow = WorkflowRun::from_config(&config, mask_sql);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let orchestrator = Orchestrator::new(
        RdsClient::from_context(&aws),
        SqlExecutorFactory,
        LogReporter::new(),
        config,
    )
    .with_settings(args.settings());

    let mut input = ConsoleInput::detect()?;
    let report = orchestrator.run(&workflow, &mut input, &cancel).await?;

    info!(
        temp_cluster = %report.temp_cluster,
        snapshot = ?report.snapshot_identifier,
        snapshot_arn = ?report.snapshot_arn,
        export_task = ?report.export_task_identifier,
        "success."
    );
    if let Some(path) = &args.output {
        write_report(path, &report)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_source_wins_over_flag() {
        let args =
            Args::try_parse_from(["mascaras", "--src-db-cluster", "from-flag", "from-arg"]).unwrap();
        assert_eq!(args.overrides().source_db_cluster_identifier, "from-arg");

        let args = Args::try_parse_from(["mascaras", "--src-db-cluster", "from-flag"]).unwrap();
        assert_eq!(args.overrides().source_db_cluster_identifier, "from-flag");
    }

    #[test]
    fn flags_override_config_file() {
        let args = Args::try_parse_from([
            "mascaras",
            "--db-instance-class",
            "db.r6g.large",
            "--enable-export-task",
            "prod",
        ])
        .unwrap();
        let file = Config::parse_with_env(
            "temp_cluster:\n  db_instance_class: db.t4g.medium\n  db_cluster_identifier_prefix: masked\n",
            "config.yaml",
            |_| None,
        )
        .unwrap();
        let config = file.merge_in(&args.overrides());
        assert_eq!(config.temp_cluster.db_instance_class, "db.r6g.large");
        assert_eq!(config.temp_cluster.db_cluster_identifier_prefix, "masked");
        assert!(config.enable_export_task);
        assert_eq!(config.source_db_cluster_identifier, "prod");
    }

    #[test]
    fn zero_hard_limit_disables_it() {
        let args =
            Args::try_parse_from(["mascaras", "--wait-hard-limit-secs", "0", "--poll-interval-secs", "5"])
                .unwrap();
        let settings = args.settings();
        assert!(settings.hard_limit.is_none());
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
    }
}
