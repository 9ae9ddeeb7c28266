//! Run configuration
//!
//! A run is configured from three layers, later ones winning:
//!
//! 1. Built-in defaults ([`Config::with_defaults`])
//! 2. An optional YAML/JSON config file, with `{{ env "NAME" }}` templating
//! 3. Command line flags and `MASCARAS_*` environment variables
//!
//! Strings override only when non-empty and booleans are OR-merged, so a
//! flag left at its default never clobbers a value from the file.

use mascaras_common::defaults::{
    DEFAULT_DB_CLUSTER_IDENTIFIER_PREFIX, DEFAULT_DB_INSTANCE_CLASS, DEFAULT_DB_USER_NAME,
    DEFAULT_SSL_MODE,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source db cluster is required")]
    MissingSourceCluster,

    #[error("either db-cluster-identifier or db-cluster-identifier-prefix is required")]
    MissingClusterIdentifier,

    #[error("db-instance-class is required")]
    MissingInstanceClass,

    #[error("{flag} is required if ExportTask is enabled")]
    MissingExportSetting { flag: &'static str },

    #[error("environment variable {name} is not set")]
    MissingEnv { name: String },

    #[error("failed to read {location}")]
    Read {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse config {location}")]
    Parse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings for the temporary cluster and instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempClusterConfig {
    pub db_cluster_identifier_prefix: String,
    pub db_cluster_identifier: String,
    pub db_instance_class: String,
    /// Comma-separated VPC security group IDs
    pub security_group_ids: String,
    pub publicly_accessible: bool,
}

/// Settings for exporting the snapshot to S3
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportTaskConfig {
    pub task_identifier: String,
    pub iam_role_arn: String,
    pub kms_key_id: String,
    pub s3_bucket: String,
    pub s3_prefix: String,
    /// Comma-separated list of databases/schemas/tables to export
    pub export_only: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub temp_cluster: TempClusterConfig,
    pub db_user_name: String,
    pub db_user_password: String,
    pub database: String,
    /// Only applies to PostgreSQL-compatible clusters
    pub ssl_mode: String,
    /// Location of the mask script (path, `file://` or `s3://`)
    pub sql_file: String,
    pub source_db_cluster_identifier: String,
    pub interactive: bool,
    pub enable_export_task: bool,
    pub export_task: ExportTaskConfig,
}

fn coalesce(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl TempClusterConfig {
    fn merge_in(&mut self, o: &TempClusterConfig) {
        self.db_cluster_identifier = coalesce(&o.db_cluster_identifier, &self.db_cluster_identifier);
        self.db_cluster_identifier_prefix = coalesce(
            &o.db_cluster_identifier_prefix,
            &self.db_cluster_identifier_prefix,
        );
        self.db_instance_class = coalesce(&o.db_instance_class, &self.db_instance_class);
        self.security_group_ids = coalesce(&o.security_group_ids, &self.security_group_ids);
        self.publicly_accessible = o.publicly_accessible || self.publicly_accessible;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_cluster_identifier.is_empty() && self.db_cluster_identifier_prefix.is_empty() {
            return Err(ConfigError::MissingClusterIdentifier);
        }
        if self.db_instance_class.is_empty() {
            return Err(ConfigError::MissingInstanceClass);
        }
        if !self.db_instance_class.starts_with("db.") {
            warn!(
                class = %self.db_instance_class,
                "db-instance-class does not have the `db.` prefix, creating the instance will likely fail"
            );
        }
        Ok(())
    }

    pub fn security_group_ids(&self) -> Vec<String> {
        split_list(&self.security_group_ids)
    }

    /// Explicit cluster identifier, if one was configured
    pub fn explicit_identifier(&self) -> Option<&str> {
        Some(self.db_cluster_identifier.as_str()).filter(|s| !s.is_empty())
    }
}

impl ExportTaskConfig {
    fn merge_in(&mut self, o: &ExportTaskConfig) {
        self.task_identifier = coalesce(&o.task_identifier, &self.task_identifier);
        self.iam_role_arn = coalesce(&o.iam_role_arn, &self.iam_role_arn);
        self.kms_key_id = coalesce(&o.kms_key_id, &self.kms_key_id);
        self.s3_bucket = coalesce(&o.s3_bucket, &self.s3_bucket);
        self.s3_prefix = coalesce(&o.s3_prefix, &self.s3_prefix);
        self.export_only = coalesce(&o.export_only, &self.export_only);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("export-task-iam-role-arn", &self.iam_role_arn),
            ("export-task-kms-key-id", &self.kms_key_id),
            ("export-task-s3-bucket", &self.s3_bucket),
        ];
        match required.iter().find(|(_, value)| value.is_empty()) {
            Some((flag, _)) => Err(ConfigError::MissingExportSetting { flag: *flag }),
            None => Ok(()),
        }
    }

    pub fn export_only(&self) -> Vec<String> {
        split_list(&self.export_only)
    }

    pub fn s3_prefix(&self) -> Option<String> {
        Some(self.s3_prefix.clone()).filter(|s| !s.is_empty())
    }
}

impl Config {
    /// Built-in defaults, the base every other layer merges into
    pub fn with_defaults() -> Self {
        Self {
            temp_cluster: TempClusterConfig {
                db_cluster_identifier_prefix: DEFAULT_DB_CLUSTER_IDENTIFIER_PREFIX.to_string(),
                db_instance_class: DEFAULT_DB_INSTANCE_CLASS.to_string(),
                ..Default::default()
            },
            db_user_name: DEFAULT_DB_USER_NAME.to_string(),
            ssl_mode: DEFAULT_SSL_MODE.to_string(),
            ..Default::default()
        }
    }

    /// Parse a YAML (or JSON) document on top of the defaults.
    ///
    /// `lookup` resolves environment variables for the template functions.
    pub fn parse_with_env<F>(text: &str, location: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_templates(text, lookup)?;
        let parsed: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Parse {
                location: location.to_string(),
                source,
            })?
        };
        Ok(Self::with_defaults().merge_in(&parsed))
    }

    /// Parse a config document using the process environment for templates
    pub fn parse(text: &str, location: &str) -> Result<Self, ConfigError> {
        Self::parse_with_env(text, location, |name| std::env::var(name).ok())
    }

    /// Overlay `o` on top of `self`
    pub fn merge_in(mut self, o: &Config) -> Self {
        self.temp_cluster.merge_in(&o.temp_cluster);
        self.db_user_name = coalesce(&o.db_user_name, &self.db_user_name);
        self.db_user_password = coalesce(&o.db_user_password, &self.db_user_password);
        self.database = coalesce(&o.database, &self.database);
        self.enable_export_task = o.enable_export_task || self.enable_export_task;
        self.ssl_mode = coalesce(&o.ssl_mode, &self.ssl_mode);
        self.sql_file = coalesce(&o.sql_file, &self.sql_file);
        self.source_db_cluster_identifier = coalesce(
            &o.source_db_cluster_identifier,
            &self.source_db_cluster_identifier,
        );
        self.interactive = o.interactive || self.interactive;
        self.export_task.merge_in(&o.export_task);
        self
    }

    /// Reject configurations that cannot possibly produce a snapshot.
    ///
    /// Empty database credentials only warn: some setups authenticate
    /// without a password.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.temp_cluster.validate()?;
        if self.db_user_name.is_empty() {
            warn!("db-user-name is empty, connecting to the cloned cluster may fail");
        }
        if self.db_user_password.is_empty() {
            warn!("db-user-password is empty, connecting to the cloned cluster may fail");
        }
        if self.enable_export_task {
            self.export_task.validate()?;
        }
        Ok(())
    }
}

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*(env|must_env)\s+"([^"]*)"(?:\s+"([^"]*)")?\s*\}\}"#)
        .expect("template pattern is valid")
});

/// Expand `{{ env "NAME" }}`, `{{ env "NAME" "default" }}` and
/// `{{ must_env "NAME" }}` in a config document.
pub fn expand_env_templates<F>(text: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TEMPLATE.captures_iter(text) {
        let (Some(whole), Some(func), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        let name = name.as_str();
        let value = match (func.as_str(), lookup(name)) {
            (_, Some(value)) => value,
            ("must_env", None) => {
                return Err(ConfigError::MissingEnv {
                    name: name.to_string(),
                })
            }
            (_, None) => caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        };
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
