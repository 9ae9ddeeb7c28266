//! Default configuration values
//!
//! These constants are shared by the CLI, the config file loader and the
//! orchestrator so that every entry point agrees on the same defaults.

use std::time::Duration;

/// Prefix used for generated temporary cluster identifiers
pub const DEFAULT_DB_CLUSTER_IDENTIFIER_PREFIX: &str = "mascaras";

/// Instance class for the temporary DB instance
pub const DEFAULT_DB_INSTANCE_CLASS: &str = "db.t3.small";

/// Database user used by the mask executor
pub const DEFAULT_DB_USER_NAME: &str = "root";

/// PostgreSQL SSL mode used by the mask executor
pub const DEFAULT_SSL_MODE: &str = "disable";

/// Length of the random suffix appended to the identifier prefix
pub const RANDOM_SUFFIX_LEN: usize = 10;

/// Base polling interval for every wait point (1 minute)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Budget for the constant-interval phase of every wait point (5 minutes)
pub const DEFAULT_WAIT_BUDGET_SECS: u64 = 300;

/// Upper bound on a single wait, after which the exponential phase gives up (1 hour)
pub const DEFAULT_WAIT_HARD_LIMIT_SECS: u64 = 3600;

/// Relative jitter applied to every polling delay
pub const DEFAULT_WAIT_JITTER: f64 = 0.05;

/// The exponential phase caps its delay at this multiple of the base interval
pub const BACKOFF_CEILING_FACTOR: u32 = 5;

/// Prefix for environment variables that mirror command line flags
pub const ENV_PREFIX: &str = "MASCARAS_";

// Serde default functions for struct field defaults

/// Returns the default identifier prefix
pub fn default_db_cluster_identifier_prefix() -> String {
    DEFAULT_DB_CLUSTER_IDENTIFIER_PREFIX.to_string()
}

/// Returns the default instance class
pub fn default_db_instance_class() -> String {
    DEFAULT_DB_INSTANCE_CLASS.to_string()
}

/// Returns the default database user
pub fn default_db_user_name() -> String {
    DEFAULT_DB_USER_NAME.to_string()
}

/// Returns the default SSL mode
pub fn default_ssl_mode() -> String {
    DEFAULT_SSL_MODE.to_string()
}

/// Returns the default polling interval
pub fn default_poll_interval() -> Duration {
    Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
}

/// Returns the default per-wait budget
pub fn default_wait_budget() -> Duration {
    Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS)
}
