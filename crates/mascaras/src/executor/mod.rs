//! Mask script execution against the temporary cluster
//!
//! The orchestrator only sees the [`MaskExecutor`] and [`ExecutorFactory`]
//! traits. [`SqlExecutorFactory`] is the production implementation over
//! MySQL and PostgreSQL connections; tests substitute recording fakes.

mod render;
pub mod split;
mod sql;

pub use render::render_table;
pub use split::{is_row_returning, split_statements};
pub use sql::{SqlExecutor, SqlExecutorFactory};

use anyhow::Result;
use chrono::{DateTime, Utc};
use mascaras_common::EngineDialect;

/// Result set of a row-returning statement, rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTable {
    pub query: String,
    pub columns: Vec<String>,
    /// `None` cells are SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
}

/// Result of a statement that does not return rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementOutcome {
    pub query: String,
    pub rows_affected: u64,
    /// Only MySQL reports this
    pub last_insert_id: Option<u64>,
}

impl std::fmt::Display for StatementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Query OK, {} rows affected", self.rows_affected)?;
        if let Some(id) = self.last_insert_id.filter(|id| *id > 0) {
            write!(f, ", last insert id {id}")?;
        }
        Ok(())
    }
}

pub type TableSelectHook = Box<dyn Fn(&QueryTable) + Send + Sync>;
pub type StatementResultHook = Box<dyn Fn(&StatementOutcome) + Send + Sync>;

/// Runs SQL text against one open connection.
#[allow(async_fn_in_trait)]
pub trait MaskExecutor {
    /// Execute every statement in `sql`, in order, stopping at the first failure
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Completion time of the most recent statement
    fn last_execute_time(&self) -> Option<DateTime<Utc>>;

    /// Called with each result set
    fn on_table_select(&mut self, hook: TableSelectHook);

    /// Called after each statement that does not return rows
    fn on_statement_result(&mut self, hook: StatementResultHook);

    async fn close(&mut self) -> Result<()>;
}

/// Where and how to connect to the temporary cluster
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub dialect: EngineDialect,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// PostgreSQL only
    pub ssl_mode: String,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish_non_exhaustive()
    }
}

/// Opens executors; chosen once per process and injected into the orchestrator.
#[allow(async_fn_in_trait)]
pub trait ExecutorFactory {
    type Executor: MaskExecutor;

    async fn connect(&self, target: &ConnectTarget) -> Result<Self::Executor>;
}
