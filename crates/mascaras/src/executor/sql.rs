//! sqlx-backed executor for MySQL and PostgreSQL compatible clusters

use super::split::{is_row_returning, split_statements};
use super::{
    ConnectTarget, ExecutorFactory, MaskExecutor, QueryTable, StatementOutcome,
    StatementResultHook, TableSelectHook,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mascaras_common::EngineDialect;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Column, ColumnIndex, Connection, Decode, Row, ValueRef};
use tracing::{debug, info};

enum Conn {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

/// Executor holding one open connection to the temporary cluster
pub struct SqlExecutor {
    conn: Option<Conn>,
    last_execute_time: Option<DateTime<Utc>>,
    table_hook: Option<TableSelectHook>,
    result_hook: Option<StatementResultHook>,
}

/// Opens [`SqlExecutor`]s using the dialect of the target
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExecutorFactory;

impl ExecutorFactory for SqlExecutorFactory {
    type Executor = SqlExecutor;

    async fn connect(&self, target: &ConnectTarget) -> Result<SqlExecutor> {
        info!(
            dialect = %target.dialect,
            host = %target.host,
            port = target.port,
            database = %target.database,
            "Connecting to temp cluster"
        );

        let conn = match target.dialect {
            EngineDialect::MySql => {
                let mut options = MySqlConnectOptions::new()
                    .host(&target.host)
                    .port(target.port)
                    .username(&target.user)
                    .password(&target.password);
                if !target.database.is_empty() {
                    options = options.database(&target.database);
                }
                Conn::MySql(
                    MySqlConnection::connect_with(&options)
                        .await
                        .context("Failed to connect to MySQL")?,
                )
            }
            EngineDialect::Postgres => {
                let ssl_mode: PgSslMode = target
                    .ssl_mode
                    .parse()
                    .with_context(|| format!("Invalid ssl mode {}", target.ssl_mode))?;
                let mut options = PgConnectOptions::new()
                    .host(&target.host)
                    .port(target.port)
                    .username(&target.user)
                    .password(&target.password)
                    .ssl_mode(ssl_mode);
                if !target.database.is_empty() {
                    options = options.database(&target.database);
                }
                Conn::Postgres(
                    PgConnection::connect_with(&options)
                        .await
                        .context("Failed to connect to PostgreSQL")?,
                )
            }
        };

        Ok(SqlExecutor {
            conn: Some(conn),
            last_execute_time: None,
            table_hook: None,
            result_hook: None,
        })
    }
}

/// Convert rows to text cells.
///
/// `raw_sql` uses the text protocol on both engines, so every non-NULL value
/// decodes as a string regardless of its column type.
fn to_table<R>(query: &str, rows: &[R]) -> QueryTable
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database>,
{
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| match row.try_get_raw(i) {
                    Ok(value) if value.is_null() => None,
                    _ => Some(
                        row.try_get_unchecked::<String, _>(i)
                            .unwrap_or_else(|_| "<binary>".to_string()),
                    ),
                })
                .collect()
        })
        .collect();

    QueryTable {
        query: query.to_string(),
        columns,
        rows,
    }
}

impl SqlExecutor {
    async fn run_statement(&mut self, statement: &str) -> Result<()> {
        let conn = self.conn.as_mut().context("Executor is closed")?;
        debug!(query = %statement, "Executing statement");

        if is_row_returning(statement) {
            let table = match conn {
                Conn::MySql(c) => to_table(statement, &sqlx::raw_sql(statement).fetch_all(c).await?),
                Conn::Postgres(c) => {
                    to_table(statement, &sqlx::raw_sql(statement).fetch_all(c).await?)
                }
            };
            if let Some(hook) = &self.table_hook {
                hook(&table);
            }
        } else {
            let outcome = match conn {
                Conn::MySql(c) => {
                    let done = sqlx::raw_sql(statement).execute(c).await?;
                    StatementOutcome {
                        query: statement.to_string(),
                        rows_affected: done.rows_affected(),
                        last_insert_id: Some(done.last_insert_id()),
                    }
                }
                Conn::Postgres(c) => {
                    let done = sqlx::raw_sql(statement).execute(c).await?;
                    StatementOutcome {
                        query: statement.to_string(),
                        rows_affected: done.rows_affected(),
                        last_insert_id: None,
                    }
                }
            };
            if let Some(hook) = &self.result_hook {
                hook(&outcome);
            }
        }
        Ok(())
    }
}

impl MaskExecutor for SqlExecutor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        for statement in split_statements(sql) {
            self.run_statement(&statement)
                .await
                .with_context(|| format!("Failed to execute `{statement}`"))?;
            self.last_execute_time = Some(Utc::now());
        }
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
        match self.conn.take() {
            Some(Conn::MySql(c)) => c.close().await.context("Failed to close MySQL connection"),
            Some(Conn::Postgres(c)) => c
                .close()
                .await
                .context("Failed to close PostgreSQL connection"),
            None => Ok(()),
        }
    }
}
