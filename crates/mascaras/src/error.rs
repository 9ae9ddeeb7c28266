//! Run-level error taxonomy
//!
//! Every failure a run can end with maps onto one [`RunError`] variant so
//! that `main` can pick an exit path by matching instead of by message.

use crate::config::ConfigError;
use crate::wait::WaitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration was rejected before any resource was created
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// A resource provider call failed
    #[error("{operation} failed")]
    Provider {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A wait point ran out of time
    #[error("timed out waiting for {resource}")]
    WaitTimeout {
        resource: String,
        #[source]
        source: WaitError,
    },

    /// The mask script (or an interactive statement batch) failed
    #[error("mask execution failed")]
    Execution(#[source] anyhow::Error),

    /// The operator typed `abort` in the interactive session
    #[error("prompt abort")]
    SessionAborted,

    /// The snapshot export task could not be started
    #[error("export task `{task_id}` failed to start")]
    ExportTask {
        task_id: String,
        failure_cause: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// The run-scoped cancellation token fired
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn provider(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Provider { operation, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }

    /// Map a wait failure onto the run taxonomy.
    ///
    /// `operation` names the provider call used by the probe so a hard probe
    /// failure surfaces the same way a direct provider call would.
    pub fn from_wait(operation: &'static str, err: WaitError) -> Self {
        match err {
            WaitError::Cancelled { .. } => RunError::Cancelled,
            WaitError::Timeout { .. } => RunError::WaitTimeout {
                resource: err.resource().to_string(),
                source: err,
            },
            WaitError::Probe { source, .. } => RunError::Provider { operation, source },
        }
    }
}
