use std::{io, time::Duration};

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures surfaced by the environment lifecycle and its collaborators.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("command `{command}` failed (code {exit_code:?}):\n{output}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        /// Captured stdout followed by captured stderr; the two streams are not interleaved.
        output: String,
    },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("system failed to become ready within {}s (waited {elapsed:?})", .deadline.as_secs())]
    ReadinessTimeout { elapsed: Duration, deadline: Duration },

    #[error("failed to restart system. Command \"{command}\" failed:\n{output}")]
    RestartFailed { command: String, output: String },

    #[error("failed to teardown system. Command \"{command}\" failed:\n{output}")]
    TeardownFailed { command: String, output: String },

    #[error("failed to dump server logs. Command \"{command}\" failed:\n{output}")]
    LogDumpFailed { command: String, output: String },

    #[error("health probe against {url} failed: {message}")]
    Probe { url: String, message: String },

    #[error("invalid pod status JSON from `{command}`: {source}")]
    PodStatus {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} is not available for the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error(
        "{} scenario cleanup action(s) failed; first: {}",
        .failures.len(),
        .failures.first().map(ToString::to_string).unwrap_or_default()
    )]
    CleanupFailed { failures: Vec<LifecycleError> },

    #[error("failed to write {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    /// Re-wrap a command failure raised while restarting.
    pub fn into_restart_failure(self) -> Self {
        match self {
            LifecycleError::CommandFailed {
                command, output, ..
            } => LifecycleError::RestartFailed { command, output },
            other => other,
        }
    }

    pub fn into_teardown_failure(self) -> Self {
        match self {
            LifecycleError::CommandFailed {
                command, output, ..
            } => LifecycleError::TeardownFailed { command, output },
            other => other,
        }
    }

    pub fn into_log_dump_failure(self) -> Self {
        match self {
            LifecycleError::CommandFailed {
                command, output, ..
            } => LifecycleError::LogDumpFailed { command, output },
            other => other,
        }
    }
}
