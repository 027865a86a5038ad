use std::path::PathBuf;

use thiserror::Error;

/// Error surface for daemon startup and the sync loop.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] mailsync_core::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] mailsync_mailcow::HttpError),

    #[error("docker api error: {0}")]
    Docker(#[from] mailsync_mailcow::DockerError),

    #[error("render error: {0}")]
    Render(#[from] mailsync_renderer::RenderError),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("signal handler failed: {0}")]
    Signal(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn join_err(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Join {
        task,
        message: err.to_string(),
    }
}
