//! Error types for mailsync-mailcow.

use thiserror::Error;

/// The HTTP agent could not be built.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to set up TLS: {0}")]
    Tls(#[from] native_tls::Error),
}

/// A docker-api call failed.
#[derive(Debug, Error)]
pub enum DockerError {
    /// Transport failure or non-success status.
    #[error("docker api request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The container list was not the expected JSON shape.
    #[error("unexpected docker api response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// No container carries the requested compose service label.
    #[error("no container found for service '{0}'")]
    NotFound(String),

    /// The container is in a state that cannot be restarted.
    #[error("container for service '{service}' is not restartable (state: {state})")]
    NotRestartable { service: String, state: String },

    /// Waiting for containers was cancelled.
    #[error("stopped waiting for containers")]
    Cancelled,
}
