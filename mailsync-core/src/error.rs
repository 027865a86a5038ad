//! Error types for mailsync-core.
//!
//! [`QueryError`], [`FetchError`] and [`MutationError`] are the failures the
//! adapters report through the port traits; the cycle orchestrator maps each
//! of them onto the phase it aborts.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityKind, MutationAction};

/// Configuration could not be assembled from the YAML file and environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key was neither in the config file nor in the environment.
    #[error("required configuration value '{key}' is not set (set {env} or add it to the config file)")]
    Missing { key: String, env: String },

    /// A key was present but its value could not be parsed.
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    /// The config file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The desired-state source could not be queried.
#[derive(Debug, Error)]
#[error("directory query failed for filter {filter}: {message}")]
pub struct QueryError {
    pub filter: String,
    pub message: String,
}

impl QueryError {
    pub fn new(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            message: message.into(),
        }
    }
}

/// A remote snapshot could not be read.
#[derive(Debug, Error)]
#[error("failed to fetch {kind} snapshot{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct FetchError {
    pub kind: EntityKind,
    pub status: Option<u16>,
    pub message: String,
}

/// The backend rejected a create / update / delete call.
#[derive(Debug, Error)]
#[error("{action} {kind} '{key}' rejected: {message}")]
pub struct MutationError {
    pub kind: EntityKind,
    pub action: MutationAction,
    /// Natural key or backend id(s) the call targeted.
    pub key: String,
    /// Server-provided message, possibly rewritten to a friendlier one.
    pub message: String,
}
