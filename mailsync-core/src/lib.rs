//! mailsync core library — shared types, port traits, configuration, errors.
//!
//! - [`types`] — records, entity kinds, directory entries
//! - [`ports`] — traits the reconciler consumes (directory, backend)
//! - [`config`] — layered YAML + environment configuration
//! - [`error`] — [`ConfigError`], [`QueryError`], [`FetchError`], [`MutationError`]

pub mod config;
pub mod error;
pub mod ports;
pub mod types;

pub use config::SyncConfig;
pub use error::{ConfigError, FetchError, MutationError, QueryError};
pub use ports::{DesiredStateSource, MutationGateway, RemoteStateLoader};
pub use types::{DirectoryEntry, EntityKind, MutationAction, Record, UpdateEntry};
