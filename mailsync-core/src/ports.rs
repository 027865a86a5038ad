//! Interfaces between the reconciliation core and its collaborators.
//!
//! The core never talks to the directory or the backend directly; it is
//! handed implementations of these traits. All calls are blocking: a cycle
//! is strictly sequential and timeouts are the adapter's business.

use serde_json::Value;

use crate::error::{FetchError, MutationError, QueryError};
use crate::types::{DirectoryEntry, EntityKind, Record, UpdateEntry};

/// Source of the desired state (the directory-of-record).
///
/// Zero matches is success with an empty list, never an error.
pub trait DesiredStateSource {
    fn fetch_users(&mut self, filter: &str, fields: &[&str])
        -> Result<Vec<DirectoryEntry>, QueryError>;

    fn fetch_groups(
        &mut self,
        filter: &str,
        fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError>;

    fn fetch_group_members(
        &mut self,
        group_filter: &str,
        fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError>;

    /// Called once the cycle no longer needs the directory.
    fn end_cycle(&mut self) {}
}

/// Reads the backend's current records of one kind.
pub trait RemoteStateLoader {
    fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Record>, FetchError>;
}

/// Applies mutations to the backend.
pub trait MutationGateway {
    fn create(&self, kind: EntityKind, record: &Record) -> Result<(), MutationError>;

    fn update(&self, kind: EntityKind, entry: &UpdateEntry) -> Result<(), MutationError>;

    /// Deletes every id in one call or one at a time, at the gateway's choice.
    fn delete(&self, kind: EntityKind, ids: &[Value]) -> Result<(), MutationError>;
}
