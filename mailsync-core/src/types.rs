//! Domain types shared by the reconciler, the adapters and the daemon.
//!
//! Records on both sides of a sync are JSON objects: the backend speaks JSON
//! and its values are heterogeneous (numbers, numeric strings, lists), so a
//! [`Record`] is kept untyped and each entity kind interprets its own fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entity's attributes, either as read from the backend or as desired.
pub type Record = Map<String, Value>;

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// Every entity kind the backend manages on our behalf.
///
/// The derived ordering is the dependency order: owners sort before the
/// entities that depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Domain,
    Mailbox,
    Alias,
    Filter,
}

impl EntityKind {
    /// All kinds in load / create order (owners first).
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Domain,
            EntityKind::Mailbox,
            EntityKind::Alias,
            EntityKind::Filter,
        ]
    }

    /// All kinds in delete order (dependents first).
    pub fn deletion_order() -> &'static [EntityKind] {
        &[
            EntityKind::Filter,
            EntityKind::Alias,
            EntityKind::Mailbox,
            EntityKind::Domain,
        ]
    }

    /// Path segment used when reading the full snapshot of this kind.
    pub fn read_path(&self) -> &'static str {
        match self {
            EntityKind::Domain => "domain",
            EntityKind::Mailbox => "mailbox",
            EntityKind::Alias => "alias",
            // The backend pluralises this one on the read path only.
            EntityKind::Filter => "filters",
        }
    }

    /// Path segment used by add / edit / delete calls.
    pub fn write_path(&self) -> &'static str {
        match self {
            EntityKind::Domain => "domain",
            EntityKind::Mailbox => "mailbox",
            EntityKind::Alias => "alias",
            EntityKind::Filter => "filter",
        }
    }

    /// Attribute of a snapshot record holding the natural key.
    pub fn primary_key(&self) -> &'static str {
        match self {
            EntityKind::Domain => "domain_name",
            EntityKind::Mailbox => "username",
            EntityKind::Alias => "address",
            EntityKind::Filter => "username",
        }
    }

    /// Plural noun for log lines and tables.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Domain => "domains",
            EntityKind::Mailbox => "mailboxes",
            EntityKind::Alias => "aliases",
            EntityKind::Filter => "filters",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.write_path())
    }
}

/// The three kinds of backend mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationAction::Create => write!(f, "create"),
            MutationAction::Update => write!(f, "update"),
            MutationAction::Delete => write!(f, "delete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue shapes
// ---------------------------------------------------------------------------

/// An apply-ready update: the changed attributes plus the identifiers the
/// backend's edit call targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub attr: Record,
    pub items: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Directory entries
// ---------------------------------------------------------------------------

/// A normalized directory search result: text attributes only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.to_owned(), values.into_iter().map(Into::into).collect());
        self
    }

    /// First value of `name`, if the attribute is present and non-empty.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `name`; empty when absent.
    pub fn all(&self, name: &str) -> &[String] {
        self.attributes
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// Domain part of an address (everything after the last `@`).
///
/// An address without `@` is returned whole.
pub fn domain_of(address: &str) -> &str {
    address.rsplit('@').next().unwrap_or(address)
}

/// Local part of an address (everything before the first `@`).
pub fn local_part_of(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
