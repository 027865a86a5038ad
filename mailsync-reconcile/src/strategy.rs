//! Per-kind behaviour plugged into the generic [`Reconciler`].
//!
//! A strategy answers four questions for its kind: which attribute is the
//! key, whether a snapshot record is ours, how to compare a field, and what
//! the backend wants as the target of a delete or edit call.
//!
//! [`Reconciler`]: crate::reconciler::Reconciler

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use mailsync_core::types::domain_of;
use mailsync_core::{EntityKind, Record};

use crate::delta::FieldPolicy;

/// Marker written into the description of every domain this process owns.
pub const DOMAIN_MARKER: &str = "#### managed by linuxmuster ####";

/// Read-only view of a parent reconciler's managed keys.
///
/// Handed to dependent strategies at construction so child validity can
/// consult the parent without borrowing the parent reconciler.
#[derive(Debug, Clone, Default)]
pub struct ManagedKeys(Arc<HashSet<String>>);

impl ManagedKeys {
    pub fn new(keys: HashSet<String>) -> Self {
        Self(Arc::new(keys))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identifier used by the edit call for a managed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// The natural key itself.
    Key,
    /// A backend-assigned attribute captured from the snapshot record.
    Captured(&'static str),
}

/// Kind-specific hooks of a reconciler.
pub trait EntityStrategy {
    fn kind(&self) -> EntityKind;

    /// Natural key of a snapshot record; `None` when it lacks one.
    fn key_of(&self, record: &Record) -> Option<String> {
        record
            .get(self.kind().primary_key())
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Validity predicate: does this process own the record?
    fn is_managed(&self, _record: &Record) -> bool {
        true
    }

    fn field_policy(&self) -> FieldPolicy {
        FieldPolicy::PLAIN
    }

    /// Whether the desired value of `field` differs from `current`.
    fn has_delta(&self, field: &str, current: &Record, desired: &Value) -> bool {
        self.field_policy().has_delta(field, current, desired)
    }

    /// Attribute of the managed record sent as the delete id; `None` sends
    /// the natural key.
    fn kill_attribute(&self) -> Option<&'static str> {
        None
    }

    fn update_target(&self) -> UpdateTarget {
        UpdateTarget::Key
    }
}

/// Resolve the delete id for a managed record.
pub(crate) fn kill_id<S: EntityStrategy + ?Sized>(
    strategy: &S,
    key: &str,
    managed: &Record,
) -> Option<Value> {
    match strategy.kill_attribute() {
        None => Some(Value::from(key)),
        Some(attr) => managed.get(attr).filter(|v| !v.is_null()).cloned(),
    }
}

/// Resolve the edit target for a managed record.
pub(crate) fn update_id<S: EntityStrategy + ?Sized>(
    strategy: &S,
    key: &str,
    managed: &Record,
) -> Option<Value> {
    match strategy.update_target() {
        UpdateTarget::Key => Some(Value::from(key)),
        UpdateTarget::Captured(attr) => managed.get(attr).filter(|v| !v.is_null()).cloned(),
    }
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Domains carry the ownership marker in their description.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainStrategy;

const DOMAIN_POLICY: FieldPolicy = FieldPolicy {
    ignored: &["domain", "restart_sogo"],
    renames: &[
        ("maxquota", "max_quota_for_mbox"),
        ("defquota", "def_quota_for_mbox"),
        ("quota", "max_quota_for_domain"),
        ("mailboxes", "max_num_mboxes_for_domain"),
        ("aliases", "max_num_aliases_for_domain"),
    ],
    quota_fields: &[
        "max_quota_for_mbox",
        "def_quota_for_mbox",
        "max_quota_for_domain",
    ],
};

impl EntityStrategy for DomainStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Domain
    }

    fn is_managed(&self, record: &Record) -> bool {
        record
            .get("description")
            .and_then(Value::as_str)
            .is_some_and(|d| d.contains(DOMAIN_MARKER))
    }

    fn field_policy(&self) -> FieldPolicy {
        DOMAIN_POLICY
    }

    fn kill_attribute(&self) -> Option<&'static str> {
        Some("domain_name")
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Mailboxes are ours when their domain is.
#[derive(Debug, Clone, Default)]
pub struct MailboxStrategy {
    domains: ManagedKeys,
}

impl MailboxStrategy {
    pub fn new(domains: ManagedKeys) -> Self {
        Self { domains }
    }
}

const MAILBOX_POLICY: FieldPolicy = FieldPolicy {
    ignored: &["password", "password2"],
    renames: &[],
    quota_fields: &["quota"],
};

impl EntityStrategy for MailboxStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Mailbox
    }

    fn is_managed(&self, record: &Record) -> bool {
        record
            .get("domain")
            .and_then(Value::as_str)
            .is_some_and(|d| self.domains.contains(d))
    }

    fn field_policy(&self) -> FieldPolicy {
        MAILBOX_POLICY
    }

    fn kill_attribute(&self) -> Option<&'static str> {
        Some("username")
    }
}

// ---------------------------------------------------------------------------
// Alias
// ---------------------------------------------------------------------------

/// Aliases are ours when their domain is; the backend addresses them by id.
#[derive(Debug, Clone, Default)]
pub struct AliasStrategy {
    domains: ManagedKeys,
}

impl AliasStrategy {
    pub fn new(domains: ManagedKeys) -> Self {
        Self { domains }
    }
}

impl EntityStrategy for AliasStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Alias
    }

    fn is_managed(&self, record: &Record) -> bool {
        record
            .get("domain")
            .and_then(Value::as_str)
            .is_some_and(|d| self.domains.contains(d))
    }

    fn kill_attribute(&self) -> Option<&'static str> {
        Some("id")
    }

    fn update_target(&self) -> UpdateTarget {
        UpdateTarget::Captured("id")
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Active prefilters owned by a mailbox in one of our domains.
#[derive(Debug, Clone, Default)]
pub struct FilterStrategy {
    domains: ManagedKeys,
}

impl FilterStrategy {
    pub fn new(domains: ManagedKeys) -> Self {
        Self { domains }
    }
}

impl EntityStrategy for FilterStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Filter
    }

    fn is_managed(&self, record: &Record) -> bool {
        let owned = record
            .get("username")
            .and_then(Value::as_str)
            .is_some_and(|u| self.domains.contains(domain_of(u)));
        let prefilter = record.get("filter_type").and_then(Value::as_str) == Some("prefilter");
        let active = record
            .get("active")
            .is_some_and(|a| crate::delta::values_equal(a, &Value::from(1)));
        owned && prefilter && active
    }

    fn kill_attribute(&self) -> Option<&'static str> {
        Some("id")
    }

    fn update_target(&self) -> UpdateTarget {
        UpdateTarget::Captured("id")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn domains(names: &[&str]) -> ManagedKeys {
        ManagedKeys::new(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn domain_validity_looks_for_marker() {
        let ours = record(json!({
            "domain_name": "x.org",
            "description": format!("School mail {DOMAIN_MARKER}"),
        }));
        let theirs = record(json!({"domain_name": "y.org", "description": "hand made"}));
        let bare = record(json!({"domain_name": "z.org"}));
        assert!(DomainStrategy.is_managed(&ours));
        assert!(!DomainStrategy.is_managed(&theirs));
        assert!(!DomainStrategy.is_managed(&bare));
    }

    #[test]
    fn mailbox_validity_follows_parent_domains() {
        let strategy = MailboxStrategy::new(domains(&["x.org"]));
        assert!(strategy.is_managed(&record(json!({"username": "a@x.org", "domain": "x.org"}))));
        assert!(!strategy.is_managed(&record(json!({"username": "a@y.org", "domain": "y.org"}))));
    }

    #[test]
    fn filter_validity_requires_active_prefilter() {
        let strategy = FilterStrategy::new(domains(&["x.org"]));
        let base = json!({"id": 4, "username": "list@x.org", "filter_type": "prefilter", "active": "1"});
        assert!(strategy.is_managed(&record(base.clone())));

        let mut postfilter = base.clone();
        postfilter["filter_type"] = json!("postfilter");
        assert!(!strategy.is_managed(&record(postfilter)));

        let mut inactive = base.clone();
        inactive["active"] = json!(0);
        assert!(!strategy.is_managed(&record(inactive)));

        let mut foreign = base;
        foreign["username"] = json!("list@y.org");
        assert!(!strategy.is_managed(&record(foreign)));
    }

    #[test]
    fn alias_targets_use_captured_id() {
        let strategy = AliasStrategy::new(domains(&["x.org"]));
        let managed = record(json!({"id": 17, "address": "b@x.org", "domain": "x.org"}));
        assert_eq!(kill_id(&strategy, "b@x.org", &managed), Some(json!(17)));
        assert_eq!(update_id(&strategy, "b@x.org", &managed), Some(json!(17)));

        let without_id = record(json!({"address": "b@x.org", "domain": "x.org"}));
        assert_eq!(kill_id(&strategy, "b@x.org", &without_id), None);
    }

    #[test]
    fn domain_targets_use_natural_key() {
        let managed = record(json!({"domain_name": "x.org"}));
        assert_eq!(kill_id(&DomainStrategy, "x.org", &managed), Some(json!("x.org")));
        assert_eq!(update_id(&DomainStrategy, "x.org", &managed), Some(json!("x.org")));
    }

    #[test]
    fn domain_policy_maps_write_names_and_units() {
        let current = record(json!({
            "max_quota_for_domain": 1_073_741_824u64,
            "max_num_mboxes_for_domain": 10000,
        }));
        assert!(!DomainStrategy.has_delta("quota", &current, &json!(1024)));
        assert!(DomainStrategy.has_delta("quota", &current, &json!(2048)));
        assert!(!DomainStrategy.has_delta("mailboxes", &current, &json!(10000)));
        assert!(!DomainStrategy.has_delta("restart_sogo", &current, &json!(1)));
    }
}
