//! In-memory fakes of the directory and the backend.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use serde_json::{json, Value};

use mailsync_core::config::ListDelivery;
use mailsync_core::types::domain_of;
use mailsync_core::{
    DesiredStateSource, DirectoryEntry, EntityKind, FetchError, MutationAction, MutationError,
    MutationGateway, QueryError, Record, RemoteStateLoader, UpdateEntry,
};
use mailsync_reconcile::delta::MEBIBYTE;
use mailsync_reconcile::strategy::DOMAIN_MARKER;
use mailsync_reconcile::DesiredSettings;

pub fn settings() -> DesiredSettings {
    DesiredSettings {
        user_filter: "(sophomorixRole=student)".into(),
        group_filter: "(sophomorixType=project)".into(),
        domain_quota: 10_240,
        enable_gal: true,
        list_delivery: ListDelivery::Filter,
    }
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

pub fn user(mail: &str, status: &str, proxies: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={mail},OU=students,DC=x,DC=org"))
        .with("mail", [mail])
        .with("proxyAddresses", proxies.iter().copied())
        .with("sophomorixStatus", [status])
        .with("sophomorixMailQuotaCalculated", ["2"])
        .with("displayName", [mail])
}

pub fn list_group(mail: &str, account: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={account},OU=projects,DC=x,DC=org"))
        .with("mail", [mail])
        .with("distinguishedName", [format!("CN={account},OU=projects,DC=x,DC=org")])
        .with("sophomorixMailList", ["TRUE"])
        .with("sAMAccountName", [account])
}

pub fn managed_domain(name: &str) -> Record {
    record(json!({
        "domain_name": name,
        "description": DOMAIN_MARKER,
        "def_quota_for_mbox": MEBIBYTE,
        "max_quota_for_mbox": 10_240 * MEBIBYTE,
        "max_quota_for_domain": 10_240 * MEBIBYTE,
        "max_num_mboxes_for_domain": 10_000,
        "max_num_aliases_for_domain": 10_000,
        "active": 1,
        "gal": 1,
    }))
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    pub users: Vec<DirectoryEntry>,
    pub groups: Vec<DirectoryEntry>,
    /// Member entries keyed by group DN.
    pub members: BTreeMap<String, Vec<DirectoryEntry>>,
    pub fail_users: bool,
    pub queries: Vec<String>,
    pub ended: bool,
}

impl FakeDirectory {
    pub fn with_users(users: Vec<DirectoryEntry>) -> Self {
        Self {
            users,
            ..Self::default()
        }
    }
}

impl DesiredStateSource for FakeDirectory {
    fn fetch_users(
        &mut self,
        filter: &str,
        _fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.queries.push(filter.to_owned());
        if self.fail_users {
            return Err(QueryError::new(filter, "Can't contact LDAP server"));
        }
        Ok(self.users.clone())
    }

    fn fetch_groups(
        &mut self,
        filter: &str,
        _fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.queries.push(filter.to_owned());
        Ok(self.groups.clone())
    }

    fn fetch_group_members(
        &mut self,
        group_filter: &str,
        _fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.queries.push(group_filter.to_owned());
        Ok(self
            .members
            .iter()
            .find(|(dn, _)| group_filter.contains(dn.as_str()))
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default())
    }

    fn end_cycle(&mut self) {
        self.ended = true;
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Stores records in read shape and converts writes the way the real
/// backend does (renamed fields, quotas in bytes, generated ids).
#[derive(Default)]
pub struct FakeBackend {
    pub records: RefCell<BTreeMap<EntityKind, Vec<Record>>>,
    /// `"<action> <kind> <key>"` per gateway call, in order.
    pub calls: RefCell<Vec<String>>,
    pub fail_on: Option<(MutationAction, EntityKind)>,
    pub fail_fetch: Option<EntityKind>,
    pub next_id: Cell<u64>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, kind: EntityKind, records: Vec<Record>) {
        let mut store = self.records.borrow_mut();
        for mut record in records {
            if matches!(kind, EntityKind::Alias | EntityKind::Filter) && !record.contains_key("id") {
                record.insert("id".into(), Value::from(self.allocate_id()));
            }
            store.entry(kind).or_default().push(record);
        }
    }

    pub fn snapshot(&self, kind: EntityKind) -> Vec<Record> {
        self.records.borrow().get(&kind).cloned().unwrap_or_default()
    }

    pub fn keys(&self, kind: EntityKind) -> Vec<String> {
        self.snapshot(kind)
            .iter()
            .filter_map(|r| r.get(kind.primary_key()).and_then(Value::as_str).map(str::to_owned))
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn check(&self, action: MutationAction, kind: EntityKind, key: &str) -> Result<(), MutationError> {
        self.calls.borrow_mut().push(format!("{action} {kind} {key}"));
        if self.fail_on == Some((action, kind)) {
            return Err(MutationError {
                kind,
                action,
                key: key.to_owned(),
                message: "rejected by fake".into(),
            });
        }
        Ok(())
    }

    fn matches(kind: EntityKind, record: &Record, target: &Value) -> bool {
        let attr = match kind {
            EntityKind::Domain => "domain_name",
            EntityKind::Mailbox => "username",
            EntityKind::Alias | EntityKind::Filter => "id",
        };
        record.get(attr) == Some(target)
    }
}

/// Convert write-side attributes to the read shape.
fn to_read_shape(kind: EntityKind, attrs: &Record) -> Record {
    let mut out = Record::new();
    for (field, value) in attrs {
        let (name, bytes) = match (kind, field.as_str()) {
            (EntityKind::Domain, "domain") => ("domain_name", false),
            (EntityKind::Domain, "maxquota") => ("max_quota_for_mbox", true),
            (EntityKind::Domain, "defquota") => ("def_quota_for_mbox", true),
            (EntityKind::Domain, "quota") => ("max_quota_for_domain", true),
            (EntityKind::Domain, "mailboxes") => ("max_num_mboxes_for_domain", false),
            (EntityKind::Domain, "aliases") => ("max_num_aliases_for_domain", false),
            (EntityKind::Domain, "restart_sogo") => continue,
            (EntityKind::Mailbox, "quota") => ("quota", true),
            (EntityKind::Mailbox, "password" | "password2") => continue,
            (_, other) => (other, false),
        };
        let value = if bytes {
            value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .map(|units| Value::from(units * MEBIBYTE))
                .unwrap_or_else(|| value.clone())
        } else {
            value.clone()
        };
        out.insert(name.to_owned(), value);
    }
    out
}

impl RemoteStateLoader for FakeBackend {
    fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Record>, FetchError> {
        if self.fail_fetch == Some(kind) {
            return Err(FetchError {
                kind,
                status: Some(500),
                message: "fake outage".into(),
            });
        }
        Ok(self.snapshot(kind))
    }
}

impl MutationGateway for FakeBackend {
    fn create(&self, kind: EntityKind, record: &Record) -> Result<(), MutationError> {
        let mut stored = to_read_shape(kind, record);
        let key = match kind {
            EntityKind::Domain => stored["domain_name"].as_str().unwrap_or_default().to_owned(),
            EntityKind::Mailbox => {
                let local = stored["local_part"].as_str().unwrap_or_default();
                let domain = stored["domain"].as_str().unwrap_or_default();
                let username = format!("{local}@{domain}");
                stored.insert("username".into(), Value::from(username.clone()));
                username
            }
            EntityKind::Alias => {
                let address = stored["address"].as_str().unwrap_or_default().to_owned();
                stored.insert("domain".into(), Value::from(domain_of(&address)));
                stored.insert("id".into(), Value::from(self.allocate_id()));
                address
            }
            EntityKind::Filter => {
                stored.insert("id".into(), Value::from(self.allocate_id()));
                stored["username"].as_str().unwrap_or_default().to_owned()
            }
        };
        self.check(MutationAction::Create, kind, &key)?;
        self.records.borrow_mut().entry(kind).or_default().push(stored);
        Ok(())
    }

    fn update(&self, kind: EntityKind, entry: &UpdateEntry) -> Result<(), MutationError> {
        let target = entry.items.first().cloned().unwrap_or(Value::Null);
        self.check(MutationAction::Update, kind, &target.to_string())?;
        let changes = to_read_shape(kind, &entry.attr);
        let mut store = self.records.borrow_mut();
        for record in store.entry(kind).or_default().iter_mut() {
            if entry.items.iter().any(|t| Self::matches(kind, record, t)) {
                record.extend(changes.clone());
            }
        }
        Ok(())
    }

    fn delete(&self, kind: EntityKind, ids: &[Value]) -> Result<(), MutationError> {
        let key = ids.iter().map(Value::to_string).collect::<Vec<_>>().join(",");
        self.check(MutationAction::Delete, kind, &key)?;
        let mut store = self.records.borrow_mut();
        store
            .entry(kind)
            .or_default()
            .retain(|record| !ids.iter().any(|id| Self::matches(kind, record, id)));
        Ok(())
    }
}
