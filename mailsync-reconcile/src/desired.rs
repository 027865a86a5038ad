//! Turning directory entries into desired backend records.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tracing::warn;

use mailsync_core::config::ListDelivery;
use mailsync_core::types::{domain_of, local_part_of};
use mailsync_core::{DirectoryEntry, Record, SyncConfig};

use crate::strategy::DOMAIN_MARKER;

/// Attributes requested for every user.
pub const USER_FIELDS: &[&str] = &[
    "mail",
    "proxyAddresses",
    "sophomorixStatus",
    "sophomorixMailQuotaCalculated",
    "displayName",
];

/// Attributes requested for every group.
pub const GROUP_FIELDS: &[&str] = &[
    "mail",
    "distinguishedName",
    "sophomorixMailList",
    "sAMAccountName",
];

/// Attributes requested for group members.
pub const MEMBER_FIELDS: &[&str] = &["mail"];

/// Account states that lock the mailbox.
const INACTIVE_STATUSES: &[&str] = &["L", "D", "R", "K", "F"];

const PASSWORD_LENGTH: usize = 20;
const DOMAIN_MAILBOX_LIMIT: u64 = 10_000;
const DOMAIN_ALIAS_LIMIT: u64 = 10_000;

/// Inputs of the derivation that come from configuration.
#[derive(Debug, Clone)]
pub struct DesiredSettings {
    pub user_filter: String,
    pub group_filter: String,
    /// Domain quota in MiB.
    pub domain_quota: u64,
    pub enable_gal: bool,
    pub list_delivery: ListDelivery,
}

impl DesiredSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            user_filter: config.ldap.user_filter.clone(),
            group_filter: config.ldap.group_filter.clone(),
            domain_quota: config.cycle.domain_quota,
            enable_gal: config.cycle.enable_gal,
            list_delivery: config.cycle.list_delivery,
        }
    }

    /// Filter selecting every (transitive) member of `group_dn` that is also
    /// a sync user.
    pub fn member_filter(&self, group_dn: &str) -> String {
        format!(
            "(&(memberof:1.2.840.113556.1.4.1941:={group_dn}){})",
            self.user_filter
        )
    }

    pub fn domain_record(&self, domain: &str) -> Record {
        let mut record = Record::new();
        record.insert("domain".into(), Value::from(domain));
        record.insert("defquota".into(), Value::from(1));
        record.insert("maxquota".into(), Value::from(self.domain_quota));
        record.insert("quota".into(), Value::from(self.domain_quota));
        record.insert("description".into(), Value::from(DOMAIN_MARKER));
        record.insert("active".into(), Value::from(1));
        record.insert("restart_sogo".into(), Value::from(1));
        record.insert("mailboxes".into(), Value::from(DOMAIN_MAILBOX_LIMIT));
        record.insert("aliases".into(), Value::from(DOMAIN_ALIAS_LIMIT));
        record.insert("gal".into(), Value::from(u8::from(self.enable_gal)));
        record
    }

    /// Mailbox and aliases of one directory user; `None` without `mail`.
    pub fn user(&self, entry: &DirectoryEntry) -> Option<DesiredUser> {
        let Some(mail) = entry.first("mail").filter(|m| !m.is_empty()) else {
            warn!(dn = %entry.dn, "user has no mail attribute; skipping");
            return None;
        };
        let mailbox = mailbox_record(
            mail,
            entry.first("sophomorixStatus").unwrap_or_default(),
            entry.first("sophomorixMailQuotaCalculated"),
            entry.first("displayName").unwrap_or(local_part_of(mail)),
        );
        let aliases = entry
            .all("proxyAddresses")
            .iter()
            .map(|raw| strip_smtp_prefix(raw))
            .filter(|address| !address.is_empty() && !address.eq_ignore_ascii_case(mail))
            .map(|address| (address.to_owned(), alias_record(address, mail)))
            .collect();

        Some(DesiredUser {
            mail: mail.to_owned(),
            domain: domain_of(mail).to_owned(),
            mailbox,
            aliases,
        })
    }

    /// Whether a group asks for a mailing list.
    pub fn list_enabled(&self, group: &DirectoryEntry) -> bool {
        group.first("sophomorixMailList") == Some("TRUE")
            && group.first("mail").is_some_and(|m| !m.is_empty())
    }

    /// Representation of a mailing-list group with its resolved members.
    ///
    /// `None` when the group has no list address, or when alias delivery is
    /// configured and nobody would receive mail.
    pub fn list(&self, group: &DirectoryEntry, members: &[String]) -> Option<DesiredList> {
        let mail = group.first("mail").filter(|m| !m.is_empty())?;
        let delivery = match self.list_delivery {
            ListDelivery::Filter => {
                let account = group
                    .first("sAMAccountName")
                    .unwrap_or(local_part_of(mail));
                ListRepresentation::Filter {
                    mailbox: mailbox_record(mail, "U", Some("1"), &format!("{account} (list)")),
                    filter: filter_record(mail, members),
                }
            }
            ListDelivery::Alias => {
                if members.is_empty() {
                    warn!(list = %mail, "alias list has no members; skipping");
                    return None;
                }
                ListRepresentation::Alias {
                    alias: alias_record(mail, &members.join(",")),
                }
            }
        };

        Some(DesiredList {
            mail: mail.to_owned(),
            domain: domain_of(mail).to_owned(),
            delivery,
        })
    }
}

/// Everything one directory user maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredUser {
    pub mail: String,
    pub domain: String,
    pub mailbox: Record,
    /// `(address, record)` per proxy address.
    pub aliases: Vec<(String, Record)>,
}

/// Everything one mailing-list group maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredList {
    pub mail: String,
    pub domain: String,
    pub delivery: ListRepresentation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListRepresentation {
    /// A list mailbox whose prefilter redirects copies to every member.
    Filter { mailbox: Record, filter: Record },
    /// A plain alias fanning out to every member.
    Alias { alias: Record },
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

fn mailbox_record(mail: &str, status: &str, quota: Option<&str>, name: &str) -> Record {
    let password = random_password();
    let active = if INACTIVE_STATUSES.contains(&status) { 0 } else { 1 };

    let mut record = Record::new();
    record.insert("domain".into(), Value::from(domain_of(mail)));
    record.insert("local_part".into(), Value::from(local_part_of(mail)));
    record.insert("active".into(), Value::from(active));
    if let Some(quota) = quota {
        record.insert("quota".into(), numeric_or_text(quota));
    }
    record.insert("password".into(), Value::from(password.clone()));
    record.insert("password2".into(), Value::from(password));
    record.insert("name".into(), Value::from(name));
    record
}

fn alias_record(address: &str, goto: &str) -> Record {
    let mut record = Record::new();
    record.insert("address".into(), Value::from(address));
    record.insert("goto".into(), Value::from(goto));
    record.insert("active".into(), Value::from(1));
    record.insert("sogo_visible".into(), Value::from(1));
    record
}

fn filter_record(list: &str, members: &[String]) -> Record {
    let mut record = Record::new();
    record.insert("active".into(), Value::from(1));
    record.insert("username".into(), Value::from(list));
    record.insert("filter_type".into(), Value::from("prefilter"));
    record.insert("script_data".into(), Value::from(list_filter_script(members)));
    record.insert(
        "script_desc".into(),
        Value::from(format!("Auto-generated mailinglist filter for {list}")),
    );
    record
}

/// Sieve script that sends a copy to every member and drops the original.
pub fn list_filter_script(members: &[String]) -> String {
    let mut script = String::from("### Auto-generated mailinglist filter by linuxmuster ###\r\n\r\n");
    script.push_str("require \"copy\";\r\n\r\n");
    for member in members {
        script.push_str(&format!("redirect :copy \"{member}\";\r\n"));
    }
    script.push_str("\r\ndiscard;stop;");
    script
}

/// 20 random ASCII letters and digits.
pub fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

fn numeric_or_text(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

/// Exchange-style proxy addresses may carry an `smtp:` / `SMTP:` prefix.
fn strip_smtp_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("smtp:") => &trimmed[5..],
        _ => trimmed,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
