//! LDAP / Active Directory source of desired state.
//!
//! [`LdapDirectory`] binds lazily on the first query of a cycle and unbinds
//! when the cycle ends (or when it is dropped), so every cycle sees a fresh
//! connection. All failures surface as [`QueryError`]s naming the filter.

use std::collections::{BTreeMap, HashMap};

use ldap3::{LdapConn, LdapConnSettings, LdapError, Scope, SearchEntry};
use thiserror::Error;
use tracing::{debug, warn};

use mailsync_core::config::LdapSettings;
use mailsync_core::{DesiredStateSource, DirectoryEntry, QueryError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Low-level LDAP failures, flattened into a [`QueryError`] at the port.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("could not connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: LdapError,
    },

    #[error("bind as {bind_dn} failed: {source}")]
    Bind {
        bind_dn: String,
        #[source]
        source: LdapError,
    },

    #[error("search failed: {0}")]
    Search(#[source] LdapError),
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Desired-state source backed by an LDAP server.
pub struct LdapDirectory {
    settings: LdapSettings,
    conn: Option<LdapConn>,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings) -> Self {
        Self {
            settings,
            conn: None,
        }
    }

    /// Open and bind a connection now instead of on the first query.
    pub fn bind(&mut self) -> Result<(), DirectoryError> {
        self.connection().map(|_| ())
    }

    /// Drop the current connection, unbinding first.
    pub fn unbind(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.unbind() {
                warn!(error = %err, "LDAP unbind failed");
            } else {
                debug!("LDAP connection closed");
            }
        }
    }

    fn connection(&mut self) -> Result<&mut LdapConn, DirectoryError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.open()?,
        };
        Ok(self.conn.insert(conn))
    }

    fn open(&self) -> Result<LdapConn, DirectoryError> {
        let s = &self.settings;
        debug!(uri = %s.uri, "connecting to LDAP server");

        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(s.timeout())
            .set_no_tls_verify(!s.verify_tls);
        let mut conn =
            LdapConn::with_settings(conn_settings, &s.uri).map_err(|source| DirectoryError::Connect {
                uri: s.uri.clone(),
                source,
            })?;

        conn.simple_bind(&s.bind_dn, &s.bind_password)
            .and_then(|result| result.success())
            .map_err(|source| DirectoryError::Bind {
                bind_dn: s.bind_dn.clone(),
                source,
            })?;
        debug!(bind_dn = %s.bind_dn, "LDAP bind succeeded");
        Ok(conn)
    }

    fn search(&mut self, filter: &str, fields: &[&str]) -> Result<Vec<DirectoryEntry>, QueryError> {
        let base_dn = self.settings.base_dn.clone();
        let result = self
            .connection()
            .and_then(|conn| {
                conn.search(&base_dn, Scope::Subtree, filter, fields.to_vec())
                    .and_then(|r| r.success())
                    .map_err(DirectoryError::Search)
            });

        let (entries, _) = match result {
            Ok(found) => found,
            Err(err) => {
                // A broken connection must not be reused by the next query.
                self.unbind();
                return Err(QueryError::new(filter, err.to_string()));
            }
        };

        let normalized: Vec<DirectoryEntry> = entries
            .into_iter()
            .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
            .map(SearchEntry::construct)
            .map(|entry| normalize_entry(entry.dn, entry.attrs, fields))
            .collect();
        debug!(filter, count = normalized.len(), "LDAP search returned");
        Ok(normalized)
    }
}

impl DesiredStateSource for LdapDirectory {
    fn fetch_users(
        &mut self,
        filter: &str,
        fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.search(filter, fields)
    }

    fn fetch_groups(
        &mut self,
        filter: &str,
        fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.search(filter, fields)
    }

    fn fetch_group_members(
        &mut self,
        group_filter: &str,
        fields: &[&str],
    ) -> Result<Vec<DirectoryEntry>, QueryError> {
        self.search(group_filter, fields)
    }

    fn end_cycle(&mut self) {
        self.unbind();
    }
}

impl Drop for LdapDirectory {
    fn drop(&mut self) {
        self.unbind();
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Build a [`DirectoryEntry`] from a search result's text attributes.
///
/// Attribute names are matched case-insensitively against the requested
/// fields and stored under the requested spelling; empty values are dropped.
pub fn normalize_entry(
    dn: String,
    attrs: HashMap<String, Vec<String>>,
    requested: &[&str],
) -> DirectoryEntry {
    let mut attributes = BTreeMap::new();
    for (name, values) in attrs {
        let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            continue;
        }
        let key = requested
            .iter()
            .find(|field| field.eq_ignore_ascii_case(&name))
            .map(|field| (*field).to_owned())
            .unwrap_or(name);
        attributes.insert(key, values);
    }
    DirectoryEntry { dn, attributes }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
