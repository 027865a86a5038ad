//! mailcow REST client: snapshot loader and mutation gateway.
//!
//! Reads go to `api/v1/get/<kind>/all`; writes go to `api/v1/add|edit|delete/<kind>`.
//! Every write answers with `{"type": ..., "msg": ...}` (or a list of those),
//! and anything but `type == "success"` is a rejection.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};
use ureq::Agent;

use mailsync_core::config::MailcowSettings;
use mailsync_core::{
    EntityKind, FetchError, MutationAction, MutationError, MutationGateway, Record,
    RemoteStateLoader, UpdateEntry,
};

use crate::error::HttpError;
use crate::http::{build_agent, send, Reply};

/// Talks to one mailcow instance with one API key.
pub struct MailcowClient {
    agent: Agent,
    base_uri: String,
    api_key: String,
    error_messages: BTreeMap<String, String>,
}

impl MailcowClient {
    pub fn new(settings: &MailcowSettings) -> Result<Self, HttpError> {
        Ok(Self {
            agent: build_agent(settings.verify_tls, settings.timeout())?,
            base_uri: settings.api_uri.trim_end_matches('/').to_owned(),
            api_key: settings.api_key.clone(),
            error_messages: settings.error_messages.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_uri)
    }

    fn get(&self, path: &str) -> Result<Reply, String> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        send(
            self.agent
                .get(&url)
                .set("X-API-Key", &self.api_key)
                .set("Accept", "application/json")
                .call(),
        )
    }

    fn post(&self, path: &str, body: &Value) -> Result<Reply, String> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        send(
            self.agent
                .post(&url)
                .set("X-API-Key", &self.api_key)
                .set("Accept", "application/json")
                .send_json(body),
        )
    }

    fn mutate(
        &self,
        kind: EntityKind,
        action: MutationAction,
        key: &str,
        body: &Value,
    ) -> Result<(), MutationError> {
        let verb = match action {
            MutationAction::Create => "add",
            MutationAction::Update => "edit",
            MutationAction::Delete => "delete",
        };
        let path = format!("{verb}/{}", kind.write_path());
        let reply = self.post(&path, body).map_err(|message| MutationError {
            kind,
            action,
            key: key.to_owned(),
            message,
        })?;
        interpret_response(&reply.body, &self.base_uri)
            .map_err(|message| MutationError {
                kind,
                action,
                key: key.to_owned(),
                message: rewrite_message(&message, &self.error_messages),
            })
    }
}

impl RemoteStateLoader for MailcowClient {
    fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Record>, FetchError> {
        info!("    * loading current {} from mailcow", kind.plural());
        let reply = self
            .get(&format!("get/{}/all", kind.read_path()))
            .map_err(|message| FetchError {
                kind,
                status: None,
                message,
            })?;
        parse_snapshot(kind, reply.status, reply.body, &self.base_uri)
    }
}

impl MutationGateway for MailcowClient {
    fn create(&self, kind: EntityKind, record: &Record) -> Result<(), MutationError> {
        let key = record_label(kind, record);
        debug!(kind = %kind, key = %key, "adding");
        self.mutate(kind, MutationAction::Create, &key, &Value::Object(record.clone()))
    }

    fn update(&self, kind: EntityKind, entry: &UpdateEntry) -> Result<(), MutationError> {
        let key = ids_label(&entry.items);
        debug!(kind = %kind, key = %key, "updating");
        let body = serde_json::json!({ "attr": entry.attr, "items": entry.items });
        self.mutate(kind, MutationAction::Update, &key, &body)
    }

    fn delete(&self, kind: EntityKind, ids: &[Value]) -> Result<(), MutationError> {
        if ids.is_empty() {
            return Ok(());
        }
        let key = ids_label(ids);
        info!("    * killing {} {}", ids.len(), kind.plural());
        self.mutate(kind, MutationAction::Delete, &key, &Value::Array(ids.to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Payload interpretation
// ---------------------------------------------------------------------------

/// Turn a `get/<kind>/all` reply into records.
///
/// An empty object means "no records"; a non-200 status, a non-list payload
/// or a list holding non-objects is an error.
pub fn parse_snapshot(
    kind: EntityKind,
    status: u16,
    body: Value,
    host: &str,
) -> Result<Vec<Record>, FetchError> {
    let fail = |message: String| FetchError {
        kind,
        status: Some(status),
        message,
    };

    if status != 200 {
        let message = match &body {
            Value::Object(map) if map.contains_key("type") && map.contains_key("msg") => {
                message_text(&map["msg"])
            }
            _ => malformed(host),
        };
        return Err(fail(message));
    }

    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(fail(format!("expected an object per {kind}, got {other}"))),
            })
            .collect(),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(map) if map.contains_key("type") && map.contains_key("msg") => {
            Err(fail(message_text(&map["msg"])))
        }
        _ => Err(fail(malformed(host))),
    }
}

/// Check a write reply; `Err` carries the server's message.
pub fn interpret_response(body: &Value, host: &str) -> Result<(), String> {
    let reply = match body {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    let Some(Value::Object(map)) = reply else {
        return Err(malformed(host));
    };
    match (map.get("type"), map.get("msg")) {
        (Some(kind), Some(_)) if kind.as_str() == Some("success") => Ok(()),
        (Some(_), Some(msg)) => Err(message_text(msg)),
        _ => Err(malformed(host)),
    }
}

/// Replace a server message by its friendly version, looked up by the first
/// element when the message is a list code such as
/// `["mailbox_quota_left_exceeded", "1024"]`.
pub fn rewrite_message(message: &str, overrides: &BTreeMap<String, String>) -> String {
    let code = serde_json::from_str::<Value>(message)
        .ok()
        .and_then(|v| match v {
            Value::Array(items) => items.first().and_then(|f| f.as_str().map(str::to_owned)),
            _ => None,
        })
        .unwrap_or_else(|| message.to_owned());
    overrides
        .get(&code)
        .cloned()
        .unwrap_or_else(|| message.to_owned())
}

fn message_text(msg: &Value) -> String {
    match msg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn malformed(host: &str) -> String {
    format!("got malformed response; is {host} a mailcow server?")
}

/// Human-readable name of a record in write shape.
pub fn record_label(kind: EntityKind, record: &Record) -> String {
    let field = match kind {
        EntityKind::Domain => "domain",
        EntityKind::Mailbox => "local_part",
        EntityKind::Alias => "address",
        EntityKind::Filter => "username",
    };
    let base = record
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_owned();
    match (kind, record.get("domain").and_then(Value::as_str)) {
        (EntityKind::Mailbox, Some(domain)) => format!("{base}@{domain}"),
        _ => base,
    }
}

fn ids_label(ids: &[Value]) -> String {
    ids.iter()
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
