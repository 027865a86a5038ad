//! Shared `ureq` agent construction.

use std::sync::Arc;
use std::time::Duration;

use ureq::{Agent, AgentBuilder};

use crate::error::HttpError;

/// Build an agent with the given timeout. With `verify_tls` off, self-signed
/// certificates and mismatched host names are accepted.
pub fn build_agent(verify_tls: bool, timeout: Duration) -> Result<Agent, HttpError> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!verify_tls)
        .danger_accept_invalid_hostnames(!verify_tls)
        .build()?;
    Ok(AgentBuilder::new()
        .timeout(timeout)
        .tls_connector(Arc::new(tls))
        .build())
}

/// Outcome of a request whose body we want regardless of status.
pub(crate) struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Run a request, turning ureq's status errors back into a [`Reply`].
///
/// `Err` carries a transport-level message only.
pub(crate) fn send(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<Reply, String> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => return Err(transport.to_string()),
    };
    let status = response.status();
    let text = response.into_string().map_err(|e| e.to_string())?;
    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };
    Ok(Reply { status, body })
}
