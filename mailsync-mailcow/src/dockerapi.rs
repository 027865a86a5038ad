//! Client for mailcow's docker-api sidecar.
//!
//! Containers are identified by their `com.docker.compose.service` label,
//! e.g. `sogo-mailcow`.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};
use ureq::Agent;

use mailsync_core::config::MailcowSettings;

use crate::error::{DockerError, HttpError};
use crate::http::{build_agent, send};

const SERVICE_LABEL: &str = "com.docker.compose.service";

/// State flags as reported by the docker engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Running", default)]
    pub running: bool,
    #[serde(rename = "Paused", default)]
    pub paused: bool,
    #[serde(rename = "Dead", default)]
    pub dead: bool,
    #[serde(rename = "Restarting", default)]
    pub restarting: bool,
    #[serde(rename = "Status", default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Config", default)]
    config: ContainerConfig,
    #[serde(rename = "State", default)]
    state: ContainerState,
}

/// A container that belongs to a compose service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub service: String,
    pub state: ContainerState,
}

/// What [`DockerApi::restart_container`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    Restarted,
    Started,
    AlreadyRestarting,
}

impl RestartAction {
    /// Pick the call for a container state; `None` when not restartable.
    pub fn for_state(state: &ContainerState) -> Option<RestartAction> {
        if state.restarting {
            Some(RestartAction::AlreadyRestarting)
        } else if state.running {
            Some(RestartAction::Restarted)
        } else if state.paused || state.dead {
            Some(RestartAction::Started)
        } else {
            None
        }
    }
}

pub struct DockerApi {
    agent: Agent,
    base_uri: String,
}

impl DockerApi {
    pub fn new(uri: &str, verify_tls: bool, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            agent: build_agent(verify_tls, timeout)?,
            base_uri: uri.trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_settings(settings: &MailcowSettings) -> Result<Self, HttpError> {
        Self::new(&settings.dockerapi_uri, settings.verify_tls, settings.timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/containers/{path}", self.base_uri)
    }

    /// Every container that carries a compose service label.
    pub fn containers(&self) -> Result<Vec<Container>, DockerError> {
        let url = self.url("json");
        let reply = send(self.agent.get(&url).call()).map_err(|message| DockerError::Request {
            url: url.clone(),
            message,
        })?;
        if reply.status != 200 {
            return Err(DockerError::Request {
                url,
                message: format!("HTTP {}", reply.status),
            });
        }
        parse_containers(reply.body).map_err(|message| DockerError::Malformed { url, message })
    }

    pub fn find(&self, service: &str) -> Result<Container, DockerError> {
        self.containers()?
            .into_iter()
            .find(|c| c.service == service)
            .ok_or_else(|| DockerError::NotFound(service.to_owned()))
    }

    /// Whether every named service has a running container.
    pub fn all_running(&self, services: &[&str]) -> Result<bool, DockerError> {
        let containers = self.containers()?;
        Ok(services_running(&containers, services))
    }

    /// Block until every named service is running, polling every
    /// `poll_interval`. Request failures are logged and retried.
    ///
    /// `should_stop` is checked between polls.
    pub fn wait_for_containers(
        &self,
        services: &[&str],
        poll_interval: Duration,
        should_stop: impl Fn() -> bool,
    ) -> Result<(), DockerError> {
        info!("waiting for containers to be fully running:");
        for service in services {
            info!("    * {service}");
        }
        loop {
            if should_stop() {
                return Err(DockerError::Cancelled);
            }
            match self.all_running(services) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "docker api not ready"),
            }
            thread::sleep(poll_interval);
        }
        info!("all containers running");
        Ok(())
    }

    /// Restart a service's container: running ones are restarted, paused or
    /// dead ones started, restarting ones left alone.
    pub fn restart_container(&self, service: &str) -> Result<RestartAction, DockerError> {
        info!(service, "restarting container");
        let container = self.find(service)?;
        let action = RestartAction::for_state(&container.state).ok_or_else(|| {
            DockerError::NotRestartable {
                service: service.to_owned(),
                state: if container.state.status.is_empty() {
                    "stopped".to_owned()
                } else {
                    container.state.status.clone()
                },
            }
        })?;

        let verb = match action {
            RestartAction::AlreadyRestarting => {
                info!(service, "already restarting");
                return Ok(action);
            }
            RestartAction::Restarted => "restart",
            RestartAction::Started => "start",
        };
        let url = self.url(&format!("{}/{verb}", container.id));
        let reply = send(self.agent.post(&url).call()).map_err(|message| DockerError::Request {
            url: url.clone(),
            message,
        })?;
        if reply.status != 200 {
            return Err(DockerError::Request {
                url,
                message: format!("HTTP {}", reply.status),
            });
        }
        Ok(action)
    }
}

/// Parse the `containers/json` map (id → container details).
pub fn parse_containers(body: serde_json::Value) -> Result<Vec<Container>, String> {
    let raw: BTreeMap<String, RawContainer> =
        serde_json::from_value(body).map_err(|e| e.to_string())?;
    Ok(raw
        .into_values()
        .filter_map(|c| {
            let service = c.config.labels.as_ref()?.get(SERVICE_LABEL)?.clone();
            Some(Container {
                id: c.id,
                service,
                state: c.state,
            })
        })
        .collect())
}

/// Every service present with `running == true`.
pub fn services_running(containers: &[Container], services: &[&str]) -> bool {
    services.iter().all(|service| {
        containers
            .iter()
            .any(|c| c.service == *service && c.state.running)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn body() -> serde_json::Value {
        json!({
            "abc": {
                "Id": "abc",
                "Config": {"Labels": {"com.docker.compose.service": "sogo-mailcow"}},
                "State": {"Running": true, "Paused": false, "Dead": false, "Restarting": false, "Status": "running"}
            },
            "def": {
                "Id": "def",
                "Config": {"Labels": {"com.docker.compose.service": "dovecot-mailcow"}},
                "State": {"Running": false, "Paused": false, "Dead": true, "Restarting": false, "Status": "dead"}
            },
            "ghi": {
                "Id": "ghi",
                "Config": {"Labels": null},
                "State": {"Running": true}
            }
        })
    }

    #[test]
    fn containers_are_keyed_by_service_label() {
        let containers = parse_containers(body()).expect("parse");
        assert_eq!(containers.len(), 2);
        let sogo = containers.iter().find(|c| c.service == "sogo-mailcow").expect("sogo");
        assert_eq!(sogo.id, "abc");
        assert!(sogo.state.running);
    }

    #[test]
    fn all_services_must_be_running() {
        let containers = parse_containers(body()).expect("parse");
        assert!(services_running(&containers, &["sogo-mailcow"]));
        assert!(!services_running(&containers, &["sogo-mailcow", "dovecot-mailcow"]));
        assert!(!services_running(&containers, &["nginx-mailcow"]));
    }

    #[rstest]
    #[case(ContainerState { running: true, ..Default::default() }, Some(RestartAction::Restarted))]
    #[case(ContainerState { paused: true, ..Default::default() }, Some(RestartAction::Started))]
    #[case(ContainerState { dead: true, ..Default::default() }, Some(RestartAction::Started))]
    #[case(ContainerState { running: true, restarting: true, ..Default::default() }, Some(RestartAction::AlreadyRestarting))]
    #[case(ContainerState::default(), None)]
    fn restart_action_follows_state(
        #[case] state: ContainerState,
        #[case] expected: Option<RestartAction>,
    ) {
        assert_eq!(RestartAction::for_state(&state), expected);
    }

    #[test]
    fn non_map_body_is_malformed() {
        assert!(parse_containers(json!([1, 2, 3])).is_err());
    }
}
