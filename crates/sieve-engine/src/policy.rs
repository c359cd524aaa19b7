use std::net::IpAddr;

use reqwest::Url;
use serde_json::json;
use sieve_contracts::events::EventWriter;
use thiserror::Error;

pub const DOCKER_GATEWAY_HOST: &str = "host.docker.internal";

/// Hosts reachable without the override.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0", DOCKER_GATEWAY_HOST];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub allowed_hosts: Vec<String>,
    /// Admits any host; every admission is logged.
    pub allow_nonlocal: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: DEFAULT_ALLOWED_HOSTS
                .iter()
                .map(|host| (*host).to_string())
                .collect(),
            allow_nonlocal: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Local,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub name: String,
    pub url: Url,
    pub host: String,
    pub decision: PolicyDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkPolicyError {
    #[error("{name}: '{url}' is not a valid URL: {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },
    #[error("{name}: scheme '{scheme}' is not allowed (http or https only)")]
    UnsupportedScheme { name: String, scheme: String },
    #[error("{name}: '{url}' has no host")]
    MissingHost { name: String, url: String },
    #[error(
        "{name}: host '{host}' is not local; set SIEVE_ALLOW_NONLOCAL_BENCHMARK=1 to allow it"
    )]
    HostNotAllowed { name: String, host: String },
}

impl PolicyConfig {
    pub fn with_override(allow_nonlocal: bool) -> Self {
        Self {
            allow_nonlocal,
            ..Self::default()
        }
    }

    pub fn is_local(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if self
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
        {
            return true;
        }
        host.parse::<IpAddr>()
            .map(|addr| addr.is_loopback())
            .unwrap_or(false)
    }

    /// Checks one configured destination before it is ever dialed.
    pub fn check(
        &self,
        name: &str,
        raw: &str,
        events: Option<&EventWriter>,
    ) -> Result<Destination, NetworkPolicyError> {
        let url = Url::parse(raw.trim()).map_err(|err| NetworkPolicyError::InvalidUrl {
            name: name.to_string(),
            url: raw.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetworkPolicyError::UnsupportedScheme {
                name: name.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| NetworkPolicyError::MissingHost {
                name: name.to_string(),
                url: raw.to_string(),
            })?
            .to_string();

        let decision = if self.is_local(&host) {
            PolicyDecision::Local
        } else if self.allow_nonlocal {
            match events {
                Some(events) => {
                    let _ = events.emit_json(
                        "network_policy_override",
                        json!({"destination": name, "host": host, "url": url.as_str()}),
                    );
                }
                None => eprintln!("{}", override_notice(name, &host)),
            }
            PolicyDecision::Override
        } else {
            return Err(NetworkPolicyError::HostNotAllowed {
                name: name.to_string(),
                host,
            });
        };
        Ok(Destination {
            name: name.to_string(),
            url,
            host,
            decision,
        })
    }
}

/// Stderr line for an override admitted without an event log.
fn override_notice(name: &str, host: &str) -> String {
    format!("warning: {name} points at non-local host '{host}'; admitted by network override")
}
