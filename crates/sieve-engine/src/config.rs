use std::env;
use std::fmt;

use sieve_contracts::events::EventWriter;
use thiserror::Error;

use crate::policy::{Destination, NetworkPolicyError, PolicyConfig};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const OVERRIDE_KEYS: &[&str] = &["SIEVE_ALLOW_NONLOCAL_BENCHMARK", "ALLOW_NONLOCAL_BENCHMARK"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error(transparent)]
    Policy(#[from] NetworkPolicyError),
}

/// Process configuration, read once at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub benchmark_url: Option<String>,
    pub benchmark_http_url: Option<String>,
    pub browser_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub allow_nonlocal_benchmark: bool,
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("benchmark_url", &self.benchmark_url)
            .field("benchmark_http_url", &self.benchmark_http_url)
            .field("browser_url", &self.browser_url)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("openai_api_base", &self.openai_api_base)
            .field("allow_nonlocal_benchmark", &self.allow_nonlocal_benchmark)
            .finish()
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let benchmark_url = read("BENCHMARK_URL");
        Self {
            benchmark_http_url: read("BENCHMARK_HTTP_URL").or_else(|| benchmark_url.clone()),
            benchmark_url,
            browser_url: read("BROWSER_URL"),
            openai_api_key: read("OPENAI_API_KEY"),
            openai_api_base: read("OPENAI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            allow_nonlocal_benchmark: OVERRIDE_KEYS
                .iter()
                .filter_map(|key| read(*key))
                .any(|value| is_truthy(&value)),
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::with_override(self.allow_nonlocal_benchmark)
    }

    /// Runs the network guard over every configured benchmark destination.
    pub fn validate(&self, events: Option<&EventWriter>) -> Result<Vec<Destination>, ConfigError> {
        let policy = self.policy();
        let mut checked = Vec::new();
        let destinations = [
            ("BENCHMARK_URL", &self.benchmark_url),
            ("BENCHMARK_HTTP_URL", &self.benchmark_http_url),
        ];
        for (name, url) in destinations {
            if let Some(url) = url {
                checked.push(policy.check(name, url, events)?);
            }
        }
        Ok(checked)
    }

    pub fn require(&self, browser: bool, benchmark: bool, openai: bool) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if browser && self.browser_url.is_none() {
            missing.push("BROWSER_URL");
        }
        if benchmark && self.benchmark_url.is_none() {
            missing.push("BENCHMARK_URL");
        }
        if openai && self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::policy::PolicyDecision;

    fn config(pairs: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn http_url_defaults_to_benchmark_url() {
        let cfg = config(&[("BENCHMARK_URL", "http://localhost:8000/"), ("OPENAI_API_BASE", "http://proxy/v1/")]);
        assert_eq!(cfg.benchmark_http_url.as_deref(), Some("http://localhost:8000/"));
        assert_eq!(cfg.openai_api_base, "http://proxy/v1");
        assert!(!cfg.allow_nonlocal_benchmark);
        assert_eq!(cfg.validate(None).unwrap().len(), 2);
    }

    #[test]
    fn override_flag_accepts_aliases_case_insensitively() {
        for (key, value) in [
            ("SIEVE_ALLOW_NONLOCAL_BENCHMARK", "TRUE"),
            ("ALLOW_NONLOCAL_BENCHMARK", "yes"),
            ("SIEVE_ALLOW_NONLOCAL_BENCHMARK", "1"),
        ] {
            assert!(config(&[(key, value)]).allow_nonlocal_benchmark, "{key}={value}");
        }
        assert!(!config(&[("ALLOW_NONLOCAL_BENCHMARK", "0")]).allow_nonlocal_benchmark);
    }

    #[test]
    fn remote_benchmark_fails_validation_unless_overridden() {
        let remote = config(&[("BENCHMARK_URL", "https://evil.example.com")]);
        assert!(matches!(
            remote.validate(None),
            Err(ConfigError::Policy(NetworkPolicyError::HostNotAllowed { .. }))
        ));

        let allowed = config(&[
            ("BENCHMARK_URL", "https://evil.example.com"),
            ("BENCHMARK_HTTP_URL", "http://127.0.0.1:9000"),
            ("SIEVE_ALLOW_NONLOCAL_BENCHMARK", "1"),
        ]);
        let checked = allowed.validate(None).unwrap();
        assert_eq!(checked[0].decision, PolicyDecision::Override);
        assert_eq!(checked[1].decision, PolicyDecision::Local);
    }

    #[test]
    fn require_lists_every_missing_variable() {
        let cfg = config(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(
            cfg.require(true, true, true),
            Err(ConfigError::Missing(vec!["BROWSER_URL", "BENCHMARK_URL"]))
        );
        assert!(cfg.require(false, false, true).is_ok());
        assert!(!format!("{cfg:?}").contains("sk-test"));
    }
}
