//! HTTP health probes.
//!
//! One probe type covers both services and both transport modes (plain
//! HTTP, or HTTPS with relaxed verification for self-signed material).
//! A probe never fails hard: anything short of a parseable healthy answer
//! is "not yet healthy".

use crate::error::{DeckhandError, DeckhandResult};
use crate::spec::{Credentials, ServiceKind};
use serde_json::Value;
use std::time::Duration;

/// Outcome-shaping side of a probe: how the JSON body is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthRule {
    /// Engine: top-level `status` must be green or yellow.
    ClusterStatus,
    /// Dashboard: `status.overall.state` must be green.
    OverallState,
}

/// Something the supervisor can poll. Production probes speak HTTP; tests
/// substitute scripted stubs.
pub trait ReadinessProbe {
    /// `Some(true)` means explicitly healthy. `Some(false)` means
    /// reachable but not healthy yet. `None` covers unreachable, non-JSON,
    /// and non-2xx; still "not yet healthy", never fatal.
    fn check(&self) -> Option<bool>;
}

pub struct HealthProbe {
    url: String,
    rule: HealthRule,
    credentials: Option<Credentials>,
    client: reqwest::blocking::Client,
}

impl HealthProbe {
    pub fn new(
        url: impl Into<String>,
        rule: HealthRule,
        credentials: Option<Credentials>,
        insecure: bool,
    ) -> DeckhandResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DeckhandError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            rule,
            credentials,
            client,
        })
    }

    /// Probe for a service's status endpoint.
    pub fn for_service(
        kind: ServiceKind,
        scheme: &str,
        host: &str,
        port: u16,
        credentials: Option<Credentials>,
    ) -> DeckhandResult<Self> {
        let (path, rule) = match kind {
            ServiceKind::Engine => ("/_cluster/health", HealthRule::ClusterStatus),
            ServiceKind::Dashboard => ("/api/status", HealthRule::OverallState),
        };
        let url = format!("{}://{}:{}{}", scheme, host, port, path);
        // Local clusters run on self-signed material; verification is
        // relaxed whenever TLS is in play.
        let insecure = scheme == "https";
        Self::new(url, rule, credentials, insecure)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Judge a status body against a rule. `None` when the expected field
    /// is absent entirely.
    pub fn evaluate(rule: HealthRule, body: &Value) -> Option<bool> {
        match rule {
            HealthRule::ClusterStatus => body
                .get("status")
                .and_then(Value::as_str)
                .map(|s| matches!(s, "green" | "yellow")),
            HealthRule::OverallState => body
                .pointer("/status/overall/state")
                .and_then(Value::as_str)
                .map(|s| s == "green"),
        }
    }
}

impl ReadinessProbe for HealthProbe {
    fn check(&self) -> Option<bool> {
        let mut request = self.client.get(&self.url);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = match request.send() {
            Ok(r) => r,
            Err(e) => {
                tracing::trace!("probe {} unreachable: {}", self.url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::trace!("probe {} returned {}", self.url, response.status());
            return None;
        }
        let body: Value = match response.json() {
            Ok(b) => b,
            Err(_) => return None,
        };
        Self::evaluate(self.rule, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cluster_status_accepts_green_and_yellow() {
        for state in ["green", "yellow"] {
            let body = json!({ "status": state, "number_of_nodes": 1 });
            assert_eq!(
                HealthProbe::evaluate(HealthRule::ClusterStatus, &body),
                Some(true)
            );
        }
    }

    #[test]
    fn cluster_status_rejects_red() {
        let body = json!({ "status": "red" });
        assert_eq!(
            HealthProbe::evaluate(HealthRule::ClusterStatus, &body),
            Some(false)
        );
    }

    #[test]
    fn overall_state_requires_green_exactly() {
        let green = json!({ "status": { "overall": { "state": "green" } } });
        assert_eq!(
            HealthProbe::evaluate(HealthRule::OverallState, &green),
            Some(true)
        );

        // Yellow is reachable-but-not-healthy for the dashboard.
        let yellow = json!({ "status": { "overall": { "state": "yellow" } } });
        assert_eq!(
            HealthProbe::evaluate(HealthRule::OverallState, &yellow),
            Some(false)
        );
    }

    #[test]
    fn missing_fields_are_unknown_not_unhealthy() {
        let body = json!({ "name": "node-1" });
        assert_eq!(HealthProbe::evaluate(HealthRule::ClusterStatus, &body), None);
        assert_eq!(HealthProbe::evaluate(HealthRule::OverallState, &body), None);
    }

    #[test]
    fn service_probe_urls_follow_the_wire_contract() {
        let engine =
            HealthProbe::for_service(ServiceKind::Engine, "https", "127.0.0.1", 9200, None)
                .unwrap();
        assert_eq!(engine.url(), "https://127.0.0.1:9200/_cluster/health");

        let dashboard =
            HealthProbe::for_service(ServiceKind::Dashboard, "http", "127.0.0.1", 5601, None)
                .unwrap();
        assert_eq!(dashboard.url(), "http://127.0.0.1:5601/api/status");
    }
}
