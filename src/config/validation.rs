//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the listener bind address and metrics address
//! - Warn about credential and route shape problems that are survivable
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig -> Result<(), Vec<ValidationError>>
//! - Per-rule problems (bad pattern, missing target) are NOT fatal here:
//!   the route table build logs and excludes those rules, so a config with
//!   one broken rule still serves the rest

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid listener bind address '{0}'")]
    BindAddress(String),
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
    #[error("identity header name is empty")]
    EmptyIdentityHeader,
    #[error("duplicate route name '{0}'")]
    DuplicateRouteName(String),
}

/// Validate cross-cutting config invariants.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.identity_header.name.trim().is_empty() {
        errors.push(ValidationError::EmptyIdentityHeader);
    }

    let mut seen = std::collections::HashSet::new();
    for rule in &config.routes {
        if !seen.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateRouteName(rule.name.clone()));
        }
    }

    if config.bolt_auth.credentials.is_empty() {
        // Injection still runs, but with an empty secret; survivable, loud.
        tracing::warn!("bolt credential substitution is configured without a credential value");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteKind, RouteRule};

    fn rule(name: &str) -> RouteRule {
        RouteRule {
            name: name.to_string(),
            pattern: "/x/(.*)".to_string(),
            kind: RouteKind::Proxy,
            target: Some("http://localhost:1".to_string()),
            redirect_to: None,
            file: None,
            rewrite_base: false,
            header_rules: Vec::new(),
            conditional_returns: Vec::new(),
            subpath_returns: Vec::new(),
            policy: None,
            connector: None,
            soft_error: Default::default(),
            hide_if_no_access: false,
            params: None,
            websocket: None,
        }
    }

    #[test]
    fn accepts_default_config() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::BindAddress(_)));
    }

    #[test]
    fn rejects_duplicate_route_names() {
        let mut config = ProxyConfig::default();
        config.routes = vec![rule("a"), rule("a")];
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::DuplicateRouteName(_)));
    }
}
