//! Plugin registry: policies and connectors resolved by name.
//!
//! # Data Flow
//! ```text
//! startup
//!     → PluginRegistry::builtin() (name → implementation map)
//!     → shared via Arc with the HTTP and WebSocket engines
//!
//! per request/session
//!     → registry.lookup(connector, cn, path)   — failure ⇒ no user, logged
//!     → registry.evaluate(policy, attrs, path) — failure ⇒ deny, logged
//! ```
//!
//! # Design Decisions
//! - Fixed interfaces resolved through a startup-built map, not runtime
//!   dynamic loading; a missing name is a logged fail-closed condition
//! - The registry is the only place plugin errors are absorbed; nothing
//!   past this boundary sees them

pub mod connector;
pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

pub use connector::{MockConnector, SimpleConnector, User, UserConnector};
pub use policy::{MockAlwaysAllow, MockAlwaysDeny, PolicyEngine, SimpleRoleAdmin};

/// Error surfaced by a plugin implementation.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),
}

/// Startup-built map of plugin names to implementations.
pub struct PluginRegistry {
    policies: HashMap<String, Arc<dyn PolicyEngine>>,
    connectors: HashMap<String, Arc<dyn UserConnector>>,
}

impl PluginRegistry {
    /// Registry with the built-in policies and connectors.
    pub fn builtin() -> Self {
        let mut registry = Self {
            policies: HashMap::new(),
            connectors: HashMap::new(),
        };
        registry.register_policy("simple-role-admin", Arc::new(SimpleRoleAdmin));
        registry.register_policy("mock-always-allow", Arc::new(MockAlwaysAllow));
        registry.register_policy("mock-always-deny", Arc::new(MockAlwaysDeny));
        registry.register_connector("simple", Arc::new(SimpleConnector));
        registry.register_connector("mock", Arc::new(MockConnector));
        registry
    }

    pub fn register_policy(&mut self, name: &str, policy: Arc<dyn PolicyEngine>) {
        self.policies.insert(name.to_string(), policy);
    }

    pub fn register_connector(&mut self, name: &str, connector: Arc<dyn UserConnector>) {
        self.connectors.insert(name.to_string(), connector);
    }

    /// Evaluate a named policy, failing closed.
    ///
    /// A missing policy or an evaluation error resolves to deny; both are
    /// logged and neither propagates.
    pub fn evaluate(&self, policy_name: &str, auth_attributes: &str, path: &str) -> bool {
        let Some(policy) = self.policies.get(policy_name) else {
            tracing::warn!(
                policy = policy_name,
                path,
                available = ?self.policies.keys().collect::<Vec<_>>(),
                "Policy not found; denying"
            );
            return false;
        };
        match policy.evaluate(auth_attributes, path) {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::error!(policy = policy_name, path, error = %err, "Policy evaluation failed; denying");
                false
            }
        }
    }

    /// Look up a user through a named connector.
    ///
    /// A missing connector or a lookup error resolves to `None`; both are
    /// logged and neither aborts the pipeline.
    pub async fn lookup(&self, connector_name: &str, common_name: &str, path: &str) -> Option<User> {
        let Some(connector) = self.connectors.get(connector_name) else {
            tracing::warn!(connector = connector_name, path, "Connector not found; treating as no user");
            return None;
        };
        match connector.lookup(common_name, path).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(
                    connector = connector_name,
                    common_name,
                    path,
                    error = %err,
                    "User lookup failed; treating as no user"
                );
                None
            }
        }
    }
}
