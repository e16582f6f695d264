//! User directory connector interface and built-in connectors.
//!
//! # Responsibilities
//! - Resolve a client common name into a user record with auth attributes
//! - Provide the built-in connectors resolved by name at startup
//!
//! # Design Decisions
//! - Async trait: real directories sit behind LDAP/HTTP
//! - A connector failure is survivable; the caller logs it and proceeds as
//!   an anonymous request (the policy still fails closed)

use async_trait::async_trait;

use crate::plugins::PluginError;

/// A resolved user record.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub common_name: String,
    pub auth_attributes: Option<String>,
}

impl User {
    /// A record carrying only the common name, for callers the directory
    /// does not know.
    pub fn unresolved(common_name: &str) -> Self {
        Self {
            id: None,
            name: None,
            role: None,
            common_name: common_name.to_string(),
            auth_attributes: None,
        }
    }
}

/// Directory lookup seam: CN + protected path -> user record.
#[async_trait]
pub trait UserConnector: Send + Sync {
    async fn lookup(&self, common_name: &str, path: &str) -> Result<Option<User>, PluginError>;
}

/// Static directory returning an Admin-role record for any common name.
pub struct SimpleConnector;

#[async_trait]
impl UserConnector for SimpleConnector {
    async fn lookup(&self, common_name: &str, _path: &str) -> Result<Option<User>, PluginError> {
        let role = "Admin".to_string();
        Ok(Some(User {
            id: Some("123".to_string()),
            name: Some("Simple John Doe".to_string()),
            auth_attributes: Some(role.clone()),
            role: Some(role),
            common_name: common_name.to_string(),
        }))
    }
}

/// Directory that knows nobody.
pub struct MockConnector;

#[async_trait]
impl UserConnector for MockConnector {
    async fn lookup(&self, _common_name: &str, _path: &str) -> Result<Option<User>, PluginError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_connector_enriches_with_role_attributes() {
        let user = SimpleConnector
            .lookup("cn=alice", "/analytics")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.common_name, "cn=alice");
        assert_eq!(user.auth_attributes.as_deref(), Some("Admin"));
    }

    #[tokio::test]
    async fn mock_connector_knows_nobody() {
        assert_eq!(MockConnector.lookup("cn=alice", "/x").await.unwrap(), None);
    }
}
