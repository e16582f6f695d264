//! Policy engine interface and built-in policies.
//!
//! # Responsibilities
//! - Define the policy evaluation seam: attributes + path -> allow/deny
//! - Provide the built-in policies resolved by name at startup
//!
//! # Design Decisions
//! - Evaluation is synchronous and side-effect free; anything slower belongs
//!   in the connector that produced the attributes
//! - An `Err` from a policy is indistinguishable from a deny at the caller:
//!   the registry fails closed

use crate::plugins::PluginError;

/// Access-control decision point.
pub trait PolicyEngine: Send + Sync {
    /// Evaluate the caller's auth attributes against a protected path.
    fn evaluate(&self, auth_attributes: &str, path: &str) -> Result<bool, PluginError>;
}

/// Allows callers whose attributes carry the Admin role.
pub struct SimpleRoleAdmin;

impl PolicyEngine for SimpleRoleAdmin {
    fn evaluate(&self, auth_attributes: &str, _path: &str) -> Result<bool, PluginError> {
        Ok(auth_attributes
            .split(',')
            .any(|attr| attr.trim() == "Admin"))
    }
}

/// Unconditional allow, for routes that are deliberately open.
pub struct MockAlwaysAllow;

impl PolicyEngine for MockAlwaysAllow {
    fn evaluate(&self, _auth_attributes: &str, _path: &str) -> Result<bool, PluginError> {
        Ok(true)
    }
}

/// Unconditional deny; the fail-closed default for unmatched paths.
pub struct MockAlwaysDeny;

impl PolicyEngine for MockAlwaysDeny {
    fn evaluate(&self, _auth_attributes: &str, _path: &str) -> Result<bool, PluginError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_role_admin_matches_admin_attribute() {
        let policy = SimpleRoleAdmin;
        assert!(policy.evaluate("Admin", "/graph").unwrap());
        assert!(policy.evaluate("Viewer, Admin", "/graph").unwrap());
        assert!(!policy.evaluate("Viewer", "/graph").unwrap());
        assert!(!policy.evaluate("", "/graph").unwrap());
    }

    #[test]
    fn mock_policies_are_constant() {
        assert!(MockAlwaysAllow.evaluate("", "/x").unwrap());
        assert!(!MockAlwaysDeny.evaluate("Admin", "/x").unwrap());
    }
}
