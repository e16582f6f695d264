//! Request-header rewrite rules.
//!
//! # Responsibilities
//! - Evaluate optional per-rule conditions against the request headers
//! - Apply create/update/patch/delete operations in declaration order
//!
//! # Design Decisions
//! - Rules mutate a snapshot of the request headers before forwarding;
//!   the client never observes the rewritten set
//! - Invalid patch patterns and unreadable header values skip the rule
//!   instead of failing the request

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

use crate::config::{HeaderCondition, HeaderRule};

/// Apply one route's header rules, in order, to the outgoing header set.
pub fn apply_header_rules(headers: &mut HeaderMap, rules: &[HeaderRule]) {
    for rule in rules {
        apply_rule(headers, rule);
    }
}

fn apply_rule(headers: &mut HeaderMap, rule: &HeaderRule) {
    match rule {
        HeaderRule::Create {
            header_name,
            value,
            when,
        } => {
            if !condition_holds(headers, when.as_ref()) {
                return;
            }
            let Some(name) = parse_name(header_name) else {
                return;
            };
            if headers.contains_key(&name) {
                return;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        HeaderRule::Update {
            header_name,
            value,
            when,
        } => {
            if !condition_holds(headers, when.as_ref()) {
                return;
            }
            let Some(name) = parse_name(header_name) else {
                return;
            };
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        HeaderRule::Patch {
            header_name,
            pattern,
            replacement,
            when,
        } => {
            if !condition_holds(headers, when.as_ref()) {
                return;
            }
            let Some(name) = parse_name(header_name) else {
                return;
            };
            let Some(current) = headers.get(&name).and_then(|v| v.to_str().ok()) else {
                return;
            };
            let Ok(regex) = Regex::new(pattern) else {
                tracing::warn!(header = %header_name, pattern = %pattern, "Invalid patch pattern, skipping rule");
                return;
            };
            let patched = regex.replace_all(current, replacement.as_str()).into_owned();
            if let Ok(value) = HeaderValue::from_str(&patched) {
                headers.insert(name, value);
            }
        }
        HeaderRule::Delete { header_name, when } => {
            if !condition_holds(headers, when.as_ref()) {
                return;
            }
            if let Some(name) = parse_name(header_name) {
                headers.remove(&name);
            }
        }
    }
}

fn parse_name(name: &str) -> Option<HeaderName> {
    match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => Some(name),
        Err(_) => {
            tracing::warn!(header = %name, "Invalid header name in rule, skipping");
            None
        }
    }
}

/// Evaluate a rule condition. A rule with no condition always applies.
/// Every clause present on the condition must hold.
pub fn condition_holds(headers: &HeaderMap, condition: Option<&HeaderCondition>) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    let value = headers
        .get(condition.header_name.as_str())
        .and_then(|v| v.to_str().ok());

    if let Some(exists) = condition.exists {
        if value.is_some() != exists {
            return false;
        }
    }
    if let Some(equals) = &condition.equals {
        if value != Some(equals.as_str()) {
            return false;
        }
    }
    if let Some(includes) = &condition.includes {
        match value {
            Some(v) if v.contains(includes.as_str()) => {}
            _ => return false,
        }
    }
    if let Some(pattern) = &condition.matches {
        let Ok(regex) = Regex::new(pattern) else {
            // An unparseable condition never matches.
            return false;
        };
        match value {
            Some(v) if regex.is_match(v) => {}
            _ => return false,
        }
    }
    true
}
