//! Response body and header rewriting for proxied HTML.
//!
//! # Responsibilities
//! - Re-root HTML documents under the route prefix via a `<base>` tag
//! - Keep Content-Security-Policy `base-uri` directives consistent with
//!   the injected tag
//! - Rewrite absolute-URL `Location` headers so redirects stay behind
//!   the proxy
//!
//! # Design Decisions
//! - Rewrites are best-effort text transformations; a response that does
//!   not look like HTML or whose Location is not an absolute URL passes
//!   through untouched

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static BASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base\b[^>]*>").unwrap());
static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head([^>]*)>").unwrap());
static BASE_URI_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)base-uri[^;]*").unwrap());

/// Strip any existing `<base>` tag and inject one pointing at the route
/// prefix right after the opening `<head>`. A document without a `<head>`
/// element is returned unchanged.
pub fn rewrite_html_base(body: &str, prefix: &str) -> String {
    let stripped = BASE_TAG.replace_all(body, "");
    let href = format!("{}/", prefix.trim_end_matches('/'));
    let mut injected = false;
    let result = HEAD_OPEN.replace(&stripped, |caps: &regex::Captures<'_>| {
        injected = true;
        format!("<head{}><base href=\"{}\">", &caps[1], href)
    });
    if injected {
        result.into_owned()
    } else {
        stripped.into_owned()
    }
}

/// Align a Content-Security-Policy header with the injected base tag.
/// Replaces an existing `base-uri` directive or appends one.
pub fn patch_csp(policy: &str, prefix: &str) -> String {
    let directive = format!("base-uri 'self' {}/", prefix.trim_end_matches('/'));
    if BASE_URI_DIRECTIVE.is_match(policy) {
        BASE_URI_DIRECTIVE
            .replace(policy, directive.as_str())
            .into_owned()
    } else {
        let trimmed = policy.trim_end().trim_end_matches(';');
        if trimmed.is_empty() {
            directive
        } else {
            format!("{}; {}", trimmed, directive)
        }
    }
}

/// Rewrite an absolute-URL `Location` header so the redirect lands on the
/// proxied prefix. Relative locations and unparseable values are returned
/// as-is because the browser already resolves them under the prefix.
pub fn rewrite_location(location: &str, prefix: &str) -> String {
    let Ok(url) = Url::parse(location) else {
        return location.to_string();
    };
    if !url.has_host() {
        return location.to_string();
    }
    let mut rewritten = format!("{}{}", prefix, url.path());
    if let Some(query) = url.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_base_after_head() {
        let body = "<html><head><title>t</title></head><body></body></html>";
        let out = rewrite_html_base(body, "/analytics");
        assert_eq!(
            out,
            "<html><head><base href=\"/analytics/\"><title>t</title></head><body></body></html>"
        );
    }

    #[test]
    fn strips_existing_base_tag() {
        let body = "<head lang=\"en\"><base href=\"/old/\"><title>t</title></head>";
        let out = rewrite_html_base(body, "/analytics");
        assert!(!out.contains("/old/"));
        assert!(out.starts_with("<head lang=\"en\"><base href=\"/analytics/\">"));
    }

    #[test]
    fn leaves_headless_documents_alone() {
        let body = "{\"not\": \"html\"}";
        assert_eq!(rewrite_html_base(body, "/analytics"), body);
    }

    #[test]
    fn csp_replaces_existing_base_uri() {
        let policy = "default-src 'self'; base-uri 'none'; img-src *";
        assert_eq!(
            patch_csp(policy, "/analytics"),
            "default-src 'self'; base-uri 'self' /analytics/; img-src *"
        );
    }

    #[test]
    fn csp_appends_missing_base_uri() {
        let policy = "default-src 'self'";
        assert_eq!(
            patch_csp(policy, "/analytics"),
            "default-src 'self'; base-uri 'self' /analytics/"
        );
    }

    #[test]
    fn location_rewrites_absolute_urls_only() {
        assert_eq!(
            rewrite_location("http://10.0.0.5:3001/login?next=%2Fdash#top", "/analytics"),
            "/analytics/login?next=%2Fdash#top"
        );
        assert_eq!(rewrite_location("/already/relative", "/analytics"), "/already/relative");
        assert_eq!(rewrite_location("not a url", "/analytics"), "not a url");
    }
}
