//! Upstream request construction.
//!
//! # Responsibilities
//! - Normalize the matched path relative to the route prefix
//! - Build the upstream URL from the route target
//! - Issue the forwarded request through the shared hyper client
//!
//! # Data Flow
//! client path -> normalized subpath -> target URL -> upstream response

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;

/// Shared upstream client type.
pub type UpstreamClient = Client<HttpConnector, Body>;

/// Path of the request relative to the route prefix.
///
/// A request for exactly the prefix maps to the empty path, so the target
/// URL is used verbatim; prefix plus a bare slash maps to "/". Anything
/// else keeps its subpath and is appended to the target.
pub fn normalized_proxied_path(path: &str, prefix: &str) -> String {
    if prefix.is_empty() || !path.starts_with(prefix) {
        return path.to_string();
    }
    let rest = &path[prefix.len()..];
    match rest {
        "" => String::new(),
        "/" => "/".to_string(),
        _ => rest.to_string(),
    }
}

/// Upstream URL for a normalized path and the client's query string.
pub fn build_target_url(target: &str, path: &str, query: Option<&str>) -> String {
    let mut url = if path.is_empty() {
        target.to_string()
    } else {
        format!("{}{}", target.trim_end_matches('/'), path)
    };
    if let Some(query) = query {
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
    }
    url
}

/// Whether an upstream response should relay unbuffered.
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Whether an upstream response body is HTML and eligible for rewriting.
pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

/// Issue the forwarded request. Hop-by-hop and host headers are replaced
/// by hyper; everything else in `headers` is carried over as rewritten by
/// the route's header rules.
pub async fn forward_request(
    client: &UpstreamClient,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<hyper::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error> {
    let mut builder = Request::builder().method(method).uri(url);
    if let Some(out) = builder.headers_mut() {
        for (name, value) in headers {
            if name == header::HOST {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
    }
    let request = builder
        .body(body)
        .unwrap_or_else(|_| Request::new(Body::empty()));
    client.request(request).await
}
