//! Integration tests for the HTTP proxying path.

mod common;

use policy_proxy::config::schema::{ProxyConfig, RouteKind, SoftErrorMode};

use common::{route, spawn_proxy, start_event_stream_backend, start_mock_backend};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn forwards_allowed_requests() {
    let backend = start_mock_backend("application/json", "{\"ok\":true}").await;
    let mut rule = route("api", "/api/(.*)");
    rule.target = Some(format!("http://{}", backend));

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/api/items", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "{\"ok\":true}");
}

#[tokio::test]
async fn denies_with_fixed_403_page() {
    let backend = start_mock_backend("text/plain", "secret").await;
    let mut rule = route("api", "/api/(.*)");
    rule.target = Some(format!("http://{}", backend));
    rule.policy = Some("mock-always-deny".to_string());

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/api/items", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body = response.text().await.unwrap();
    assert!(body.contains("403 Forbidden"));
    assert!(!body.contains("secret"));
}

#[tokio::test]
async fn missing_identity_header_is_denied_by_default_stack() {
    let backend = start_mock_backend("text/plain", "secret").await;
    let mut rule = route("api", "/api/(.*)");
    rule.target = Some(format!("http://{}", backend));
    // No explicit policy: the table default is deny-all.
    rule.policy = None;
    rule.connector = None;

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/api/items", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let addr = spawn_proxy(ProxyConfig::default()).await;
    let response = client()
        .get(format!("http://{}/nowhere", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unreachable_backend_serves_502_page() {
    let mut rule = route("api", "/api/(.*)");
    // Reserved port with nothing listening.
    rule.target = Some("http://127.0.0.1:1".to_string());

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/api/items", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert!(response.text().await.unwrap().contains("502 Bad Gateway"));
}

#[tokio::test]
async fn mcp_route_soft_errors_with_jsonrpc_envelope() {
    let mut rule = route("mcp", "/mcp(.*)");
    rule.target = Some("http://127.0.0.1:1".to_string());
    rule.soft_error = SoftErrorMode::Mcp;

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .post(format!("http://{}/mcp", addr))
        .header("x-user-common-name", "cn=alice")
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let envelope: serde_json::Value = response.json().await.unwrap();
    assert_eq!(envelope["id"], 7);
    assert_eq!(envelope["error"]["code"], -32001);
}

#[tokio::test]
async fn rewrites_html_base_under_route_prefix() {
    let backend = start_mock_backend(
        "text/html; charset=utf-8",
        "<html><head><base href=\"/\"><title>t</title></head><body></body></html>",
    )
    .await;
    let mut rule = route("analytics", "/analytics(.*)");
    rule.target = Some(format!("http://{}", backend));
    rule.rewrite_base = true;

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/analytics/", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();
    assert!(body.contains("<base href=\"/analytics/\">"));
    assert!(!body.contains("<base href=\"/\">"));
}

#[tokio::test]
async fn redirect_routes_skip_the_gate() {
    let mut rule = route("root", "/");
    rule.kind = RouteKind::Redirect;
    rule.redirect_to = Some("/services".to_string());
    rule.policy = Some("mock-always-deny".to_string());

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/services");
}

#[tokio::test]
async fn splash_hides_denied_routes_marked_hidden() {
    let mut splash = route("services", "/services");
    splash.kind = RouteKind::Splash;

    let mut visible = route("analytics", "/analytics(.*)");
    visible.target = Some("http://127.0.0.1:1".to_string());
    visible.policy = Some("mock-always-allow".to_string());

    let mut hidden = route("admin-tool", "/admin(.*)");
    hidden.target = Some("http://127.0.0.1:1".to_string());
    hidden.policy = Some("mock-always-deny".to_string());
    hidden.hide_if_no_access = true;

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![splash, visible, hidden],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/services", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("analytics"));
    assert!(!body.contains("admin-tool"));
}

#[tokio::test]
async fn conditional_return_answers_without_backend() {
    let mut rule = route("api", "/api/(.*)");
    rule.target = Some("http://127.0.0.1:1".to_string());
    rule.conditional_returns = vec![policy_proxy::config::schema::ConditionalReturn {
        header_name: "user-agent".to_string(),
        includes: "HealthBot".to_string(),
        body: "ok".to_string(),
        content_type: "text/plain; charset=utf-8".to_string(),
    }];

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let response = client()
        .get(format!("http://{}/api/ping", addr))
        .header("x-user-common-name", "cn=alice")
        .header("user-agent", "HealthBot/1.0")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn event_stream_relays_unbuffered_and_client_drop_ends_backend() {
    let (backend, mut closed) = start_event_stream_backend().await;
    let mut rule = route("events", "/events(.*)");
    rule.target = Some(format!("http://{}", backend));
    // rewrite_base must not buffer a stream that never ends.
    rule.rewrite_base = true;

    let addr = spawn_proxy(ProxyConfig {
        routes: vec![rule],
        ..Default::default()
    })
    .await;

    let mut response = client()
        .get(format!("http://{}/events/stream", addr))
        .header("x-user-common-name", "cn=alice")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    // The backend keeps its socket open, so the first event arriving at all
    // proves the body streams through instead of being buffered.
    let first = tokio::time::timeout(std::time::Duration::from_secs(5), response.chunk())
        .await
        .expect("first event should stream through while the backend is still open")
        .unwrap()
        .unwrap();
    assert!(std::str::from_utf8(&first).unwrap().contains("data: first"));

    // Dropping the client response tears the backend connection down.
    drop(response);
    tokio::time::timeout(std::time::Duration::from_secs(5), closed.recv())
        .await
        .expect("backend should observe the disconnect")
        .unwrap();
}
