//! Shared utilities for integration testing.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use policy_proxy::config::schema::{
    ProxyConfig, RouteKind, RouteRule, SoftErrorMode, WebsocketRoute,
};
use policy_proxy::HttpServer;

/// Start a mock HTTP backend on an ephemeral port that returns a fixed
/// response for every request. Returns the bound address.
#[allow(dead_code)]
pub async fn start_mock_backend(content_type: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            content_type,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend that serves a never-ending event stream: one event
/// is written immediately, then the socket stays open until the peer goes
/// away. Each disconnect is reported on the returned channel.
#[allow(dead_code)]
pub async fn start_event_stream_backend() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let closed_tx = closed_tx.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(b"data: first\n\n").await;
                        let _ = socket.flush().await;
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                        let _ = closed_tx.send(());
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, closed_rx)
}

/// Start a mock WebSocket backend that echoes every frame and reports the
/// binary payloads it received on the returned channel.
#[allow(dead_code)]
pub async fn start_ws_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let seen_tx = seen_tx.clone();
                    tokio::spawn(async move {
                        let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                            return;
                        };
                        while let Some(Ok(message)) = ws.next().await {
                            if let tokio_tungstenite::tungstenite::Message::Binary(payload) =
                                &message
                            {
                                let _ = seen_tx.send(payload.to_vec());
                            }
                            if message.is_close() {
                                break;
                            }
                            let _ = ws.send(message).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, seen_rx)
}

/// How a mock WebSocket backend saw its session end.
#[allow(dead_code)]
#[derive(Debug, PartialEq)]
pub enum WsSessionEnd {
    /// A close frame arrived before the connection ended.
    CloseFrame,
    /// The connection died without a close handshake.
    Dropped,
}

/// Start a mock WebSocket backend that echoes frames and reports how each
/// session ended on the returned channel.
#[allow(dead_code)]
pub async fn start_ws_end_reporter() -> (SocketAddr, mpsc::UnboundedReceiver<WsSessionEnd>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (end_tx, end_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let end_tx = end_tx.clone();
                    tokio::spawn(async move {
                        let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                            return;
                        };
                        loop {
                            match ws.next().await {
                                Some(Ok(message)) if message.is_close() => {
                                    let _ = end_tx.send(WsSessionEnd::CloseFrame);
                                    break;
                                }
                                Some(Ok(message)) => {
                                    let _ = ws.send(message).await;
                                }
                                Some(Err(_)) | None => {
                                    let _ = end_tx.send(WsSessionEnd::Dropped);
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, end_rx)
}

/// Start a mock WebSocket backend that accepts, reads one frame, then drops
/// its connection without a close handshake.
#[allow(dead_code)]
pub async fn start_ws_vanishing_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(async move {
                        let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                            return;
                        };
                        let _ = ws.next().await;
                        // Dropped here, close handshake never happens.
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Run the proxy on an ephemeral port with the given configuration.
/// Returns the bound address.
pub async fn spawn_proxy(config: ProxyConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config);
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    addr
}

/// A proxy route with test defaults: fill only what the case cares about.
#[allow(dead_code)]
pub fn route(name: &str, pattern: &str) -> RouteRule {
    RouteRule {
        name: name.to_string(),
        pattern: pattern.to_string(),
        kind: RouteKind::Proxy,
        target: None,
        redirect_to: None,
        file: None,
        rewrite_base: false,
        header_rules: Vec::new(),
        conditional_returns: Vec::new(),
        subpath_returns: Vec::new(),
        policy: Some("simple-role-admin".to_string()),
        connector: Some("simple".to_string()),
        soft_error: SoftErrorMode::Html,
        hide_if_no_access: false,
        params: None,
        websocket: None,
    }
}

/// A websocket route with test defaults.
#[allow(dead_code)]
pub fn ws_route(
    name: &str,
    pattern: &str,
    handler: policy_proxy::config::schema::WsHandlerKind,
    target: Option<String>,
) -> RouteRule {
    let mut rule = route(name, pattern);
    rule.kind = RouteKind::Websocket;
    rule.websocket = Some(WebsocketRoute {
        handler,
        target,
        auth_header: None,
        preserve_query: false,
    });
    rule
}
