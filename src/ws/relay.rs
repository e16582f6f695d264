//! WebSocket relay between client and backend.
//!
//! # Responsibilities
//! - Accept the upgrade and run the deferred-auth state machine
//! - Hold early client frames until the policy decision resolves
//! - Drive the backend leg in its own task, buffering until its handshake
//!   completes
//! - Inspect and rewrite Bolt traffic on bolt-handled routes
//!
//! # Design Decisions
//! - One task owns the client socket and the session state; the backend
//!   task only sees channels, so dropping them tears the backend down
//!   whether it is connected or still connecting
//! - Frames received before the decision are held, never forwarded; on
//!   denial they are dropped and the session closes with 1008
//! - Backend setup failures surface as a 1011 close frame through the
//!   same channel ordinary backend traffic uses
//! - A read error on either side hard-terminates the peer: the peer
//!   socket is dropped without a close handshake. Only clean closes and
//!   setup failures get close frames

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as TMessage;

use crate::bolt::{extract_run_messages, inject_auth, BoltAuth};
use crate::config::{WebsocketRoute, WsHandlerKind};
use crate::context::AuthGate;
use crate::ws::session::{SessionState, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};

/// Client-to-backend channel items. `Abort` means an error killed the
/// client leg and the backend socket must be dropped without a close
/// handshake.
enum BackendCommand {
    Frame(TMessage),
    Abort,
}

/// Backend-to-client channel items. `Abort` means the backend leg died on
/// an error and the client socket must be dropped without a close
/// handshake.
enum ClientEvent {
    Frame(Message),
    Abort,
}

/// How the backend half of the session was set up.
enum BackendLeg {
    /// The connect task is running; channels reach it.
    Running,
    /// The route has no websocket handler configured.
    NoHandler,
    /// The handler exists but its target is missing or unparseable.
    NoTarget,
}

/// Accept the upgrade and hand the socket to the session driver.
pub fn handle_upgrade(
    upgrade: WebSocketUpgrade,
    gate: AuthGate,
    ws_route: Option<WebsocketRoute>,
    bolt_auth: BoltAuth,
    route_name: String,
    query: Option<String>,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        handle_session(socket, gate, ws_route, bolt_auth, route_name, query).await;
    })
}

/// Drive one proxied session from upgrade to close.
pub async fn handle_session(
    socket: WebSocket,
    gate: AuthGate,
    ws_route: Option<WebsocketRoute>,
    bolt_auth: BoltAuth,
    route_name: String,
    query: Option<String>,
) {
    let (mut client_tx, mut client_rx) = socket.split();
    let mut state = SessionState::PendingAuth;
    let handler = ws_route.as_ref().map(|r| r.handler);

    let (to_backend_tx, to_backend_rx) = mpsc::unbounded_channel::<BackendCommand>();
    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<ClientEvent>();

    // The backend leg starts connecting right away; no frame reaches it
    // until the decision, because nothing is sent on the channel before
    // the session is allowed.
    let backend_leg = match &ws_route {
        None => BackendLeg::NoHandler,
        Some(route) => match route.target.as_deref() {
            None => BackendLeg::NoTarget,
            Some(target) => {
                let url = backend_url(target, route, query.as_deref());
                match backend_request(&url, route.auth_header.as_deref()) {
                    None => {
                        tracing::error!(route = %route_name, url = %url, "Invalid backend URL");
                        BackendLeg::NoTarget
                    }
                    Some(request) => {
                        let name = route_name.clone();
                        tokio::spawn(run_backend_leg(
                            request,
                            url,
                            to_backend_rx,
                            to_client_tx,
                            name,
                        ));
                        BackendLeg::Running
                    }
                }
            }
        },
    };

    let mut held: Vec<Message> = Vec::new();
    let mut auth_logged = false;
    let mut user_label = String::new();
    let mut hard_abort = false;

    loop {
        tokio::select! {
            context = gate.context(), if state == SessionState::PendingAuth => {
                if !context.is_allowed {
                    state.advance(SessionState::Denied);
                    tracing::warn!(
                        event = "WS_CLOSE_TRIGGERED_BY_POLICY",
                        route = %route_name,
                        user = %context.user_label(),
                        held_frames = held.len(),
                        "Session denied, closing"
                    );
                    close_client(&mut client_tx, CLOSE_POLICY_VIOLATION, "policy violation").await;
                    state.advance(SessionState::Closed);
                } else {
                    user_label = context.user_label().to_string();
                    match backend_leg {
                        BackendLeg::Running => {
                            state.advance(SessionState::Allowed);
                            // Held frames flush first, in arrival order.
                            for message in held.drain(..) {
                                let message = process_client_frame(
                                    message,
                                    handler,
                                    &bolt_auth,
                                    &route_name,
                                    &user_label,
                                    &mut auth_logged,
                                );
                                match to_backend(message) {
                                    Some(message) => {
                                        if to_backend_tx.send(BackendCommand::Frame(message)).is_err() {
                                            state.advance(SessionState::Closed);
                                            break;
                                        }
                                    }
                                    None => {
                                        state.advance(SessionState::Closed);
                                        break;
                                    }
                                }
                            }
                        }
                        BackendLeg::NoHandler => {
                            tracing::warn!(
                                event = "WS_CLOSE_TRIGGERED_BY_POLICY",
                                route = %route_name,
                                "No session handler configured, closing"
                            );
                            close_client(&mut client_tx, CLOSE_POLICY_VIOLATION, "no handler").await;
                            state.advance(SessionState::Closed);
                        }
                        BackendLeg::NoTarget => {
                            tracing::error!(route = %route_name, "WebSocket route has no usable target");
                            close_client(&mut client_tx, CLOSE_INTERNAL_ERROR, "no target").await;
                            state.advance(SessionState::Closed);
                        }
                    }
                }
            }
            frame = client_rx.next() => match frame {
                Some(Ok(message)) => {
                    if state.forwards_frames() {
                        let message = process_client_frame(
                            message,
                            handler,
                            &bolt_auth,
                            &route_name,
                            &user_label,
                            &mut auth_logged,
                        );
                        match to_backend(message) {
                            Some(message) => {
                                if to_backend_tx.send(BackendCommand::Frame(message)).is_err() {
                                    state.advance(SessionState::Closed);
                                }
                            }
                            // Client close frame: tear down both legs.
                            None => state.advance(SessionState::Closed),
                        }
                    } else {
                        tracing::debug!(
                            event = "WS_MESSAGE_BLOCKED",
                            route = %route_name,
                            "Holding client frame until policy decision"
                        );
                        held.push(message);
                    }
                }
                Some(Err(error)) => {
                    // The client socket is broken; drop the backend socket
                    // without a close handshake.
                    tracing::debug!(route = %route_name, error = %error, "Client read error");
                    let _ = to_backend_tx.send(BackendCommand::Abort);
                    hard_abort = true;
                    state.advance(SessionState::Closed);
                }
                None => state.advance(SessionState::Closed),
            },
            outbound = to_client_rx.recv(), if state.forwards_frames() => match outbound {
                Some(ClientEvent::Frame(message)) => {
                    let closing = matches!(message, Message::Close(_));
                    if client_tx.send(message).await.is_err() || closing {
                        state.advance(SessionState::Closed);
                    }
                }
                Some(ClientEvent::Abort) => {
                    tracing::debug!(route = %route_name, "Backend error, dropping client socket");
                    hard_abort = true;
                    state.advance(SessionState::Closed);
                }
                None => state.advance(SessionState::Closed),
            },
        }

        if state == SessionState::Closed {
            break;
        }
    }

    // Dropping the channel ends the backend task, connected or connecting.
    drop(to_backend_tx);
    if !hard_abort {
        let _ = client_tx.close().await;
    }
    tracing::debug!(route = %route_name, "Session finished");
}

/// The backend half: connect, flush whatever queued during the handshake,
/// then relay until either side ends.
async fn run_backend_leg(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    url: String,
    mut inbound: mpsc::UnboundedReceiver<BackendCommand>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    route_name: String,
) {
    let backend = match connect_async(request).await {
        Ok((socket, _response)) => {
            tracing::info!(event = "WS_OPEN_TARGET", route = %route_name, url = %url, "Backend leg open");
            socket
        }
        Err(error) => {
            tracing::error!(route = %route_name, url = %url, error = %error, "Backend connect failed");
            let _ = outbound.send(ClientEvent::Frame(Message::Close(Some(CloseFrame {
                code: CLOSE_INTERNAL_ERROR,
                reason: "backend unavailable".into(),
            }))));
            return;
        }
    };
    let (mut backend_tx, mut backend_rx) = backend.split();

    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(BackendCommand::Frame(message)) => {
                    if backend_tx.send(message).await.is_err() {
                        break;
                    }
                }
                // The client leg errored: drop the socket, no handshake.
                Some(BackendCommand::Abort) => break,
                // Session torn down on the client side.
                None => {
                    let _ = backend_tx.close().await;
                    break;
                }
            },
            frame = backend_rx.next() => match frame {
                Some(Ok(message)) => {
                    let Some(message) = to_client(message) else { continue };
                    let closing = matches!(message, Message::Close(_));
                    if outbound.send(ClientEvent::Frame(message)).is_err() || closing {
                        break;
                    }
                }
                Some(Err(error)) => {
                    tracing::debug!(route = %route_name, error = %error, "Backend read error");
                    let _ = outbound.send(ClientEvent::Abort);
                    break;
                }
                None => {
                    let _ = outbound.send(ClientEvent::Frame(Message::Close(None)));
                    break;
                }
            },
        }
    }
}

/// Backend handshake URL, optionally carrying the client's query string.
fn backend_url(target: &str, ws_route: &WebsocketRoute, query: Option<&str>) -> String {
    match query {
        Some(query) if ws_route.preserve_query && !query.is_empty() => {
            let sep = if target.contains('?') { '&' } else { '?' };
            format!("{}{}{}", target, sep, query)
        }
        _ => target.to_string(),
    }
}

fn backend_request(
    url: &str,
    auth_header: Option<&str>,
) -> Option<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url.into_client_request().ok()?;
    if let Some(auth) = auth_header {
        let value = auth.parse().ok()?;
        request.headers_mut().insert("authorization", value);
    }
    Some(request)
}

/// Inspect (and possibly rewrite) one client frame before forwarding.
///
/// Bolt routes look inside binary frames: RUN statements are logged for the
/// audit trail with binary parameters rendered as hex, and authentication
/// frames get the proxy's credentials substituted in. The substitution is
/// logged once per session, on behalf of the authenticated caller.
fn process_client_frame(
    message: Message,
    handler: Option<WsHandlerKind>,
    bolt_auth: &BoltAuth,
    route_name: &str,
    user: &str,
    auth_logged: &mut bool,
) -> Message {
    if handler != Some(WsHandlerKind::Bolt) {
        return message;
    }
    let Message::Binary(payload) = message else {
        return message;
    };

    for run in extract_run_messages(&payload) {
        tracing::info!(
            event = "WS_BOLT_RUN_QUERY",
            route = %route_name,
            user = %user,
            query = %run.query,
            params = %run.params.to_log_value(),
            "Bolt RUN statement"
        );
    }

    match inject_auth(&payload, bolt_auth) {
        Some(rewritten) => {
            if !*auth_logged {
                *auth_logged = true;
                tracing::info!(
                    event = "WS_BOLT_AUTH",
                    route = %route_name,
                    user = %user,
                    principal = %bolt_auth.principal,
                    "Substituted Bolt credentials on behalf of caller"
                );
            }
            Message::Binary(rewritten.into())
        }
        None => Message::Binary(payload),
    }
}

async fn close_client(
    client_tx: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &'static str,
) {
    let frame = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    let _ = client_tx.send(frame).await;
}

/// Axum frame to tungstenite frame. A close returns None so the caller
/// tears the session down instead of forwarding it.
fn to_backend(message: Message) -> Option<TMessage> {
    match message {
        Message::Text(text) => Some(TMessage::Text(text.as_str().into())),
        Message::Binary(payload) => Some(TMessage::Binary(payload)),
        Message::Ping(payload) => Some(TMessage::Ping(payload)),
        Message::Pong(payload) => Some(TMessage::Pong(payload)),
        Message::Close(_) => None,
    }
}

/// Tungstenite frame to axum frame. Raw frames never cross the relay.
fn to_client(message: TMessage) -> Option<Message> {
    match message {
        TMessage::Text(text) => Some(Message::Text(text.as_str().into())),
        TMessage::Binary(payload) => Some(Message::Binary(payload)),
        TMessage::Ping(payload) => Some(Message::Ping(payload)),
        TMessage::Pong(payload) => Some(Message::Pong(payload)),
        TMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_string().into(),
        }))),
        TMessage::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame as TCloseFrame;

    use crate::bolt::chunk::frame_message;
    use crate::bolt::value::{encode_struct, Value};
    use crate::bolt::SIG_AUTH;

    fn route(preserve_query: bool) -> WebsocketRoute {
        WebsocketRoute {
            handler: WsHandlerKind::Bolt,
            target: Some("ws://127.0.0.1:7687".to_string()),
            auth_header: None,
            preserve_query,
        }
    }

    #[test]
    fn query_preserved_only_when_configured() {
        assert_eq!(
            backend_url("ws://b:7687", &route(true), Some("db=neo4j")),
            "ws://b:7687?db=neo4j"
        );
        assert_eq!(
            backend_url("ws://b:7687", &route(false), Some("db=neo4j")),
            "ws://b:7687"
        );
        assert_eq!(
            backend_url("ws://b:7687?a=1", &route(true), Some("b=2")),
            "ws://b:7687?a=1&b=2"
        );
    }

    #[test]
    fn backend_request_carries_auth_header() {
        let request = backend_request("ws://127.0.0.1:7687/", Some("Basic abc")).unwrap();
        assert_eq!(request.headers().get("authorization").unwrap(), "Basic abc");
        assert!(backend_request("not a url", None).is_none());
    }

    #[test]
    fn passthrough_frames_are_untouched() {
        let auth = BoltAuth::default();
        let mut logged = false;
        let payload = bytes::Bytes::from_static(b"\x00\x01x\x00\x00");
        let out = process_client_frame(
            Message::Binary(payload.clone()),
            Some(WsHandlerKind::Passthrough),
            &auth,
            "r",
            "cn=alice",
            &mut logged,
        );
        assert!(matches!(out, Message::Binary(p) if p == payload));
        assert!(!logged);
    }

    #[test]
    fn bolt_auth_frame_is_rewritten_and_logged_once() {
        let client_logon = encode_struct(
            SIG_AUTH,
            &[Value::Map(vec![
                ("scheme".to_string(), Value::String("basic".to_string())),
                ("principal".to_string(), Value::String("client".to_string())),
                (
                    "credentials".to_string(),
                    Value::String("secret".to_string()),
                ),
            ])],
        );
        let framed = frame_message(&client_logon);
        let auth = BoltAuth {
            scheme: "basic".to_string(),
            principal: "neo4j".to_string(),
            credentials: "proxy-pass".to_string(),
        };
        let mut logged = false;
        let out = process_client_frame(
            Message::Binary(framed.clone().into()),
            Some(WsHandlerKind::Bolt),
            &auth,
            "r",
            "cn=alice",
            &mut logged,
        );
        assert!(logged);
        match out {
            Message::Binary(rewritten) => {
                assert_ne!(rewritten, bytes::Bytes::from(framed));
                let messages = crate::bolt::chunk::split_messages(&rewritten).unwrap();
                let decoded = crate::bolt::value::decode_message(&messages[0]).unwrap();
                assert_eq!(decoded.signature, SIG_AUTH);
            }
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    #[test]
    fn close_frames_map_between_stacks() {
        assert!(to_backend(Message::Close(None)).is_none());
        let mapped = to_client(TMessage::Close(Some(TCloseFrame {
            code: CloseCode::Policy,
            reason: "nope".into(),
        })));
        match mapped {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CLOSE_POLICY_VIOLATION);
                assert_eq!(frame.reason.as_str(), "nope");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
