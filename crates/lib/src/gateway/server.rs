//! Gateway HTTP + WebSocket + webhook server (single port).

use crate::config::{self, Config};
use crate::dispatch::{Dispatched, InboundDispatcher, InboundRequest};
use crate::envelope::TicketMessage;
use crate::error::Error;
use crate::gateway::protocol::{
    AddMessageParams, ConnectParams, ConversationParams, HelloOk, SendMessageParams,
    StopHitlParams, WsRequest, WsResponse,
};
use crate::host::{HostStore, MemoryHostStore, StoreNotice};
use crate::relay::{CreateUserInput, OutboundRelay, StartHitlInput};
use crate::transport::{HttpTransport, Transport};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

const PROTOCOL_VERSION: u32 = 1;

const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// Header the external service uses to present the webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "X-Hitl-Webhook-Secret";

/// Shared state for the gateway (config, host store, relay, dispatcher).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, WebSocket connect must provide params.auth.token matching this.
    pub required_token: Option<String>,
    /// When Some, webhook calls must carry it in [`WEBHOOK_SECRET_HEADER`].
    pub webhook_secret: Option<String>,
    /// Broadcasts events to connected clients (store notices, shutdown). Subscribers receive JSON event frames.
    pub event_tx: broadcast::Sender<String>,
    pub store: Arc<MemoryHostStore>,
    pub relay: Arc<OutboundRelay>,
    pub dispatcher: Arc<InboundDispatcher>,
}

/// When auth mode is token and a token is configured, returns it for connect validation.
fn require_connect_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Event frame for a store notice.
fn notice_event_json(notice: &StoreNotice) -> Option<String> {
    let event = match notice {
        StoreNotice::Message(message) => json!({
            "type": "event",
            "event": "conversation.message",
            "payload": message,
        }),
        StoreNotice::Event(host_event) => {
            let payload = serde_json::to_value(host_event)
                .ok()
                .and_then(|v| v.get("payload").cloned())
                .unwrap_or_else(|| json!({}));
            json!({
                "type": "event",
                "event": host_event.name(),
                "payload": payload,
            })
        }
    };
    serde_json::to_string(&event).ok()
}

/// Run the gateway with a fresh in-memory host store and the HTTP transport.
pub async fn run_gateway(config: Config) -> Result<()> {
    run_gateway_with_store(config, Arc::new(MemoryHostStore::new())).await
}

/// Run the gateway on the given host store. Pings the external service first
/// (registration) and refuses to start when it is unreachable.
pub async fn run_gateway_with_store(config: Config, store: Arc<MemoryHostStore>) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or HITL_GATEWAY_TOKEN)",
                bind
            );
        }
    }
    let endpoint = config::resolve_endpoint_base_url(&config)?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
    let host: Arc<dyn HostStore> = store.clone();
    let relay = OutboundRelay::new(
        endpoint.clone(),
        transport,
        host.clone(),
        config.hitl.relay_settings(),
    );
    relay
        .ping()
        .await
        .with_context(|| format!("endpoint unreachable: {}", endpoint))?;
    log::info!("external service at {} answered ping", endpoint);

    let dispatcher = InboundDispatcher::new(host, config.hitl.channel.clone());
    let (event_tx, _) = broadcast::channel(64);
    let state = GatewayState {
        config: Arc::new(config.clone()),
        required_token: require_connect_token(&config),
        webhook_secret: config::resolve_webhook_secret(&config),
        event_tx: event_tx.clone(),
        store: store.clone(),
        relay: Arc::new(relay),
        dispatcher: Arc::new(dispatcher),
    };

    {
        let mut notices = store.subscribe();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        if let Some(text) = notice_event_json(&notice) {
                            let _ = event_tx.send(text);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("notice forwarder lagged {} notices", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Routes: health, WebSocket control plane, and every other request (including
/// non-GET calls on `/` and `/ws`) to the webhook dispatcher.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http).fallback(webhook))
        .route("/ws", get(ws_handler).fallback(webhook))
        .fallback(webhook)
        .with_state(state)
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event to WebSocket clients.
async fn shutdown_signal(event_tx: broadcast::Sender<String>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");

    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
}

/// Compares secrets without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Status code for a failed dispatch.
fn dispatch_error_status(err: &Error) -> StatusCode {
    match err {
        Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
        Error::SchemaViolation { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Fallback: hands the raw request to the inbound dispatcher (exact route match happens there).
async fn webhook(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.webhook_secret {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(provided, expected) {
            return StatusCode::FORBIDDEN;
        }
    }
    let req = InboundRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        body: if body.is_empty() {
            None
        } else {
            Some(body.to_vec())
        },
    };
    match state.dispatcher.dispatch(&req).await {
        Ok(Dispatched::Ignored) => StatusCode::OK,
        Ok(outcome) => {
            log::debug!("webhook {} {}: {:?}", req.method, req.path, outcome);
            StatusCode::OK
        }
        Err(e) => {
            log::warn!("webhook {} {} failed: {}", req.method, req.path, e);
            dispatch_error_status(&e)
        }
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
    }))
}

/// GET /ws upgrades to WebSocket. First request must be connect; we reply with hello-ok.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn respond(socket: &mut WebSocket, res: &WsResponse) -> bool {
    socket
        .send(Message::Text(serde_json::to_string(res).unwrap_or_default()))
        .await
        .is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut connected = false;
    let mut event_rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        if connected || is_shutdown {
                            let _ = socket.send(Message::Text(text)).await;
                        }
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };

                if req.typ != "req" {
                    continue;
                }

                let res = if req.method == "connect" {
                    let res = connect(&state, &req);
                    if res.ok {
                        connected = true;
                    }
                    res
                } else if !connected {
                    WsResponse::err(&req.id, "connect required")
                } else {
                    handle_request(&state, &req).await
                };
                if !respond(&mut socket, &res).await {
                    break;
                }
            }
        }
    }

    if !connected {
        log::debug!("ws client disconnected before sending connect");
    }
}

fn connect(state: &GatewayState, req: &WsRequest) -> WsResponse {
    let params: ConnectParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(_) => return WsResponse::err(&req.id, "invalid connect params"),
    };
    if let Some(ref required) = state.required_token {
        let provided = params.auth.token.as_deref().unwrap_or("").trim();
        if provided.is_empty() {
            return WsResponse::err(
                &req.id,
                "unauthorized: gateway token missing (set HITL_GATEWAY_TOKEN or gateway.auth.token)",
            );
        }
        if !constant_time_eq(provided, required) {
            return WsResponse::err(&req.id, "unauthorized: gateway token mismatch");
        }
    }
    let protocol = params
        .max_protocol
        .unwrap_or(PROTOCOL_VERSION)
        .min(PROTOCOL_VERSION);
    let hello = HelloOk {
        typ: "hello-ok".to_string(),
        protocol,
        channel: state.config.hitl.channel.clone(),
    };
    WsResponse::ok(&req.id, serde_json::to_value(&hello).unwrap_or(json!({})))
}

fn parse_params<T: DeserializeOwned>(req: &WsRequest) -> Result<T, WsResponse> {
    serde_json::from_value(req.params.clone())
        .map_err(|e| WsResponse::err(&req.id, format!("invalid {} params: {}", req.method, e)))
}

async fn handle_request(state: &GatewayState, req: &WsRequest) -> WsResponse {
    match dispatch_request(state, req).await {
        Ok(res) | Err(res) => res,
    }
}

async fn dispatch_request(state: &GatewayState, req: &WsRequest) -> Result<WsResponse, WsResponse> {
    let id = req.id.as_str();
    let res = match req.method.as_str() {
        "health" => WsResponse::ok(
            id,
            json!({
                "runtime": "running",
                "protocol": PROTOCOL_VERSION,
            }),
        ),
        "status" => {
            let auth_mode = if state.required_token.is_some() {
                "token"
            } else {
                "none"
            };
            WsResponse::ok(
                id,
                json!({
                    "runtime": "running",
                    "protocol": PROTOCOL_VERSION,
                    "port": state.config.gateway.port,
                    "bind": state.config.gateway.bind,
                    "auth": auth_mode,
                    "endpoint": state.relay.endpoint_url(),
                    "channel": state.relay.settings().channel,
                    "closeTicketOnStop": state.relay.settings().close_ticket_on_stop,
                    "conversations": state.store.conversations().await.len(),
                    "users": state.store.users().await.len(),
                }),
            )
        }
        "startHitl" => {
            let input: StartHitlInput = parse_params(req)?;
            let conversation_id = state
                .relay
                .start_hitl(input)
                .await
                .map_err(|e| WsResponse::err(id, e.to_string()))?;
            WsResponse::ok(id, json!({ "conversationId": conversation_id }))
        }
        "stopHitl" => {
            let params: StopHitlParams = parse_params(req)?;
            let conversation = state
                .store
                .conversation(&params.conversation_id)
                .await
                .ok_or_else(|| WsResponse::err(id, "conversation not found"))?;
            state
                .relay
                .stop_hitl(&conversation)
                .await
                .map_err(|e| WsResponse::err(id, e.to_string()))?;
            WsResponse::ok(id, json!({}))
        }
        "createUser" => {
            let input: CreateUserInput = parse_params(req)?;
            let user_id = state
                .relay
                .create_user(input)
                .await
                .map_err(|e| WsResponse::err(id, e.to_string()))?;
            WsResponse::ok(id, json!({ "userId": user_id }))
        }
        "sendMessage" => {
            let params: SendMessageParams = parse_params(req)?;
            let conversation = state
                .store
                .conversation(&params.conversation_id)
                .await
                .ok_or_else(|| WsResponse::err(id, "conversation not found"))?;
            let user = state
                .store
                .user(&params.user_id)
                .await
                .ok_or_else(|| WsResponse::err(id, "user not found"))?;
            state
                .relay
                .send_message(&conversation, &user, &params.message)
                .await
                .map_err(|e| WsResponse::err(id, e.to_string()))?;
            WsResponse::ok(id, json!({ "sent": true }))
        }
        "addMessage" => {
            let params: AddMessageParams = parse_params(req)?;
            let conversation = state
                .store
                .conversation(&params.conversation_id)
                .await
                .ok_or_else(|| WsResponse::err(id, "conversation not found"))?;
            let message = TicketMessage {
                text: params.text,
                author: params.author,
                timestamp: params.timestamp,
            };
            state
                .relay
                .add_message(&conversation, message)
                .await
                .map_err(|e| WsResponse::err(id, e.to_string()))?;
            WsResponse::ok(id, json!({ "added": true }))
        }
        "conversation" => {
            let params: ConversationParams = parse_params(req)?;
            let conversation = state
                .store
                .conversation(&params.conversation_id)
                .await
                .ok_or_else(|| WsResponse::err(id, "conversation not found"))?;
            let messages = state.store.messages(&conversation.id).await;
            WsResponse::ok(
                id,
                json!({ "conversation": conversation, "messages": messages }),
            )
        }
        _ => WsResponse::err(id, format!("unknown method: {}", req.method)),
    };
    Ok(res)
}
