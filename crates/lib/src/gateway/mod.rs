//! Gateway: HTTP + WebSocket control plane and webhook endpoint.
//!
//! Single port serves the health probe, the WebSocket control plane (first request
//! must be `connect`; then HITL actions and pushed events), and the webhook routes
//! the external service calls.

mod protocol;
mod server;

pub use protocol::{
    AddMessageParams, ConnectParams, ConversationParams, HelloOk, SendMessageParams, StopHitlParams, WsRequest,
    WsResponse,
};
pub use server::{router, run_gateway, run_gateway_with_store, GatewayState, WEBHOOK_SECRET_HEADER};
