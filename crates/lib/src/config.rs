//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hitl/config.json`) and environment.
//! The external service endpoint is the only required setting.

use crate::relay::{RelaySettings, DEFAULT_CHANNEL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// External service and bridge behaviour.
    #[serde(default)]
    pub hitl: HitlConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP, WebSocket, and webhooks (default 15380).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings for the WebSocket control plane.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require connect.auth.token.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for WebSocket connect. Overridden by HITL_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require connect.auth.token to match configured token.
    Token,
}

/// External service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlConfig {
    /// URL every outbound envelope is POSTed to. Overridden by HITL_ENDPOINT_BASE_URL env.
    pub endpoint_base_url: Option<String>,

    /// Host channel that HITL conversations live on (default "hitl").
    #[serde(default = "default_channel")]
    pub channel: String,

    /// When false, stopHitl does not ask the external service to close the ticket.
    #[serde(default = "default_close_ticket_on_stop")]
    pub close_ticket_on_stop: bool,

    /// When set, webhook calls must carry it in `X-Hitl-Webhook-Secret`. Overridden by HITL_WEBHOOK_SECRET env.
    pub webhook_secret: Option<String>,
}

fn default_gateway_port() -> u16 {
    15380
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_close_ticket_on_stop() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            endpoint_base_url: None,
            channel: default_channel(),
            close_ticket_on_stop: default_close_ticket_on_stop(),
            webhook_secret: None,
        }
    }
}

impl HitlConfig {
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            channel: self.channel.clone(),
            close_ticket_on_stop: self.close_ticket_on_stop,
        }
    }
}

/// Non-empty trimmed value of env var `name`.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the gateway token: env HITL_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_override("HITL_GATEWAY_TOKEN").or_else(|| non_empty(config.gateway.auth.token.as_ref()))
}

/// Resolve the webhook secret: env HITL_WEBHOOK_SECRET overrides config.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    env_override("HITL_WEBHOOK_SECRET").or_else(|| non_empty(config.hitl.webhook_secret.as_ref()))
}

/// Resolve the external service endpoint: env HITL_ENDPOINT_BASE_URL overrides config. Required.
pub fn resolve_endpoint_base_url(config: &Config) -> Result<String> {
    env_override("HITL_ENDPOINT_BASE_URL")
        .or_else(|| non_empty(config.hitl.endpoint_base_url.as_ref()))
        .context("external service endpoint not configured (set hitl.endpointBaseUrl or HITL_ENDPOINT_BASE_URL)")
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HITL_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".hitl").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or HITL_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
