use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "hitl")]
#[command(about = "HITL bridge CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: HITL_CONFIG_PATH or ~/.hitl/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (health, WebSocket control plane, and webhook routes). Pings the external service first.
    Gateway {
        /// Config file path (default: HITL_CONFIG_PATH or ~/.hitl/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket, HTTP, and webhook port (default from config or 15380)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send a ping envelope to the configured external service.
    Ping {
        /// Config file path (default: HITL_CONFIG_PATH or ~/.hitl/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Call a gateway method over WebSocket and print the response payload.
    Call {
        /// Method name (e.g. health, status, startHitl, stopHitl, createUser, sendMessage, addMessage, conversation)
        method: String,

        /// Method params as a JSON object.
        #[arg(long, value_name = "JSON")]
        params: Option<String>,

        /// Config file path (default: HITL_CONFIG_PATH or ~/.hitl/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hitl {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ping { config }) => {
            if let Err(e) = run_ping(config).await {
                log::error!("ping failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Call {
            method,
            params,
            config,
        }) => match call_via_gateway(config, &method, params.as_deref()).await {
            Ok(payload) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload).unwrap_or_default()
                );
            }
            Err(e) => {
                eprintln!("call error: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(hitl::config::default_config_path);
    let dir = hitl::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = hitl::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    hitl::gateway::run_gateway(config).await
}

async fn run_ping(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = hitl::config::load_config(config_path)?;
    let endpoint = hitl::config::resolve_endpoint_base_url(&config)?;
    let relay = hitl::relay::OutboundRelay::new(
        endpoint.clone(),
        Arc::new(hitl::transport::HttpTransport::new()),
        Arc::new(hitl::host::MemoryHostStore::new()),
        config.hitl.relay_settings(),
    );
    relay.ping().await?;
    println!("pong from {}", endpoint);
    Ok(())
}

/// Wait for the response frame with the given id; events and other frames are skipped.
async fn await_response<S>(ws: &mut S, id: &str) -> Result<serde_json::Value, String>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        let Message::Text(text) = msg else { continue };
        let res: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        if res.get("type").and_then(|v| v.as_str()) != Some("res") {
            continue;
        }
        if res.get("id").and_then(|v| v.as_str()) != Some(id) {
            continue;
        }
        if !res.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let err = res
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("request failed");
            return Err(err.to_string());
        }
        return Ok(res
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null));
    }
    Err(format!("connection closed before response {}", id))
}

async fn call_via_gateway(
    config_path: Option<std::path::PathBuf>,
    method: &str,
    params: Option<&str>,
) -> Result<serde_json::Value, String> {
    let params: serde_json::Value = match params {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("invalid --params: {}", e))?,
        None => serde_json::json!({}),
    };

    let (config, _) = hitl::config::load_config(config_path).map_err(|e| e.to_string())?;
    let bind = config.gateway.bind.trim();
    let port = config.gateway.port;
    let token = hitl::config::resolve_gateway_token(&config);
    let ws_url = format!("ws://{}:{}/ws", bind, port);

    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .map_err(|e| e.to_string())?;

    let mut connect_params = serde_json::json!({
        "minProtocol": 1,
        "maxProtocol": 1,
        "client": { "id": "hitl-cli", "version": env!("CARGO_PKG_VERSION") },
    });
    if let Some(ref t) = token {
        connect_params["auth"] = serde_json::json!({ "token": t });
    }
    let connect_req = serde_json::json!({
        "type": "req",
        "id": "1",
        "method": "connect",
        "params": connect_params
    });
    ws.send(Message::Text(connect_req.to_string()))
        .await
        .map_err(|e| e.to_string())?;
    await_response(&mut ws, "1").await?;

    let req = serde_json::json!({
        "type": "req",
        "id": "2",
        "method": method,
        "params": params
    });
    ws.send(Message::Text(req.to_string()))
        .await
        .map_err(|e| e.to_string())?;
    let payload = await_response(&mut ws, "2").await?;
    let _ = ws.close(None).await;
    Ok(payload)
}
