use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use ws_gateway::{Inbound, TextProcessor, init_tracing};
use wsservice::{IdGenerator, NodeId, ServiceConfig, WsListener, WsService};

const DEFAULT_CONFIG: &str = r#"{"ListenAddr": "127.0.0.1:9000"}"#;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::var("GATEWAY_CONFIG") {
        Ok(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file '{path}'"))?,
        Err(_) => DEFAULT_CONFIG.to_string(),
    };
    let config = ServiceConfig::from_json(&config)?;

    let node_id: u16 = match std::env::var("NODE_ID") {
        Ok(raw) => raw.parse().context("NODE_ID must be an integer")?,
        Err(_) => 0,
    };

    let (processor, mut inbound) = TextProcessor::new();
    let service = WsService::start(
        config,
        IdGenerator::new(NodeId::new(node_id)),
        Arc::new(processor),
        &WsListener::new(),
    )
    .await?;

    info!(addr = ?service.local_addr(), "Gateway ready, echoing text frames");

    loop {
        tokio::select! {
            event = inbound.recv() => {
                let Some(event) = event else { break };
                match event {
                    Inbound::Connected(id) => {
                        info!(session_id = %id, sessions = service.connection_count(), "Client connected");
                    }
                    Inbound::Text(id, text) => {
                        if let Err(e) = service.send_to(id, &text).await {
                            warn!(session_id = %id, error = %e, "Echo failed");
                        }
                    }
                    Inbound::Unknown(id, frame) => {
                        warn!(session_id = %id, len = frame.len(), "Dropping non-text frame");
                    }
                    Inbound::Disconnected(id) => {
                        info!(session_id = %id, "Client disconnected");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                service.shutdown();
                break;
            }
        }
    }

    Ok(())
}
