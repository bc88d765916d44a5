use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<()> {
    let url = std::env::var("GATEWAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:9000".to_string());

    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut tx, mut rx) = ws.split();
    println!("Connected to {url}, type lines to send");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Keeps the session inside the server's 60s idle window.
    let mut keepalive = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                tx.send(Message::Text(line.into())).await?;
            }
            message = rx.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => {
                        println!("Server closed the connection");
                        break;
                    }
                    Some(Ok(message)) if message.is_binary() || message.is_text() => {
                        println!("[RX] {}", String::from_utf8_lossy(&message.into_data()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = keepalive.tick() => {
                tx.send(Message::Text("".into())).await?;
            }
        }
    }

    let _ = tx.send(Message::Close(None)).await;
    Ok(())
}
