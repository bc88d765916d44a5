mod common;

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wsservice::{IdGenerator, NodeId, ServiceConfig, SessionId, WsListener, WsService};

use common::{Recorder, Seen};

async fn next(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn start() -> (WsService<Recorder>, mpsc::UnboundedReceiver<Seen>, String) {
    let (recorder, seen) = Recorder::channel();
    let service = WsService::start(
        ServiceConfig::builder()
            .listen_addr("127.0.0.1:0")
            .max_msg_len(1024)
            .build(),
        IdGenerator::new(NodeId::new(3)),
        Arc::new(recorder),
        &WsListener::new(),
    )
    .await
    .unwrap();

    let addr = service.local_addr().expect("bound address");
    (service, seen, format!("ws://{addr}"))
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let (service, mut seen, url) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let id = match next(&mut seen).await {
        Seen::Connected(id) => id,
        other => panic!("expected Connected, got {other:?}"),
    };
    assert_eq!(id.node(), NodeId::new(3));

    client.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next(&mut seen).await, Seen::Message(id, "hello".into()));

    client
        .send(Message::Binary(vec![0xc3, 0x28].into()))
        .await
        .unwrap();
    assert_eq!(next(&mut seen).await, Seen::Unknown(id, vec![0xc3, 0x28]));

    service.send_to(id, &"world".to_string()).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.into_data().as_ref(), b"world");

    client.close(None).await.unwrap();
    assert_eq!(next(&mut seen).await, Seen::Disconnected(id));
}

#[tokio::test]
async fn test_server_close_disconnects_client() {
    let (service, mut seen, url) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let id: SessionId = match next(&mut seen).await {
        Seen::Connected(id) => id,
        other => panic!("expected Connected, got {other:?}"),
    };

    service.close_session(id);
    assert_eq!(next(&mut seen).await, Seen::Disconnected(id));

    // The client sees a close frame (or the stream ending) rather than data.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test]
async fn test_oversized_inbound_frame_ends_session() {
    let (_service, mut seen, url) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let id = match next(&mut seen).await {
        Seen::Connected(id) => id,
        other => panic!("expected Connected, got {other:?}"),
    };

    let _ = client.send(Message::Binary(vec![b'x'; 4096].into())).await;
    assert_eq!(next(&mut seen).await, Seen::Disconnected(id));
}
