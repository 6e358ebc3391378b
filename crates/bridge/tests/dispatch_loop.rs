//! Integration test: JSON lines in, JSON lines out, with a real
//! [`Connection`] talking to an in-process mock editor.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use gb_bridge::dispatch::Dispatcher;
use gb_bridge::observer;
use gb_connection::Connection;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Answers the handshake, fails `explode`, and echoes every other command.
async fn start_echo_editor() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut stream) = ws.split();
                while let Some(Ok(msg)) = stream.next().await {
                    let Message::Text(text) = msg else { continue };
                    let req: Value = serde_json::from_str(&text).unwrap();
                    let reply = match req["command"].as_str() {
                        Some("mcp_handshake") => json!({
                            "id": req["id"],
                            "result": {"addon_version": env!("CARGO_PKG_VERSION")},
                        }),
                        Some("explode") => json!({
                            "id": req["id"],
                            "error": {"code": "E_BOOM", "message": "node not found"},
                        }),
                        _ => json!({"id": req["id"], "result": {"echo": req["params"]}}),
                    };
                    if sink.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

async fn serve(addr: SocketAddr, input: &'static [u8]) -> Vec<Value> {
    let conn = Connection::builder()
        .host(addr.ip().to_string())
        .port(addr.port())
        .auto_reconnect(false)
        .build()
        .unwrap();
    conn.connect().await.unwrap();

    let (mut client, server) = tokio::io::duplex(16 * 1024);
    Dispatcher::new(conn.clone())
        .run(input, server, std::future::pending())
        .await
        .unwrap();
    conn.disconnect();

    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();
    out.lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn by_id(replies: &[Value], id: Value) -> &Value {
    replies
        .iter()
        .find(|r| r["id"] == id)
        .unwrap_or_else(|| panic!("no reply with id {id}"))
}

#[tokio::test]
async fn lines_round_trip_through_editor() {
    let addr = start_echo_editor().await;
    let replies = serve(
        addr,
        b"{\"id\":1,\"command\":\"get_node\",\"params\":{\"path\":\"/root\"}}\n\
          {\"id\":\"two\",\"command\":\"explode\"}\n\
          {\"command\":\"no_id\"}\n\
          not json\n",
    )
    .await;

    assert_eq!(replies.len(), 4);
    assert_eq!(
        by_id(&replies, json!(1))["result"],
        json!({"echo": {"path": "/root"}})
    );
    assert_eq!(
        by_id(&replies, json!("two"))["error"],
        json!({"kind": "command", "code": "E_BOOM", "message": "node not found"})
    );

    let nulls: Vec<&Value> = replies.iter().filter(|r| r["id"].is_null()).collect();
    assert_eq!(nulls.len(), 2);
    assert!(nulls.iter().any(|r| r["result"] == json!({"echo": {}})));
    assert!(nulls
        .iter()
        .any(|r| r["error"]["kind"] == "invalid_request"));
}

#[tokio::test]
async fn event_log_drains_final_disconnect() {
    let addr = start_echo_editor().await;
    let conn = Connection::builder()
        .host(addr.ip().to_string())
        .port(addr.port())
        .auto_reconnect(false)
        .build()
        .unwrap();
    let event_log = observer::spawn(conn.subscribe());

    conn.connect().await.unwrap();
    conn.disconnect();
    drop(conn);

    // Connected, then Disconnected.
    assert_eq!(observer::drain(event_log).await, 2);
}
