// WebSocket listener: every text frame is one keystroke request, answered by
// one text frame carrying the reply.

use anyhow::Context;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use mashprint_core::Dispatcher;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::protocol::respond;

/// Bind the WebSocket listener on `addr` (e.g. `127.0.0.1:65433`).
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Accept WebSocket clients forever. Each client gets its own task, so many
/// clients can stream keystrokes at once.
pub async fn run(listener: TcpListener, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &addr_str, &dispatcher).await {
                warn!("WebSocket connection from {addr_str} failed: {e:#}");
            }
        });
    }
}

/// Perform the handshake, then answer requests until the client goes away.
async fn serve_connection(
    stream: TcpStream,
    addr: &str,
    dispatcher: &Dispatcher,
) -> anyhow::Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, read) = ws_stream.split();

    // Replies are written by a separate task so a slow reader never stalls
    // request processing.
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(64);
    let writer_addr = addr.to_string();
    let writer = tokio::spawn(async move {
        while let Some(text) = reply_rx.recv().await {
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("Failed to send reply to {writer_addr}: {e}");
                return;
            }
        }
        let _ = write.close().await;
    });

    if process_message_stream(read, dispatcher, &reply_tx, addr)
        .await
        .is_err()
    {
        warn!("Reply writer for {addr} stopped; remaining requests dropped");
    }
    drop(reply_tx);
    join_writer(writer, addr).await;

    info!("Client {addr} disconnected");
    Ok(())
}

/// Wait for the reply writer to drain. Returns `false` if it panicked or was
/// cancelled.
async fn join_writer(writer: JoinHandle<()>, addr: &str) -> bool {
    match writer.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Reply writer for {addr} failed: {e}");
            false
        }
    }
}

/// Answer every text message from `stream`, pushing encoded replies through
/// `tx`. Returns `Err(())` if the reply channel is closed (writer gone),
/// signalling the caller to stop.
///
/// This function is generic over the stream type so it can be tested with
/// in-memory streams without opening TCP ports.
pub async fn process_message_stream<St>(
    mut stream: St,
    dispatcher: &Dispatcher,
    tx: &mpsc::Sender<String>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let reply = respond(dispatcher, text.to_string()).await;
                let json = match reply.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode reply for {addr}: {e}");
                        continue;
                    }
                };
                if tx.send(json).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Reply;
    use futures_util::stream;
    use mashprint_core::SessionStore;
    use std::sync::Arc;
    use tokio_tungstenite::tungstenite::Error as WsError;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(SessionStore::default()))
    }

    /// Helper: create a stream of Message results from a vec.
    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    fn keystroke(ch: char, person: Option<&str>) -> Result<Message, WsError> {
        let json = serde_json::json!({
            "char": ch.to_string(),
            "sessionId": "ws",
            "personId": person,
        });
        Ok(Message::Text(json.to_string().into()))
    }

    fn decode(json: &str) -> Reply {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn each_text_message_gets_one_reply() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![keystroke('a', Some("p1")), keystroke('b', Some("p2"))];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        assert_eq!(decode(&rx.recv().await.unwrap()), Reply::default());
        assert_eq!(decode(&rx.recv().await.unwrap()), Reply::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn predictions_follow_training_in_order() {
        let (tx, mut rx) = mpsc::channel(256);
        let mut messages = Vec::new();
        for ch in "a".repeat(30).chars().chain("b".repeat(30).chars()) {
            messages.push(keystroke(ch, Some("tyler")));
        }
        for ch in "c".repeat(30).chars().chain("d".repeat(30).chars()) {
            messages.push(keystroke(ch, Some("pre")));
        }
        messages.push(keystroke('a', None));

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        for _ in 0..120 {
            assert_eq!(decode(&rx.recv().await.unwrap()), Reply::default());
        }
        let last = decode(&rx.recv().await.unwrap());
        assert_eq!(last.prediction.as_deref(), Some("tyler"));
    }

    #[tokio::test]
    async fn malformed_text_gets_error_reply() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![Ok(Message::Text("{\"sessionId\":\"ws\"}".into()))];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply.error.unwrap().kind, "malformed_input");
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            keystroke('a', Some("p")),
            Ok(Message::Close(None)),
            keystroke('b', Some("p")),
        ];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        // Close stopped processing before the second keystroke.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            keystroke('a', Some("p")),
            Err(WsError::ConnectionClosed),
            keystroke('b', Some("p")),
        ];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_and_ping_messages_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            keystroke('a', Some("p")),
        ];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        assert_eq!(decode(&rx.recv().await.unwrap()), Reply::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returns_err_when_channel_closed() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let messages = vec![keystroke('a', Some("p"))];
        let result =
            process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn writer_panic_is_reported() {
        let writer = tokio::spawn(async { panic!("socket gone") });
        assert!(!join_writer(writer, "test").await);

        let writer = tokio::spawn(async {});
        assert!(join_writer(writer, "test").await);
    }

    #[tokio::test]
    async fn empty_stream_completes_normally() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages: Vec<Result<Message, WsError>> = vec![];

        process_message_stream(mock_stream(messages), &dispatcher(), &tx, "test")
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
