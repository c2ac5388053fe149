// Plain TCP listener: one JSON keystroke per connection.
//
// The client connects, writes a single JSON request (optionally terminated by
// a newline), and reads back a single JSON reply before the server closes the
// connection. Every connection is served on its own task.

use std::time::Duration;

use anyhow::Context;
use mashprint_core::Dispatcher;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::{respond, Reply, RequestError};

/// Per-connection bounds on what a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest accepted request, in bytes.
    pub max_message_bytes: usize,
    /// How long a client has to deliver a complete request.
    pub read_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        ConnectionLimits {
            max_message_bytes: 1024,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Bind the TCP listener on `addr` (e.g. `127.0.0.1:65432`).
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))
}

/// Accept connections forever, serving each on its own task.
pub async fn run(
    listener: TcpListener,
    dispatcher: Dispatcher,
    limits: ConnectionLimits,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("TCP listener ready on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted TCP connection from {addr}");

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &dispatcher, limits).await {
                warn!("TCP connection from {addr} failed: {e:#}");
            }
        });
    }
}

/// Read one request from `stream`, answer it, and shut the write side down.
/// A client that does not finish its request within the read timeout gets a
/// `malformed_input` reply.
///
/// Generic over the stream so it can be tested with in-memory duplex pipes.
pub async fn serve_connection<S>(
    mut stream: S,
    dispatcher: &Dispatcher,
    limits: ConnectionLimits,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max = limits.max_message_bytes;
    let reply = match timeout(limits.read_timeout, read_message(&mut stream, max)).await {
        Ok(read) => {
            let raw = read.context("failed to read request")?;
            answer(dispatcher, raw, max).await
        }
        Err(_) => {
            debug!("Client sent no complete request within {:?}", limits.read_timeout);
            Reply::from(RequestError::MalformedInput(format!(
                "no complete request within {} ms",
                limits.read_timeout.as_millis()
            )))
        }
    };

    let json = reply.to_json().context("failed to encode reply")?;
    stream
        .write_all(json.as_bytes())
        .await
        .context("failed to write reply")?;
    stream.shutdown().await.context("failed to close connection")?;
    Ok(())
}

async fn answer(dispatcher: &Dispatcher, raw: Vec<u8>, max: usize) -> Reply {
    if raw.len() > max {
        return Reply::from(RequestError::MalformedInput(format!(
            "request exceeds {max} bytes"
        )));
    }
    match String::from_utf8(raw) {
        Ok(text) => respond(dispatcher, text).await,
        Err(_) => Reply::from(RequestError::MalformedInput(
            "request is not valid UTF-8".into(),
        )),
    }
}

/// Read until the first newline, end of stream, a complete JSON value, or
/// more than `max` bytes, whichever comes first. The newline is not included.
async fn read_message<R>(read: &mut R, max: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = read.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(pos);
            break;
        }
        if buf.len() > max || serde_json::from_slice::<serde_json::Value>(&buf).is_ok() {
            break;
        }
    }
    Ok(buf)
}
