//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each envelope travels as one text frame; the socket pumps live in
//! [`socket`](super::socket). Ping/pong is answered by tungstenite.

use bytes::Bytes;
use futures::StreamExt;
use interbus_core::{BusError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::TransportLink;
use super::socket::{self, Inbound, MessageCodec};

/// Open a WebSocket to a broker and wrap it as a transport link.
pub async fn connect(url: &str) -> Result<TransportLink> {
    let (stream, _) = connect_async(url).await.map_err(|e| {
        warn!(url, error = %e, "websocket connect failed");
        BusError::TransportClosed
    })?;
    debug!(url, "websocket connected");
    Ok(link(stream))
}

/// Wrap an established WebSocket stream as a transport link.
///
/// Closing the returned transport sends a close frame; the inbound stream
/// ends when the peer closes or the socket errors.
pub fn link<S>(stream: WebSocketStream<S>) -> TransportLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws_tx, ws_rx) = stream.split();
    socket::spawn_link(ws_tx, ws_rx, CODEC)
}

const CODEC: MessageCodec<Message> = MessageCodec {
    text: |text| Message::Text(text.into()),
    binary: Message::Binary,
    close: || Message::Close(None),
    inbound: |msg| match msg {
        Message::Text(text) => Inbound::Frame(Bytes::copy_from_slice(text.as_bytes())),
        Message::Binary(data) => Inbound::Frame(data),
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Skip,
    },
};
