//! Reader and writer tasks shared by every WebSocket flavour.
//!
//! A socket library only has to say how a frame becomes one of its
//! messages and how its messages read back as frames; [`spawn_link`] does
//! the rest. Frames that are valid UTF-8 go out as text, anything else as
//! binary.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use interbus_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::debug;

use super::{QueueTransport, TransportLink};

/// What one inbound socket message means for the link.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// An envelope frame.
    Frame(Bytes),
    /// Control traffic the socket library handles itself.
    Skip,
    /// The peer is closing.
    Close,
}

/// How a socket library's message type maps onto frames.
pub struct MessageCodec<M> {
    /// Build a text message.
    pub text: fn(String) -> M,
    /// Build a binary message.
    pub binary: fn(Bytes) -> M,
    /// Build the close message sent when the transport closes.
    pub close: fn() -> M,
    /// Classify an inbound message.
    pub inbound: fn(M) -> Inbound,
}

impl<M> Clone for MessageCodec<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for MessageCodec<M> {}

impl<M> MessageCodec<M> {
    /// Wrap one outbound frame.
    pub fn encode(&self, frame: Bytes) -> M {
        match String::from_utf8(frame.to_vec()) {
            Ok(text) => (self.text)(text),
            Err(_) => (self.binary)(frame),
        }
    }
}

/// Spawn the reader and writer tasks for a split socket.
///
/// Closing the returned transport sends a close message; the inbound
/// stream ends when the peer closes or the socket errors.
pub fn spawn_link<M, Tx, Rx, E>(sink: Tx, stream: Rx, codec: MessageCodec<M>) -> TransportLink
where
    M: Send + 'static,
    Tx: Sink<M> + Unpin + Send + 'static,
    Tx::Error: Display + Send,
    Rx: Stream<Item = Result<M, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let id = ConnectionId::new();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Bytes>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();

    let _ = tokio::spawn(write_frames(id.clone(), sink, out_rx, codec));
    let _ = tokio::spawn(read_frames(id.clone(), stream, in_tx, codec.inbound));

    TransportLink::new(Arc::new(QueueTransport::new(id, out_tx)), in_rx)
}

async fn write_frames<M, Tx>(
    id: ConnectionId,
    mut sink: Tx,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    codec: MessageCodec<M>,
) where
    Tx: Sink<M> + Unpin,
    Tx::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(codec.encode(frame)).await {
            debug!(conn_id = %id, error = %e, "socket write failed");
            return;
        }
    }
    let _ = sink.send((codec.close)()).await;
    let _ = sink.close().await;
}

async fn read_frames<M, Rx, E>(
    id: ConnectionId,
    mut stream: Rx,
    inbound: mpsc::UnboundedSender<Bytes>,
    classify: fn(M) -> Inbound,
) where
    Rx: Stream<Item = Result<M, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        let frame = match msg.map(classify) {
            Ok(Inbound::Frame(frame)) => frame,
            Ok(Inbound::Skip) => continue,
            Ok(Inbound::Close) => break,
            Err(e) => {
                debug!(conn_id = %id, error = %e, "socket read failed");
                break;
            }
        };
        if inbound.send(frame).is_err() {
            break;
        }
    }
}
