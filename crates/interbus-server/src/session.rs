//! Broker session lifecycle: one external connection from upgrade through
//! disconnect.
//!
//! The socket is adapted into a [`TransportLink`] by the same socket pumps
//! the channel crate uses for tungstenite streams, so the provider serving
//! the session cannot tell a broker socket from an in-process connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::StreamExt;
use interbus_channel::transport::socket::{self, Inbound, MessageCodec};
use interbus_channel::{ChannelRegistry, TransportLink, read_connect, reject_connect};
use interbus_core::BusError;
use interbus_settings::ChannelSettings;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::metrics::BROKER_HANDSHAKE_REJECTS_TOTAL;

/// Wrap an upgraded axum socket as a transport link.
///
/// Closing the returned transport sends a close frame; the inbound stream
/// ends when the peer closes or the socket errors.
pub fn link(ws: WebSocket) -> TransportLink {
    let (ws_tx, ws_rx) = ws.split();
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
        Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
    },
};

/// Route one external connection to the provider it asks for.
///
/// Reads the `connect` opener, resolves the channel in `registry` (waiting
/// up to the connect timeout when the client asked to wait) and hands the
/// link to the provider, which completes the handshake and serves the
/// connection. Unknown channels are refused with `connectReject`.
///
/// On `shutdown` the socket is closed and the session runs the provider's
/// normal teardown before returning.
#[instrument(skip_all, fields(conn_id = %link.transport.id()))]
pub async fn run_broker_session(
    mut link: TransportLink,
    registry: Arc<ChannelRegistry>,
    settings: ChannelSettings,
    shutdown: CancellationToken,
) {
    let transport = Arc::clone(&link.transport);

    let request = match read_connect(&mut link, settings.connect_timeout()).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "no connect opener");
            counter!(BROKER_HANDSHAKE_REJECTS_TOTAL, "error_type" => e.code().to_owned()).increment(1);
            reject_connect(transport.as_ref(), &e);
            return;
        }
    };

    let found = if request.wait {
        registry
            .wait_for(&request.channel_name, settings.connect_timeout())
            .await
    } else {
        registry.lookup(&request.channel_name)
    };
    let Some(provider) = found else {
        info!(channel = %request.channel_name, client = %request.identity, "connect to unknown channel");
        let err = BusError::ChannelNotFound {
            channel: request.channel_name,
        };
        counter!(BROKER_HANDSHAKE_REJECTS_TOTAL, "error_type" => err.code().to_owned()).increment(1);
        reject_connect(transport.as_ref(), &err);
        return;
    };

    debug!(channel = %request.channel_name, client = %request.identity, "routing connect to provider");
    let served = provider.attach(link, request);
    tokio::pin!(served);
    tokio::select! {
        () = &mut served => return,
        () = shutdown.cancelled() => {
            debug!("closing broker session for shutdown");
            transport.close();
        }
    }
    served.await;
}
