//! WebSocket primary transport with split read/write tasks

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{NetworkError, SocketLink};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

/// Connect and bridge the socket onto a [`SocketLink`]
pub(crate) async fn connect(url: &Url) -> Result<SocketLink, NetworkError> {
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!(%url, "WebSocket connected");

    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    // Writer: drains every queued frame, then closes the socket once the link is dropped
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(frame)).await {
                debug!(error = %e, "WebSocket send failed");
                return;
            }
        }
        if let Err(e) = ws_sink.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(result) = ws_source.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!("Received binary frame, ignoring");
                }
                Ok(Message::Close(_)) => {
                    info!("Server closed WebSocket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    Ok(SocketLink::new(outbound_tx, inbound_rx).with_reader(reader.abort_handle()))
}
