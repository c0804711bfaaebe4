//! Server-sent event stream used as the fallback transport

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::{NetworkError, StreamLink};

const INBOUND_BUFFER: usize = 256;

/// Subscribe to the event stream and forward each event's data as a frame
pub(crate) async fn subscribe(client: &Client, url: &Url) -> Result<StreamLink, NetworkError> {
    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(NetworkError::Status(status.as_u16()));
    }
    info!(%url, "Event stream connected");

    let mut events = Box::pin(response.bytes_stream().eventsource());
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    let task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    let frame = tag_with_event_name(&event.event, event.data);
                    if inbound_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Event stream error");
                    break;
                }
            }
        }
        debug!("Event stream ended");
    });

    Ok(StreamLink::new(inbound_rx).with_task(task.abort_handle()))
}

/// Named SSE events (`event: hit`) may omit `type` from their JSON body
fn tag_with_event_name(event_name: &str, data: String) -> String {
    if event_name.is_empty() || event_name == "message" {
        return data;
    }
    match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(mut object)) if !object.contains_key("type") => {
            object.insert("type".into(), Value::String(event_name.to_string()));
            Value::Object(object).to_string()
        }
        _ => data,
    }
}
