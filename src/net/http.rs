//! Real network implementation over reqwest and tokio-tungstenite

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{socket, stream, Network, NetworkError, SocketLink, StreamLink};

/// Game server client used by live sessions
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self, NetworkError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared connection pool, custom TLS, ...)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch_health(&self, url: &Url) -> Result<(), NetworkError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        if serde_json::from_slice::<Value>(&body).is_err() {
            debug!(%url, "Health body is not JSON, accepting readable body");
        }
        Ok(())
    }

    async fn open_socket(&self, url: &Url) -> Result<SocketLink, NetworkError> {
        socket::connect(url).await
    }

    async fn open_stream(&self, url: &Url) -> Result<StreamLink, NetworkError> {
        stream::subscribe(&self.client, url).await
    }

    async fn post_json(&self, url: &Url, body: &Value) -> Result<u16, NetworkError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
