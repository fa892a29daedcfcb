//! REST adapter for a JSON collection endpoint.
//!
//! Maps the five `RemoteSource` operations onto
//! `{base}/{collection}` and `{base}/{collection}/{key}`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::RemoteSource;
use crate::error::{RepoError, Result};
use crate::models::{Entity, Key};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub struct HttpRemoteSource<E> {
    client: Client,
    /// `{base}/{collection}`; item URLs append the key as one encoded segment.
    collection_url: Arc<Url>,
    token: Option<Arc<str>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for HttpRemoteSource<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            collection_url: Arc::clone(&self.collection_url),
            token: self.token.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> HttpRemoteSource<E> {
    pub fn new(base_url: &str, collection: &str) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, collection, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, collection: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut collection_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL {}: {}", base_url, e))?;
        collection_url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Base URL cannot take a path: {}", base_url))?
            .pop_if_empty()
            .extend(collection.split('/').filter(|s| !s.is_empty()));

        Ok(Self {
            client,
            collection_url: Arc::new(collection_url),
            token: None,
            _entity: PhantomData,
        })
    }

    /// Create a source with the given bearer token, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<Arc<str>>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    fn collection_url(&self) -> Url {
        (*self.collection_url).clone()
    }

    /// Reserved characters in the key (`/`, `?`, `#`) are percent-encoded.
    fn item_url(&self, key: &Key) -> Url {
        let mut url = self.collection_url();
        // Checked to be a base URL at construction.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key.as_str());
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, key: Option<&Key>) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        Self::check_response(response, key).await
    }

    /// Check if response is successful, returning a mapped error if not.
    async fn check_response(response: Response, key: Option<&Key>) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RepoError::from_status(key, status, &body))
        }
    }

    /// An unparseable success body counts as a server-side failure.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            debug!(error = %e, status = %status, "Failed to read remote response");
            RepoError::Unavailable(e.to_string())
        })?;
        serde_json::from_str(&text).map_err(|e| {
            debug!(error = %e, "Failed to parse remote response");
            RepoError::ServerError(status.as_u16())
        })
    }
}

#[async_trait]
impl<E> RemoteSource<E> for HttpRemoteSource<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn fetch(&self, key: &Key) -> Result<E> {
        let url = self.item_url(key);
        debug!(url = %url, "GET");
        let response = self.send(self.client.get(url), Some(key)).await?;
        Self::decode(response).await
    }

    async fn fetch_all(&self) -> Result<Vec<E>> {
        let url = self.collection_url();
        debug!(url = %url, "GET");
        let response = self.send(self.client.get(url), None).await?;
        Self::decode(response).await
    }

    async fn create(&self, entity: &E) -> Result<E> {
        let url = self.collection_url();
        let key = entity.key();
        debug!(url = %url, key = %key, "POST");
        let response = self.send(self.client.post(url).json(entity), Some(&key)).await?;
        Self::decode(response).await
    }

    async fn update(&self, entity: &E) -> Result<E> {
        let key = entity.key();
        let url = self.item_url(&key);
        debug!(url = %url, "PUT");
        let response = self.send(self.client.put(url).json(entity), Some(&key)).await?;
        Self::decode(response).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let url = self.item_url(key);
        debug!(url = %url, "DELETE");
        self.send(self.client.delete(url), Some(key)).await?;
        Ok(())
    }
}
