//! Read-only page collaborators: metadata and the initial stroke list.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use inkwall_core::{CanonicalStroke, PageId, PageMeta};

use crate::config::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageFetchError {
    #[error("page {0} not found")]
    NotFound(PageId),
    #[error("page request failed: {0}")]
    Transport(String),
    #[error("page response unreadable: {0}")]
    Decode(String),
}

pub trait PageSource: Send + Sync {
    fn fetch_meta(&self, page_id: &PageId) -> BoxFuture<'_, Result<PageMeta, PageFetchError>>;

    /// All strokes of the page, oldest first.
    fn fetch_strokes(
        &self,
        page_id: &PageId,
    ) -> BoxFuture<'_, Result<Vec<CanonicalStroke>, PageFetchError>>;
}

/// `GET {api_url}/pages/{id}` and `GET {api_url}/pages/{id}/strokes`.
#[derive(Clone)]
pub struct HttpPageSource {
    client: Client,
    config: ClientConfig,
}

impl HttpPageSource {
    pub fn new(config: ClientConfig) -> Result<Self, PageFetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PageFetchError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        page_id: PageId,
        path: String,
    ) -> Result<T, PageFetchError> {
        let mut request = self.client.get(self.config.api_endpoint(&path));
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PageFetchError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(PageFetchError::NotFound(page_id)),
            status if !status.is_success() => {
                Err(PageFetchError::Transport(format!("HTTP {}", status.as_u16())))
            }
            _ => response
                .json::<T>()
                .await
                .map_err(|e| PageFetchError::Decode(e.to_string())),
        }
    }
}

impl PageSource for HttpPageSource {
    fn fetch_meta(&self, page_id: &PageId) -> BoxFuture<'_, Result<PageMeta, PageFetchError>> {
        let path = format!("/pages/{page_id}");
        self.get_json(page_id.clone(), path).boxed()
    }

    fn fetch_strokes(
        &self,
        page_id: &PageId,
    ) -> BoxFuture<'_, Result<Vec<CanonicalStroke>, PageFetchError>> {
        let path = format!("/pages/{page_id}/strokes");
        self.get_json(page_id.clone(), path).boxed()
    }
}
