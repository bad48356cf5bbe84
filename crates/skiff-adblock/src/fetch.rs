//! Filter list transport.
//!
//! [`ListFetcher`] is the seam between the filter list manager and the
//! network; the production implementation wraps [`HttpClient`].

use crate::client::{HttpClient, HttpClientConfig, HttpError};
use std::future::Future;
use url::Url;

/// Downloads the raw contents of one filter list
pub trait ListFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<Vec<u8>, HttpError>> + Send;
}

/// [`ListFetcher`] over HTTP(S). Non-2xx answers count as failures.
pub struct HttpListFetcher {
    client: HttpClient,
}

impl HttpListFetcher {
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            client: HttpClient::new(config),
        }
    }
}

impl Default for HttpListFetcher {
    fn default() -> Self {
        Self::new(HttpClientConfig::default())
    }
}

impl ListFetcher for HttpListFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, HttpError> {
        let response = self.client.get(url).await?;
        if !response.is_success() {
            return Err(HttpError::Status(response.status.as_u16()));
        }
        Ok(response.body)
    }
}
