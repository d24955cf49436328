//! HTTP plumbing behind the weather lookup.
//!
//! [`HttpClient`] is the seam that lets authentication be layered on as
//! wrappers (see [`UrlParam`]) without the lookup knowing about it.

use async_trait::async_trait;
use reqwest::{Request, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::error::WeatherError;

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Plain `reqwest` client with connect and request timeouts.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new(timeout: Duration) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(WeatherError::ClientBuild)?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// An [`HttpClient`] wrapper that appends an API key as a URL query parameter.
///
/// Visual Crossing expects the key as `?key=<value>`, so `param_name` is
/// normally `"key"`.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            inner,
            param_name: param_name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

/// GETs `url` and decodes the body as JSON, treating non-2xx as an error.
pub async fn fetch_json<C, T>(client: &C, url: &str) -> Result<T, WeatherError>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    let parsed = url
        .parse()
        .map_err(|_| WeatherError::InvalidUrl(url.to_string()))?;
    let req = Request::new(reqwest::Method::GET, parsed);

    let resp = client
        .execute(req)
        .await
        .map_err(WeatherError::Request)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(WeatherError::Status(status));
    }

    resp.json().await.map_err(WeatherError::Decode)
}
