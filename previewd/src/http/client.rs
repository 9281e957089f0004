//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Failure of a call made through [`HttpClient`]
///
/// Each service client maps this into the error kind its callers expect.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{method} {url} failed: {status} - {body}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// HTTP status of the failed call, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
        }
    }
}

/// JSON HTTP client bound to one service
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, token, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn execute(
        &self,
        method: &'static str,
        url: String,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        debug!("{} {}", method, url);

        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status != StatusCode::NOT_FOUND {
                error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            }
            return Err(ApiError::Status {
                method,
                url,
                status,
                body,
            });
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.execute("GET", url.clone(), self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let request = self.client.get(&url).query(query);
        let response = self.execute("GET", url, request).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let request = self.client.post(&url).json(body);
        let response = self.execute("POST", url, request).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request, ignoring the response body
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let url = self.url(path);
        let request = self.client.post(&url).json(body);
        self.execute("POST", url, request).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        let request = self.client.delete(&url);
        self.execute("DELETE", url, request).await?;
        Ok(())
    }

    /// POST to an absolute URL outside the base URL
    pub async fn post_absolute<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let request = self.client.post(url).json(body);
        self.execute("POST", url.to_string(), request).await?;
        Ok(())
    }
}
