//! HTTP client abstraction for testability

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AlpacaError;

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    /// Send a GET request with query-string parameters
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> crate::Result<HttpResponse>;

    /// Send a PUT request with form-encoded body
    async fn put_form(
        &self,
        url: &str,
        form: &[(String, String)],
        timeout: Duration,
    ) -> crate::Result<HttpResponse>;
}

/// Production HTTP client using reqwest
#[derive(Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for ReqwestHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestHttpClient")
            .field("basic_auth", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach HTTP basic auth credentials to every request
    pub fn with_basic_auth(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials: Some((user.into(), password.into())),
        }
    }

    /// Basic auth when credentials are given, none otherwise
    pub fn with_credentials(credentials: Option<(String, String)>) -> Self {
        match credentials {
            Some((user, password)) => Self::with_basic_auth(user, password),
            None => Self::new(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> crate::Result<HttpResponse> {
        tracing::debug!("{} {}", method, url);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| classify(method, url, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify(method, url, e))?;

        tracing::debug!("{} {} -> {} ({} bytes)", method, url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

/// Map a reqwest failure onto the transport error taxonomy
fn classify(method: &str, url: &str, e: reqwest::Error) -> AlpacaError {
    if e.is_timeout() {
        AlpacaError::Timeout(format!("{} {}", method, url))
    } else if e.is_connect() {
        AlpacaError::Unreachable(format!("{} {} failed: {}", method, url, e))
    } else {
        AlpacaError::Http(format!("{} {} failed: {}", method, url, e))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> crate::Result<HttpResponse> {
        let request = self.client.get(url).query(query).timeout(timeout);
        self.send("GET", url, request).await
    }

    async fn put_form(
        &self,
        url: &str,
        form: &[(String, String)],
        timeout: Duration,
    ) -> crate::Result<HttpResponse> {
        let request = self.client.put(url).form(form).timeout(timeout);
        self.send("PUT", url, request).await
    }
}
