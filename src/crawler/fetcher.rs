//! HTTP fetching
//!
//! [`HttpFetcher`] turns a [`Task`] into a request and a received response
//! into a [`Response`], whatever its status. Transport failures are mapped to
//! [`TaskError`] codes the retry controller understands.

use crate::config::{FetchConfig, UserAgentConfig};
use crate::task::{Response, Task};
use crate::TaskError;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::time::Duration;

/// Fetches the page a task points at
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Performs the request
    ///
    /// HTTP error statuses are returned as responses, not errors; only
    /// transport failures produce `Err`.
    async fn fetch(&self, task: &Task) -> Result<Response, TaskError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Builds the HTTP client
    ///
    /// # Arguments
    ///
    /// * `fetch` - Timeout and redirect settings
    /// * `user_agent` - Identification sent with every request
    ///
    /// # Returns
    ///
    /// * `Ok(HttpFetcher)` - Successfully built fetcher
    /// * `Err(reqwest::Error)` - Failed to build the client
    pub fn new(fetch: &FetchConfig, user_agent: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent.header_value())
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(fetch.max_redirects))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            timeout: fetch.timeout(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, task: &Task) -> Result<Response, TaskError> {
        let mut request = self
            .client
            .request(task.method.clone(), &task.url)
            .timeout(task.timeout.unwrap_or(self.timeout));

        for (name, value) in &task.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &task.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(classify_error)?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(classify_error)?;

        tracing::debug!(url = %url, status, bytes = body.len(), "Fetched");

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

/// Maps a reqwest failure onto a task error code
///
/// | Failure             | Code           |
/// |---------------------|----------------|
/// | Timeout             | `ETIMEDOUT`    |
/// | Connection failure  | `ECONNREFUSED` |
/// | Body read failure   | `ECONNRESET`   |
/// | Anything else       | none           |
fn classify_error(error: reqwest::Error) -> TaskError {
    if error.is_timeout() {
        TaskError::timeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        TaskError::network("ECONNREFUSED", format!("Connection failed: {}", error))
    } else if error.is_body() || error.is_decode() {
        TaskError::network("ECONNRESET", format!("Failed to read body: {}", error))
    } else if error.is_redirect() {
        TaskError::other(format!("Redirect error: {}", error))
    } else {
        TaskError::other(error.to_string())
    }
}
