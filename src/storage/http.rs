//! HTTP client for the remote persistence service.
//!
//! `GET /api/<collection>` returns the full ordered sequence and
//! `POST /api/<collection>` replaces it. Every request carries the session
//! token as a bearer credential and is bounded by the configured timeout.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::record::Collection;
use crate::storage::traits::{RemoteBackend, StorageError};

/// Blocking HTTP implementation of [`RemoteBackend`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpRemote {
    /// Builds a client for `config`.
    ///
    /// # Errors
    /// Returns `Backend` if no base URL is configured, the token is not a
    /// valid header value, or the client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, StorageError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("remote.base_url is not set".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = config.session_token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StorageError::Backend(format!("invalid session token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| StorageError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            timeout_ms: config.timeout_ms,
        })
    }

    fn url(&self, collection: Collection) -> String {
        format!("{}/api/{collection}", self.base_url)
    }

    fn map_send_error(&self, err: &reqwest::Error) -> StorageError {
        if err.is_timeout() {
            StorageError::Timeout {
                duration_ms: self.timeout_ms,
            }
        } else {
            StorageError::Unavailable(err.to_string())
        }
    }

    fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        Err(StorageError::Status {
            code: status.as_u16(),
            message,
        })
    }
}

impl RemoteBackend for HttpRemote {
    fn fetch_collection(&self, collection: Collection) -> Result<String, StorageError> {
        let response = self
            .client
            .get(self.url(collection))
            .send()
            .map_err(|e| self.map_send_error(&e))?;
        let body = Self::check_status(response)?
            .text()
            .map_err(|e| self.map_send_error(&e))?;
        debug!(%collection, bytes = body.len(), "remote fetch");
        Ok(body)
    }

    fn replace_collection(&self, collection: Collection, payload: &str) -> Result<(), StorageError> {
        let result = self
            .client
            .post(self.url(collection))
            .body(payload.to_string())
            .send()
            .map_err(|e| self.map_send_error(&e))
            .and_then(Self::check_status);
        if let Err(e) = &result {
            warn!(%collection, error = %e, "remote replace failed");
        }
        result.map(|_| ())
    }
}
