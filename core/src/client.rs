//! Client facade: request building, execution and response parsing.
//!
//! # Design
//! `StofwareClient` holds only immutable configuration and a shared
//! transport. Building (`build_request`) and parsing (`parse_response`) are
//! pure; `execute` is the single place that touches the network.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::query::QueryParams;
use crate::resource::{ModelQuery, ViewQuery};
use crate::transport::{Transport, UreqTransport};

/// Entry point of the SDK.
///
/// ```no_run
/// use stofware_core::StofwareClient;
///
/// let client = StofwareClient::new("https://api.example.com", "token")?;
/// let users = client.model("users").get_all()?;
/// # Ok::<(), stofware_core::ApiError>(())
/// ```
#[derive(Clone)]
pub struct StofwareClient {
    base_url: Url,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl StofwareClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Self::from_config(ClientConfig::new(base_url).token(token))
    }

    /// A client that sends no `Authorization` header.
    pub fn anonymous(base_url: &str) -> Result<Self, ApiError> {
        Self::from_config(ClientConfig::new(base_url))
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(UreqTransport::new(config.timeout));
        Self::with_transport(config, transport)
    }

    /// Build a client over a caller-supplied transport. The config's
    /// timeout is the transport's concern and is ignored here.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ApiError> {
        let base_url = parse_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            token: config.token,
            transport,
        })
    }

    /// Copy of this client that authenticates with `token`.
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn model(&self, name: &str) -> ModelQuery<'_> {
        ModelQuery::new(self, name)
    }

    pub fn view(&self, name: &str) -> ViewQuery<'_> {
        ViewQuery::new(self, name)
    }

    /// Build a request for `{base_url}/{segments...}`. Each segment is
    /// percent-encoded on its own, so names containing `/` stay one segment.
    pub fn build_request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        segments: &[&str],
        params: Option<&QueryParams>,
        body: Option<&B>,
    ) -> Result<HttpRequest, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);

        if let Some(params) = params {
            let pairs = params.to_pairs()?;
            if !pairs.is_empty() {
                url.query_pairs_mut().extend_pairs(pairs);
            }
        }

        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }

        let body = body
            .map(|b| serde_json::to_string(b).map_err(|e| ApiError::Serialization(e.to_string())))
            .transpose()?;

        Ok(HttpRequest {
            method,
            url: url.into(),
            headers,
            body,
        })
    }

    /// Interpret a response: 2xx decodes the body as JSON (`204` yields
    /// `null`), anything else becomes `ApiError::Http`.
    pub fn parse_response(&self, response: HttpResponse) -> Result<Value, ApiError> {
        if !response.is_success() {
            warn!(status = response.status, "request failed");
            return Err(ApiError::Http {
                status: response.status,
                body: response.body,
            });
        }
        if response.status == 204 && response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    /// Send `request` once and parse the result.
    pub fn execute(&self, request: HttpRequest) -> Result<Value, ApiError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.execute(&request)?;
        self.parse_response(response)
    }
}

impl fmt::Debug for StofwareClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StofwareClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("transport", &self.transport)
            .finish()
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw.trim()).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}
