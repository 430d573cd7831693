//! Single HTTP attempt and response classification.

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

use super::request::{ApiRequest, RequestBody};
use crate::error::{ApiError, Result};

/// Result of one attempt that reached the server.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx. An empty body decodes as `null`.
    Success(Value),
    /// 401, with the server's message if it sent one.
    AuthRejected { message: Option<String> },
}

/// Sends [`ApiRequest`]s relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute `req` once.
    ///
    /// `bearer` is attached only when the request is authenticated and carries
    /// no explicit Authorization header. Statuses other than 2xx and 401 are
    /// returned as [`ApiError::Application`].
    pub async fn send(&self, req: &ApiRequest, bearer: Option<&str>) -> Result<Outcome> {
        let mut builder = self.client.request(req.method.clone(), self.url(&req.path));

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if req.authenticated && !req.has_authorization() {
            if let Some(token) = bearer {
                builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
            }
        }

        builder = match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(parts) => builder.multipart(RequestBody::to_form(parts)?),
        };

        trace!(method = %req.method, path = %req.path, "Sending request");
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(
            method = %req.method,
            path = %req.path,
            status = status.as_u16(),
            "Response received"
        );

        classify(status, &bytes)
    }
}

/// Map a status and raw body onto an [`Outcome`] or an error.
pub(crate) fn classify(status: StatusCode, body: &[u8]) -> Result<Outcome> {
    if status.is_success() {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Outcome::Success(Value::Null));
        }
        return Ok(Outcome::Success(serde_json::from_slice(body)?));
    }

    let message = server_message(body);
    if status == StatusCode::UNAUTHORIZED {
        return Ok(Outcome::AuthRejected { message });
    }
    Err(ApiError::application(status, message))
}

/// The `message` field of an error body, when present.
pub(crate) fn server_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("message")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
