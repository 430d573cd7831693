//! Outgoing request description.
//!
//! An [`ApiRequest`] owns everything needed to send it again: JSON bodies are
//! `serde_json::Value`s and multipart parts keep their bytes, so a request that
//! was rejected for an expired credential can be replayed verbatim.

use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::api::endpoints;
use crate::credentials::CredentialPair;
use crate::error::Result;

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Build a fresh multipart form. Forms are single-use in reqwest, so one is
    /// assembled per attempt.
    pub(crate) fn to_form(parts: &[FormPart]) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let file = Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime)?;
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// A REST call against the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, starting with `/`. May carry a query.
    pub path: String,
    pub body: RequestBody,
    /// Extra headers. An `Authorization` entry here overrides the session credential.
    pub headers: Vec<(String, String)>,
    /// Whether the request uses the session credential and may trigger a refresh.
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            headers: Vec::new(),
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json_body<T: Serialize>(self, body: &T) -> Result<Self> {
        Ok(self.json(serde_json::to_value(body)?))
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send with an explicit bearer instead of the session credential.
    pub fn bearer(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {token}"))
    }

    /// Send without credentials and never enter the refresh path.
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn has_authorization(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
    }

    /// Token of an explicit `Authorization: Bearer` header, if any.
    pub fn explicit_bearer(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
    }

    /// Prepare the request for replay after a credential rotation.
    ///
    /// The new access token replaces any Authorization header. A sign-out is
    /// rewritten to carry the new refresh token, since the one it was built
    /// with has just been invalidated by the exchange.
    pub fn rebind(&mut self, credential: &CredentialPair) {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        self.headers.push((
            AUTHORIZATION.as_str().to_string(),
            format!("Bearer {}", credential.access_token),
        ));

        if self.is_sign_out() {
            self.body = RequestBody::Json(serde_json::json!({
                "refreshToken": credential.refresh_token,
            }));
        }
    }

    fn is_sign_out(&self) -> bool {
        self.method == Method::POST
            && self.path.split('?').next() == Some(endpoints::SIGN_OUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_bearer_is_detected_case_insensitively() {
        let req = ApiRequest::get("/auth/profile").header("authorization", "Bearer abc");
        assert!(req.has_authorization());
        assert_eq!(req.explicit_bearer(), Some("abc"));

        let req = ApiRequest::get("/auth/profile");
        assert!(!req.has_authorization());
        assert_eq!(req.explicit_bearer(), None);
    }

    #[test]
    fn test_rebind_replaces_authorization() {
        let mut req = ApiRequest::get("/product/listings").bearer("old");
        req.rebind(&CredentialPair::new("new-access", "new-refresh"));

        let auth: Vec<_> = req
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("authorization"))
            .collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(req.explicit_bearer(), Some("new-access"));
        assert!(matches!(req.body, RequestBody::Empty));
    }

    #[test]
    fn test_rebind_sign_out_carries_rotated_refresh_token() {
        let mut req = ApiRequest::post(endpoints::SIGN_OUT)
            .json(serde_json::json!({ "refreshToken": "stale" }));
        req.rebind(&CredentialPair::new("a2", "r2"));

        match &req.body {
            RequestBody::Json(body) => assert_eq!(body["refreshToken"], "r2"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_rebind_leaves_other_bodies_alone() {
        let mut req = ApiRequest::post(endpoints::ASK_AI)
            .json(serde_json::json!({ "question": "Is it new?" }));
        req.rebind(&CredentialPair::new("a2", "r2"));

        match &req.body {
            RequestBody::Json(body) => assert_eq!(body["question"], "Is it new?"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_multipart_form_can_be_built_repeatedly() {
        let parts = vec![
            FormPart::text("name", "Chair"),
            FormPart::file("images", "image_0.jpg", "image/jpeg", vec![1, 2, 3]),
        ];
        assert!(RequestBody::to_form(&parts).is_ok());
        assert!(RequestBody::to_form(&parts).is_ok());

        let bad = vec![FormPart::file("images", "x", "not a mime", vec![])];
        assert!(RequestBody::to_form(&bad).is_err());
    }
}
