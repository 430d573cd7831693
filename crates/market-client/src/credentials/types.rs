//! Core credential types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Access/refresh bearer pair.
///
/// Both values are opaque; nothing in this crate looks inside them. A pair is
/// created on sign-in or refresh and always replaced as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens stay out of logs.
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    format!("<{} chars>", token.chars().count())
}

/// Fixed keys of the persistent credential entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    #[serde(rename = "access-token")]
    AccessToken,
    #[serde(rename = "refresh-token")]
    RefreshToken,
}

impl StorageKey {
    pub const ALL: [StorageKey; 2] = [StorageKey::AccessToken, StorageKey::RefreshToken];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access-token",
            Self::RefreshToken => "refresh-token",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", "secret-refresh");
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<13 chars>"));
    }

    #[test]
    fn test_storage_keys_match_persisted_names() {
        assert_eq!(StorageKey::AccessToken.as_str(), "access-token");
        assert_eq!(
            serde_json::to_string(&StorageKey::RefreshToken).unwrap(),
            "\"refresh-token\""
        );
    }
}
