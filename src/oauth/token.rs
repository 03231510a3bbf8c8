//! Token record
//!
//! The unit of state the client persists after every token-endpoint exchange.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};

/// Seconds before `expires_at` at which a token is already treated as expired
pub const EXPIRY_MARGIN_SECS: f64 = 10.0;

/// OAuth token record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Lifetime in seconds as reported by the provider
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,

    /// Expiration time (Unix timestamp, may carry a fraction)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,

    /// Provider-specific members (`id_token`, ...), kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Accept `expires_in` as a number or a numeric string
///
/// Fractional lifetimes round up to whole seconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Int(n)) => Ok(Some(n)),
        Some(Seconds::Float(f)) if f >= 0.0 => Ok(Some(f.ceil() as u64)),
        Some(Seconds::Float(f)) => Err(serde::de::Error::custom(format!(
            "negative expires_in: {f}"
        ))),
        Some(Seconds::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Current time as a Unix timestamp with sub-second precision
#[must_use]
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl TokenRecord {
    /// Create a bearer record with only an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            scope: None,
            expires_in: None,
            expires_at: None,
            extra: BTreeMap::new(),
        }
    }

    /// Derive `expires_at` from `expires_in` relative to `received_at`
    ///
    /// An `expires_at` already present (e.g. sent by the provider) wins.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stamped_at(mut self, received_at: f64) -> Self {
        if self.expires_at.is_none() {
            if let Some(secs) = self.expires_in {
                self.expires_at = Some(received_at + secs as f64);
            }
        }
        self
    }

    /// Check whether the token is expired at `now`, including the safety margin
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + EXPIRY_MARGIN_SECS,
            // No expiry = doesn't expire
            None => false,
        }
    }

    /// Check whether the token is expired now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_unix())
    }

    /// Time until expiration (without the safety margin)
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let remaining = self.expires_at? - now_unix();
        if remaining > 0.0 {
            Duration::try_from_secs_f64(remaining).ok()
        } else {
            None
        }
    }

    /// Value for an `Authorization` header
    #[must_use]
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_at_is_derived_from_expires_in() {
        let token = TokenRecord {
            expires_in: Some(3600),
            ..TokenRecord::new("abc")
        }
        .stamped_at(1_000.0);
        assert_eq!(token.expires_at, Some(4_600.0));
    }

    #[test]
    fn provider_expires_at_is_not_overwritten() {
        let token = TokenRecord {
            expires_in: Some(3600),
            expires_at: Some(42.0),
            ..TokenRecord::new("abc")
        }
        .stamped_at(1_000.0);
        assert_eq!(token.expires_at, Some(42.0));
    }

    #[test]
    fn expiry_honours_ten_second_margin() {
        let token = TokenRecord {
            expires_in: Some(3600),
            ..TokenRecord::new("abc")
        }
        .stamped_at(0.0);

        assert!(!token.is_expired_at(0.0));
        assert!(!token.is_expired_at(3589.0));
        assert!(token.is_expired_at(3590.0));
        assert!(token.is_expired_at(3600.0));
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let token = TokenRecord::new("abc");
        assert!(!token.is_expired());
        assert!(!token.is_expired_at(f64::MAX / 2.0));
        assert!(token.time_until_expiry().is_none());
    }

    #[test]
    fn fresh_token_is_not_expired() {
        let token = TokenRecord {
            expires_in: Some(3600),
            ..TokenRecord::new("abc")
        }
        .stamped_at(now_unix());
        assert!(!token.is_expired());
        let remaining = token.time_until_expiry().unwrap();
        assert!(remaining > Duration::from_secs(3590));
    }

    #[test]
    fn decodes_minimal_response_with_defaults() {
        let token: TokenRecord = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(token.access_token, "xyz");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_none());
        assert!(token.extra.is_empty());
    }

    #[test]
    fn decodes_string_expires_in_and_keeps_extras() {
        let token: TokenRecord = serde_json::from_str(
            r#"{"access_token":"xyz","token_type":"bearer","expires_in":"120","id_token":"jwt"}"#,
        )
        .unwrap();
        assert_eq!(token.expires_in, Some(120));
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.extra.get("id_token"), Some(&serde_json::json!("jwt")));

        let encoded = serde_json::to_value(&token).unwrap();
        assert_eq!(encoded["id_token"], "jwt");
    }

    #[test]
    fn fractional_expires_in_rounds_up() {
        let token: TokenRecord =
            serde_json::from_str(r#"{"access_token":"xyz","expires_in":0.9}"#).unwrap();
        assert_eq!(token.expires_in, Some(1));

        let token: TokenRecord =
            serde_json::from_str(r#"{"access_token":"xyz","expires_in":3599.2}"#).unwrap();
        assert_eq!(token.expires_in, Some(3600));

        assert!(serde_json::from_str::<TokenRecord>(r#"{"access_token":"x","expires_in":-1.5}"#).is_err());
    }

    #[test]
    fn decodes_integer_expires_at() {
        let token: TokenRecord =
            serde_json::from_str(r#"{"access_token":"xyz","expires_at":1700000000}"#).unwrap();
        assert_eq!(token.expires_at, Some(1_700_000_000.0));
    }

    #[test]
    fn authorization_value_uses_token_type() {
        let token = TokenRecord {
            token_type: "MAC".to_string(),
            ..TokenRecord::new("abc")
        };
        assert_eq!(token.authorization_value(), "MAC abc");
    }
}
