//! OAuth 2.0 Client Library
//!
//! A standalone OAuth 2.0 client: builds authorization URLs, exchanges grants
//! at the token endpoint, persists and refreshes tokens, and sends authorized
//! HTTP requests.
//!
//! # Features
//!
//! - **Grant types**: authorization code (with PKCE), password, client credentials, refresh token
//! - **Token storage**: in-memory or JSON file, behind the [`oauth::TokenStore`] trait
//! - **Automatic refresh**: expired tokens are refreshed once, even under concurrent use
//! - **Authorized session**: [`oauth::OAuth2Session`] injects the bearer token into requests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oauth2_client::oauth::{ClientConfig, OAuth2Client, OAuth2Session, TokenRequest};
//!
//! # async fn run() -> oauth2_client::Result<()> {
//! let config = ClientConfig::new("my-client")
//!     .with_client_secret("my-secret")
//!     .with_token_url("https://auth.example.com/token")
//!     .with_scope(["read"]);
//! let client = Arc::new(OAuth2Client::in_memory(config));
//! client.fetch_token(TokenRequest::client_credentials()).await?;
//!
//! let session = OAuth2Session::new(client);
//! let response = session.get("https://api.example.com/me").send().await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays pipeable
    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
        }
    }

    Ok(())
}
