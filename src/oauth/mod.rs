//! OAuth 2.0 client
//!
//! Drives the authorization code (with PKCE), password, client credentials
//! and refresh token grants against a provider's token endpoint.
//!
//! Features:
//! - Authorization URL construction with PKCE (RFC 7636)
//! - Token storage behind a pluggable [`TokenStore`] (in-memory or JSON file)
//! - Expiry detection and single-flight automatic refresh
//! - [`OAuth2Session`] that attaches the current token to outbound requests
//! - Loopback callback listener for command-line authorization

pub mod callback;
mod client;
pub mod pkce;
mod session;
mod storage;
mod token;

pub use callback::CallbackListener;
pub use client::{
    AuthorizationRequest, ClientConfig, DEFAULT_TIMEOUT, GrantType, OAuth2Client, TokenRequest,
};
pub use pkce::{generate_code_challenge, generate_code_verifier};
pub use session::{OAuth2Session, SessionRequest};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{EXPIRY_MARGIN_SECS, TokenRecord, now_unix};
