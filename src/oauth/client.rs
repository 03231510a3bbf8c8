//! OAuth Client
//!
//! Builds authorization URLs, drives the token endpoint for every supported
//! grant type, and hands out stored tokens, refreshing them when they go stale.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{self, CODE_CHALLENGE_METHOD, DEFAULT_VERIFIER_BYTES};
use super::storage::{MemoryTokenStore, TokenStore};
use super::token::{TokenRecord, now_unix};
use crate::{Error, Result};

/// Default token endpoint timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client identity and endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Client ID
    pub client_id: String,
    /// Client secret (confidential clients only)
    pub client_secret: Option<String>,
    /// Token endpoint
    pub token_url: Option<String>,
    /// Authorization endpoint
    pub auth_url: Option<String>,
    /// Redirect URI registered with the provider
    pub redirect_uri: Option<String>,
    /// Requested scopes, sent space-joined
    pub scope: Vec<String>,
    /// Token endpoint request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a config with only a client ID
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_url: None,
            auth_url: None,
            redirect_uri: None,
            scope: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the client secret
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the token endpoint
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Set the authorization endpoint
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    /// Set the redirect URI
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Set the requested scopes
    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Set the token endpoint timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn joined_scope(&self) -> Option<String> {
        (!self.scope.is_empty()).then(|| self.scope.join(" "))
    }
}

/// OAuth 2.0 grant type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantType {
    /// `authorization_code`
    AuthorizationCode,
    /// `password` (resource owner credentials)
    Password,
    /// `client_credentials`
    ClientCredentials,
    /// `refresh_token`
    RefreshToken,
    /// Any other grant, sent verbatim
    Other(String),
}

impl GrantType {
    /// Wire name of the grant
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let grant = match s.trim() {
            "" => return Err(Error::InvalidRequest("Empty grant type".to_string())),
            "authorization_code" | "authorization-code" => Self::AuthorizationCode,
            "password" => Self::Password,
            "client_credentials" | "client-credentials" => Self::ClientCredentials,
            "refresh_token" | "refresh-token" => Self::RefreshToken,
            other => Self::Other(other.to_string()),
        };
        Ok(grant)
    }
}

/// Parameters for building an authorization URL
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Opaque state; a random one is generated when absent
    pub state: Option<String>,
    /// Attach a PKCE challenge (default: true)
    pub use_pkce: bool,
    /// Extra query parameters, merged last (they may override the standard ones
    /// and any query already present on the authorization endpoint)
    pub extra_params: Vec<(String, String)>,
}

impl Default for AuthorizationRequest {
    fn default() -> Self {
        Self {
            state: None,
            use_pkce: true,
            extra_params: Vec::new(),
        }
    }
}

impl AuthorizationRequest {
    /// Use a caller-chosen state value
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Enable or disable PKCE
    #[must_use]
    pub fn pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Add an extra query parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }
}

/// Parameters for a token endpoint exchange
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Grant type
    pub grant_type: GrantType,
    /// Authorization code (`authorization_code`)
    pub code: Option<String>,
    /// Resource owner username (`password`)
    pub username: Option<String>,
    /// Resource owner password (`password`)
    pub password: Option<String>,
    /// Refresh token (`refresh_token`); the stored one is used when absent
    pub refresh_token: Option<String>,
    /// Send the client secret as HTTP Basic auth (`authorization_code` only)
    pub use_basic_auth: bool,
    /// Extra form parameters, merged last
    pub extra_params: Vec<(String, String)>,
}

impl TokenRequest {
    /// Empty request for a grant type
    #[must_use]
    pub fn new(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            code: None,
            username: None,
            password: None,
            refresh_token: None,
            use_basic_auth: false,
            extra_params: Vec::new(),
        }
    }

    /// `authorization_code` grant for a received code
    pub fn authorization_code(code: impl Into<String>) -> Self {
        Self::new(GrantType::AuthorizationCode).code(code)
    }

    /// `password` grant
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::new(GrantType::Password)
        }
    }

    /// `client_credentials` grant
    #[must_use]
    pub fn client_credentials() -> Self {
        Self::new(GrantType::ClientCredentials)
    }

    /// `refresh_token` grant, falling back to the stored refresh token
    #[must_use]
    pub fn refresh(refresh_token: Option<String>) -> Self {
        Self {
            refresh_token,
            ..Self::new(GrantType::RefreshToken)
        }
    }

    /// Set the authorization code
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Request HTTP Basic client authentication
    #[must_use]
    pub fn basic_auth(mut self, enabled: bool) -> Self {
        self.use_basic_auth = enabled;
        self
    }

    /// Add an extra form parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }
}

/// Error object returned by the token endpoint (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct ProviderError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Outcome of the last refresh attempt, shared with callers that waited on it
#[derive(Default)]
struct RefreshSlot {
    last_failure: Option<Arc<Error>>,
}

/// OAuth 2.0 client bound to one token store
///
/// A PKCE verifier is kept between [`create_authorization_url`] and the
/// following authorization-code exchange. Only one authorization can be in
/// flight per client: building a second URL replaces the pending verifier.
///
/// [`create_authorization_url`]: OAuth2Client::create_authorization_url
pub struct OAuth2Client {
    /// HTTP client for token requests
    http_client: Client,

    /// Identity and endpoints
    config: ClientConfig,

    /// Token storage
    store: Arc<dyn TokenStore>,

    /// Pending PKCE verifier
    code_verifier: Mutex<Option<String>>,

    /// Serializes check-expiry -> refresh -> persist
    refresh_gate: tokio::sync::Mutex<RefreshSlot>,

    /// Bumped after every refresh attempt made under the gate
    refresh_generation: AtomicU64,
}

impl fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.config.client_id)
            .field("token_url", &self.config.token_url)
            .finish_non_exhaustive()
    }
}

impl OAuth2Client {
    /// Create a client persisting tokens through `store`
    #[must_use]
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Self {
        Self {
            http_client: Client::new(),
            config,
            store,
            code_verifier: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(RefreshSlot::default()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Create a client with a fresh in-memory store
    #[must_use]
    pub fn in_memory(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(MemoryTokenStore::new()))
    }

    /// Use a preconfigured HTTP client for token requests
    #[must_use]
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token store this client reads and writes
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Build the authorization URL for the authorization code flow
    ///
    /// Returns the URL and the state value. The caller keeps the state across
    /// the redirect and compares it on callback.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the authorization endpoint or redirect URI is
    /// missing, or the authorization endpoint is not a valid URL.
    pub fn create_authorization_url(&self, request: AuthorizationRequest) -> Result<(Url, String)> {
        let auth_url = self
            .config
            .auth_url
            .as_deref()
            .ok_or_else(|| Error::Config("Authorization URL not configured".to_string()))?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::Config("Redirect URI not configured".to_string()))?;
        let mut url = Url::parse(auth_url)
            .map_err(|e| Error::Config(format!("Invalid authorization URL: {e}")))?;

        let state = request
            .state
            .filter(|s| !s.is_empty())
            .unwrap_or_else(pkce::generate_state);

        // Pairs already on the endpoint URL are kept unless overridden below
        let mut params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        set_param(&mut params, "response_type", "code");
        set_param(&mut params, "client_id", &self.config.client_id);
        set_param(&mut params, "redirect_uri", redirect_uri);
        set_param(&mut params, "state", &state);
        if let Some(scope) = self.config.joined_scope() {
            set_param(&mut params, "scope", scope);
        }

        if request.use_pkce {
            let verifier = pkce::generate_code_verifier(DEFAULT_VERIFIER_BYTES);
            set_param(&mut params, "code_challenge", pkce::generate_code_challenge(&verifier));
            set_param(&mut params, "code_challenge_method", CODE_CHALLENGE_METHOD);
            if self.code_verifier.lock().replace(verifier).is_some() {
                debug!("Replacing pending PKCE verifier");
            }
        }

        for (key, value) in request.extra_params {
            set_param(&mut params, key, value);
        }

        url.set_query(None);
        url.query_pairs_mut().extend_pairs(&params);

        debug!(client_id = %self.config.client_id, pkce = request.use_pkce, "Built authorization URL");
        Ok((url, state))
    }

    /// Whether a PKCE verifier is waiting for an authorization-code exchange
    pub fn has_pending_verifier(&self) -> bool {
        self.code_verifier.lock().is_some()
    }

    /// Exchange credentials at the token endpoint and persist the result
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when no token endpoint is configured
    /// - [`Error::InvalidRequest`] when a grant-specific parameter is missing
    /// - [`Error::TokenExchange`] when the endpoint answers with a non-success status
    /// - [`Error::Http`] on transport failure
    /// - [`Error::Storage`] when the new token cannot be persisted
    pub async fn fetch_token(&self, request: TokenRequest) -> Result<TokenRecord> {
        let token_url = self
            .config
            .token_url
            .as_deref()
            .ok_or_else(|| Error::Config("Token URL not configured".to_string()))?;

        let grant_type = request.grant_type.clone();
        let (params, basic_auth) = self.token_params(request)?;

        debug!(grant_type = %grant_type, basic_auth, "Requesting token");

        let mut http_request = self
            .http_client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .timeout(self.config.timeout)
            .form(&params);
        if basic_auth {
            http_request =
                http_request.basic_auth(&self.config.client_id, self.config.client_secret.as_deref());
        }

        let response = http_request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(grant_type = %grant_type, status = status.as_u16(), "Token endpoint rejected request");
            return Err(exchange_error(status.as_u16(), body));
        }

        let token = serde_json::from_str::<TokenRecord>(&body)
            .map_err(|e| Error::Protocol(format!("Failed to parse token response: {e}")))?
            .stamped_at(now_unix());

        self.store.save(&token)?;

        info!(
            grant_type = %grant_type,
            expires_in = ?token.expires_in,
            has_refresh_token = token.refresh_token.is_some(),
            "Token obtained"
        );
        Ok(token)
    }

    /// Assemble the form body for a token request
    ///
    /// Returns the parameters and whether the secret goes in a Basic auth header.
    fn token_params(&self, request: TokenRequest) -> Result<(Vec<(String, String)>, bool)> {
        let TokenRequest {
            grant_type,
            code,
            username,
            password,
            refresh_token,
            use_basic_auth,
            extra_params,
        } = request;

        let mut params = Vec::new();
        set_param(&mut params, "grant_type", grant_type.as_str());
        set_param(&mut params, "client_id", &self.config.client_id);

        let basic_auth = use_basic_auth
            && grant_type == GrantType::AuthorizationCode
            && self.config.client_secret.is_some();
        if let Some(secret) = self.config.client_secret.as_deref().filter(|_| !basic_auth) {
            set_param(&mut params, "client_secret", secret);
        }

        match grant_type {
            GrantType::AuthorizationCode => {
                let code = non_empty(code)
                    .ok_or_else(|| Error::InvalidRequest("Authorization code required".to_string()))?;
                set_param(&mut params, "code", code);
                if let Some(redirect_uri) = &self.config.redirect_uri {
                    set_param(&mut params, "redirect_uri", redirect_uri);
                }
                // Single use: the verifier leaves the slot with this request
                if let Some(verifier) = self.code_verifier.lock().take() {
                    set_param(&mut params, "code_verifier", verifier);
                }
            }
            GrantType::Password => {
                let (Some(username), Some(password)) = (non_empty(username), non_empty(password))
                else {
                    return Err(Error::InvalidRequest(
                        "Username and password required for password grant".to_string(),
                    ));
                };
                set_param(&mut params, "username", username);
                set_param(&mut params, "password", password);
                if let Some(scope) = self.config.joined_scope() {
                    set_param(&mut params, "scope", scope);
                }
            }
            GrantType::ClientCredentials => {
                if let Some(scope) = self.config.joined_scope() {
                    set_param(&mut params, "scope", scope);
                }
            }
            GrantType::RefreshToken => {
                let refresh_token = match non_empty(refresh_token) {
                    Some(token) => token,
                    None => self
                        .store
                        .load()?
                        .and_then(|t| non_empty(t.refresh_token))
                        .ok_or_else(|| Error::InvalidRequest("Refresh token required".to_string()))?,
                };
                set_param(&mut params, "refresh_token", refresh_token);
            }
            GrantType::Other(_) => {}
        }

        for (key, value) in extra_params {
            set_param(&mut params, key, value);
        }

        Ok((params, basic_auth))
    }

    /// Exchange a refresh token for a new token
    ///
    /// Uses the stored refresh token when `refresh_token` is `None`.
    pub async fn refresh_token(&self, refresh_token: Option<String>) -> Result<TokenRecord> {
        self.fetch_token(TokenRequest::refresh(refresh_token)).await
    }

    /// Get the stored token, refreshing it first if it is expired
    ///
    /// Concurrent callers that find the token expired wait for a single
    /// refresh and share its outcome.
    ///
    /// # Errors
    ///
    /// [`Error::NoToken`] if nothing is stored, [`Error::TokenRefresh`] if the
    /// automatic refresh failed.
    pub async fn get_token(&self, auto_refresh: bool) -> Result<TokenRecord> {
        let generation = self.refresh_generation.load(Ordering::Acquire);

        let token = self.store.load()?.ok_or(Error::NoToken)?;
        if !auto_refresh || !token.is_expired() {
            return Ok(token);
        }

        let mut slot = self.refresh_gate.lock().await;

        // The token may have been replaced while we waited
        let token = self.store.load()?.ok_or(Error::NoToken)?;
        if !token.is_expired() {
            return Ok(token);
        }

        // A refresh finished while we waited: share its outcome, even when the
        // new token is already inside the expiry margin
        if self.refresh_generation.load(Ordering::Acquire) != generation {
            if let Some(failure) = &slot.last_failure {
                debug!("Reusing failure of concurrent refresh");
                return Err(Error::TokenRefresh(Arc::clone(failure)));
            }
            debug!("Reusing token from concurrent refresh");
            return Ok(token);
        }

        debug!("Stored token expired, refreshing");
        let outcome = self.refresh_token(None).await;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(token) => {
                slot.last_failure = None;
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Automatic token refresh failed");
                let failure = Arc::new(e);
                slot.last_failure = Some(Arc::clone(&failure));
                Err(Error::TokenRefresh(failure))
            }
        }
    }

    /// Get only the access token string
    pub async fn get_access_token(&self, auto_refresh: bool) -> Result<String> {
        Ok(self.get_token(auto_refresh).await?.access_token)
    }

    /// Whether a non-expired token is stored
    pub fn has_valid_token(&self) -> Result<bool> {
        Ok(self.store.load()?.is_some_and(|t| !t.is_expired()))
    }

    /// Delete the stored token
    pub fn clear_token(&self) -> Result<()> {
        self.store.delete()
    }
}

/// Insert a parameter, replacing any earlier value for the same key
fn set_param(params: &mut Vec<(String, String)>, key: impl Into<String>, value: impl Into<String>) {
    let key = key.into();
    let value = value.into();
    match params.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => params.push((key, value)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Build a token exchange error from a non-success response
fn exchange_error(status: u16, body: String) -> Error {
    let parsed = serde_json::from_str::<ProviderError>(&body).ok();
    let (error, description) = parsed.map_or((None, None), |p| (p.error, p.error_description));
    Error::TokenExchange {
        status,
        error,
        description,
        body,
    }
}
