//! Authorized HTTP session
//!
//! Every request sent through an [`OAuth2Session`] carries the client's
//! current token. Responses come back untouched: status codes are for the
//! caller to interpret.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client, IntoUrl, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::debug;

use super::client::OAuth2Client;
use crate::{Error, Result};

/// HTTP session that injects the OAuth token into every request
#[derive(Debug, Clone)]
pub struct OAuth2Session {
    client: Arc<OAuth2Client>,
    http_client: Client,
}

impl OAuth2Session {
    /// Create a session over `client` with a default HTTP client
    #[must_use]
    pub fn new(client: Arc<OAuth2Client>) -> Self {
        Self::with_http_client(client, Client::new())
    }

    /// Create a session with a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(client: Arc<OAuth2Client>, http_client: Client) -> Self {
        Self {
            client,
            http_client,
        }
    }

    /// The OAuth client tokens come from
    pub fn client(&self) -> &Arc<OAuth2Client> {
        &self.client
    }

    /// Start a request with an arbitrary method
    pub fn request(&self, method: Method, url: impl IntoUrl) -> SessionRequest<'_> {
        SessionRequest {
            session: self,
            builder: self.http_client.request(method, url),
            auto_refresh: true,
        }
    }

    /// Start a GET request
    pub fn get(&self, url: impl IntoUrl) -> SessionRequest<'_> {
        self.request(Method::GET, url)
    }

    /// Start a POST request
    pub fn post(&self, url: impl IntoUrl) -> SessionRequest<'_> {
        self.request(Method::POST, url)
    }

    /// Start a PUT request
    pub fn put(&self, url: impl IntoUrl) -> SessionRequest<'_> {
        self.request(Method::PUT, url)
    }

    /// Start a DELETE request
    pub fn delete(&self, url: impl IntoUrl) -> SessionRequest<'_> {
        self.request(Method::DELETE, url)
    }

    /// Start a PATCH request
    pub fn patch(&self, url: impl IntoUrl) -> SessionRequest<'_> {
        self.request(Method::PATCH, url)
    }
}

/// A request being built on an [`OAuth2Session`]
#[must_use = "requests do nothing until sent"]
pub struct SessionRequest<'a> {
    session: &'a OAuth2Session,
    builder: RequestBuilder,
    auto_refresh: bool,
}

impl SessionRequest<'_> {
    /// Refresh an expired token before sending (default: true)
    pub fn auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// Add a header. An `Authorization` header is replaced by the token on send.
    pub fn header(mut self, key: HeaderName, value: HeaderValue) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }

    /// Add a set of headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.builder = self.builder.headers(headers);
        self
    }

    /// Append query parameters
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.builder = self.builder.query(query);
        self
    }

    /// Send a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        self.builder = self.builder.json(json);
        self
    }

    /// Send a form-encoded body
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        self.builder = self.builder.form(form);
        self
    }

    /// Send a raw body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Apply any other `reqwest` builder option
    pub fn with(mut self, f: impl FnOnce(RequestBuilder) -> RequestBuilder) -> Self {
        self.builder = f(self.builder);
        self
    }

    /// Attach the current token and send
    ///
    /// # Errors
    ///
    /// Token errors from [`OAuth2Client::get_token`] and transport errors.
    pub async fn send(self) -> Result<Response> {
        let token = self.session.client.get_token(self.auto_refresh).await?;

        let mut request = self.builder.build()?;
        let mut value = HeaderValue::from_str(&token.authorization_value())
            .map_err(|e| Error::Protocol(format!("Token is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        debug!(method = %request.method(), url = %request.url(), "Sending authorized request");
        Ok(self.session.http_client.execute(request).await?)
    }
}
