//! OAuth Callback Server
//!
//! A one-shot loopback HTTP listener that receives the authorization code
//! after the user approves access in the browser.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Validate the redirect against the expected state and extract the code
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            let description = self
                .error_description
                .unwrap_or_else(|| "no description".to_string());
            return Err(Error::Authorization(format!("{error}: {description}")));
        }

        let code = self
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Authorization("Missing authorization code".to_string()))?;

        match self.state {
            Some(state) if state == expected_state => Ok(code),
            Some(_) => Err(Error::Authorization("State mismatch".to_string())),
            None => Err(Error::Authorization("Missing state parameter".to_string())),
        }
    }
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<String>>>,
}

/// How long in-flight responses get to finish once the code has arrived
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Listener bound to the host and port of a loopback redirect URI
pub struct CallbackListener {
    local_addr: SocketAddr,
    rx: oneshot::Receiver<Result<String>>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl CallbackListener {
    /// Bind the redirect URI and start serving its path
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the redirect URI is not a plain-HTTP loopback
    /// address, [`Error::Io`] if the port cannot be bound.
    pub async fn bind(redirect_uri: &str, expected_state: impl Into<String>) -> Result<Self> {
        let addr = loopback_addr(redirect_uri)?;
        let path = Url::parse(redirect_uri)
            .map_err(|e| Error::Config(format!("Invalid redirect URI: {e}")))?
            .path()
            .to_string();

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, path = %path, "OAuth callback listener ready");

        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(CallbackState {
            expected_state: expected_state.into(),
            tx: Some(tx),
        }));

        let app = Router::new()
            .route(&path, get(handle_callback))
            .with_state(state);

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                debug!(error = %e, "Callback server stopped");
            }
        });

        Ok(Self {
            local_addr,
            rx,
            shutdown,
            server,
        })
    }

    /// Address actually bound (differs from the URI when it asked for port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the redirect and return the authorization code
    pub async fn wait(self) -> Result<String> {
        let Self {
            rx,
            shutdown,
            mut server,
            ..
        } = self;

        let result = rx
            .await
            .map_err(|_| Error::Authorization("Callback channel closed unexpectedly".to_string()));

        // Let the browser receive its page, then stop
        let _ = shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            server.abort();
        }
        result?
    }
}

/// Resolve the socket address of a loopback `http://` redirect URI
fn loopback_addr(redirect_uri: &str) -> Result<SocketAddr> {
    let url =
        Url::parse(redirect_uri).map_err(|e| Error::Config(format!("Invalid redirect URI: {e}")))?;
    if url.scheme() != "http" {
        return Err(Error::Config(format!(
            "Callback listener needs an http:// redirect URI, got {}",
            url.scheme()
        )));
    }

    let ip: IpAddr = match url.host() {
        Some(url::Host::Ipv4(ip)) if ip.is_loopback() => ip.into(),
        Some(url::Host::Ipv6(ip)) if ip.is_loopback() => ip.into(),
        Some(url::Host::Domain("localhost")) => Ipv4Addr::LOCALHOST.into(),
        _ => {
            return Err(Error::Config(format!(
                "Callback listener needs a loopback redirect URI, got {redirect_uri}"
            )));
        }
    };
    let port = url.port_or_known_default().unwrap_or(80);
    Ok(SocketAddr::new(ip, port))
}

/// Handle the OAuth callback
async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(has_code = params.code.is_some(), error = ?params.error, "Received OAuth callback");

    let mut state = state.lock().await;
    let result = params.into_code(&state.expected_state);
    let body = match &result {
        Ok(_) => page("Authorization complete", "You can close this window."),
        Err(e) => page("Authorization failed", &e.to_string()),
    };

    if let Some(tx) = state.tx.take() {
        let _ = tx.send(result);
    }

    Html(body)
}

fn page(title: &str, message: &str) -> String {
    let message = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_deserialize() {
        let params: CallbackParams = serde_urlencoded::from_str("code=abc123&state=xyz789").unwrap();

        assert_eq!(params.code, Some("abc123".to_string()));
        assert_eq!(params.state, Some("xyz789".to_string()));
    }

    #[test]
    fn into_code_checks_state() {
        let params: CallbackParams = serde_urlencoded::from_str("code=abc&state=good").unwrap();
        assert_eq!(params.into_code("good").unwrap(), "abc");

        let params: CallbackParams = serde_urlencoded::from_str("code=abc&state=evil").unwrap();
        assert!(matches!(params.into_code("good"), Err(Error::Authorization(_))));

        let params: CallbackParams = serde_urlencoded::from_str("code=abc").unwrap();
        assert!(matches!(params.into_code("good"), Err(Error::Authorization(_))));
    }

    #[test]
    fn into_code_reports_provider_error() {
        let params: CallbackParams =
            serde_urlencoded::from_str("error=access_denied&error_description=User+said+no&state=s")
                .unwrap();
        let err = params.into_code("s").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
        assert!(err.to_string().contains("User said no"));
    }

    #[test]
    fn loopback_addr_accepts_loopback_hosts() {
        assert_eq!(
            loopback_addr("http://127.0.0.1:8765/callback").unwrap(),
            "127.0.0.1:8765".parse().unwrap()
        );
        assert_eq!(
            loopback_addr("http://localhost:9000/cb").unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
        assert_eq!(
            loopback_addr("http://[::1]:9000/cb").unwrap(),
            "[::1]:9000".parse().unwrap()
        );
    }

    #[test]
    fn loopback_addr_rejects_remote_or_https() {
        assert!(matches!(loopback_addr("https://127.0.0.1/cb"), Err(Error::Config(_))));
        assert!(matches!(loopback_addr("http://example.com/cb"), Err(Error::Config(_))));
        assert!(matches!(loopback_addr("not a url"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn listener_returns_code_from_redirect() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/oauth/callback", "st-1")
            .await
            .unwrap();
        let url = format!(
            "http://{}/oauth/callback?code=the-code&state=st-1",
            listener.local_addr()
        );

        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap().status() });
        let code = listener.wait().await.unwrap();

        assert_eq!(code, "the-code");
        assert!(browser.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn listener_rejects_state_mismatch() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/cb", "expected")
            .await
            .unwrap();
        let url = format!("http://{}/cb?code=c&state=forged", listener.local_addr());

        tokio::spawn(async move {
            let _ = reqwest::get(url).await;
        });
        let err = listener.wait().await.unwrap_err();
        assert!(err.to_string().contains("State mismatch"));
    }
}
