//! oauth2-client - standalone OAuth 2.0 client
//!
//! Obtains, stores and refreshes access tokens, and sends authorized requests.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{error, info};

use oauth2_client::{
    Error, Result,
    cli::{Cli, Command},
    config::Config,
    oauth::{
        AuthorizationRequest, CallbackListener, GrantType, OAuth2Client, OAuth2Session,
        TokenRecord, TokenRequest,
    },
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    let client = Arc::new(OAuth2Client::new(
        config.client_config()?,
        config.token_store()?,
    ));

    match cli.command {
        Command::Login {
            no_pkce,
            basic_auth,
            params,
            wait_secs,
        } => run_login(&client, !no_pkce, basic_auth, params, wait_secs).await,
        Command::Token {
            grant,
            code,
            username,
            password,
            refresh_token,
            params,
        } => {
            let request = TokenRequest {
                code,
                username,
                password,
                refresh_token,
                extra_params: params,
                ..TokenRequest::new(grant.parse::<GrantType>()?)
            };
            let token = client.fetch_token(request).await?;
            print_summary(&token);
            Ok(ExitCode::SUCCESS)
        }
        Command::Refresh { refresh_token } => {
            let token = client.refresh_token(refresh_token).await?;
            print_summary(&token);
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { json } => {
            let Some(token) = client.store().load()? else {
                println!("No token stored.");
                return Ok(ExitCode::FAILURE);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&token)?);
            } else {
                print_summary(&token);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            client.clear_token()?;
            println!("✅ Token deleted");
            Ok(ExitCode::SUCCESS)
        }
        Command::Request {
            method,
            url,
            headers,
            data,
            no_refresh,
        } => run_request(client, &method, &url, headers, data, !no_refresh).await,
    }
}

/// Run the authorization code flow through a loopback redirect
async fn run_login(
    client: &OAuth2Client,
    use_pkce: bool,
    basic_auth: bool,
    params: Vec<(String, String)>,
    wait_secs: u64,
) -> Result<ExitCode> {
    let redirect_uri = client
        .config()
        .redirect_uri
        .clone()
        .ok_or_else(|| Error::Config("client.redirect_uri is required for login".to_string()))?;

    let request = AuthorizationRequest {
        use_pkce,
        extra_params: params,
        ..AuthorizationRequest::default()
    };
    let (auth_url, state) = client.create_authorization_url(request)?;

    // Bind before showing the URL so the redirect cannot arrive first
    let listener = CallbackListener::bind(&redirect_uri, state).await?;
    info!(addr = %listener.local_addr(), "Waiting for authorization redirect");
    println!("\nPlease authorize this client by visiting:\n{auth_url}\n");

    let code = tokio::time::timeout(Duration::from_secs(wait_secs), listener.wait())
        .await
        .map_err(|_| Error::Authorization(format!("No redirect received within {wait_secs}s")))??;

    let token = client
        .fetch_token(TokenRequest::authorization_code(code).basic_auth(basic_auth))
        .await?;
    println!("✅ Authorized");
    print_summary(&token);
    Ok(ExitCode::SUCCESS)
}

/// Send an authorized request and print status and body
async fn run_request(
    client: Arc<OAuth2Client>,
    method: &str,
    url: &str,
    headers: Vec<(String, String)>,
    data: Option<String>,
    auto_refresh: bool,
) -> Result<ExitCode> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("Invalid HTTP method: {e}")))?;

    let session = OAuth2Session::new(client);
    let mut request = session.request(method, url).auto_refresh(auto_refresh);
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::InvalidRequest(format!("Invalid header value: {e}")))?;
        request = request.header(name, value);
    }
    if let Some(body) = data {
        request = request.body(body);
    }

    let response = request.send().await?;
    let status = response.status();
    println!("HTTP {status}");
    println!("{}", response.text().await?);

    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print a token summary without exposing token values
fn print_summary(token: &TokenRecord) {
    println!("  Access token:  {}", mask(&token.access_token));
    println!("  Token type:    {}", token.token_type);
    if let Some(refresh) = &token.refresh_token {
        println!("  Refresh token: {}", mask(refresh));
    }
    if let Some(scope) = &token.scope {
        println!("  Scope:         {scope}");
    }
    match (token.expires_at, token.time_until_expiry()) {
        (None, _) => println!("  Expires:       never"),
        (Some(_), Some(left)) => println!("  Expires in:    {}s", left.as_secs()),
        (Some(_), None) => println!("  Expires:       expired"),
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(6).collect();
    if visible.len() < value.len() {
        format!("{visible}…")
    } else {
        "…".to_string()
    }
}
