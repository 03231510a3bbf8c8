//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Standalone OAuth 2.0 client - obtain, store, refresh and use access tokens
#[derive(Parser, Debug)]
#[command(name = "oauth2-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OAUTH2_CLIENT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "OAUTH2_CLIENT_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OAUTH2_CLIENT_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the authorization code flow through a loopback redirect
    Login {
        /// Do not send a PKCE challenge
        #[arg(long)]
        no_pkce: bool,

        /// Send the client secret as HTTP Basic auth on the code exchange
        #[arg(long)]
        basic_auth: bool,

        /// Extra authorization URL parameter (key=value), repeatable
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Seconds to wait for the browser redirect
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },

    /// Fetch a token with an explicit grant type
    Token {
        /// Grant type (client-credentials, password, refresh-token, authorization-code, or a URN)
        grant: String,

        /// Authorization code (authorization-code grant)
        #[arg(long)]
        code: Option<String>,

        /// Resource owner username (password grant)
        #[arg(long)]
        username: Option<String>,

        /// Resource owner password (password grant)
        #[arg(long, env = "OAUTH2_CLIENT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Refresh token (refresh-token grant; defaults to the stored one)
        #[arg(long)]
        refresh_token: Option<String>,

        /// Extra token request parameter (key=value), repeatable
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Refresh the stored token
    Refresh {
        /// Refresh token to use instead of the stored one
        #[arg(long)]
        refresh_token: Option<String>,
    },

    /// Show the stored token (values masked)
    Show {
        /// Print the full record as JSON, unmasked
        #[arg(long)]
        json: bool,
    },

    /// Delete the stored token
    Logout,

    /// Send an authorized HTTP request and print the response
    Request {
        /// HTTP method
        method: String,

        /// Target URL
        url: String,

        /// Extra header ("Name: value"), repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Use the stored token even if it is expired
        #[arg(long)]
        no_refresh: bool,
    },
}

/// Parse `key=value`
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse `Name: value`
fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{s}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_val() {
        assert_eq!(
            parse_key_val("audience=https://api").unwrap(),
            ("audience".to_string(), "https://api".to_string())
        );
        assert_eq!(parse_key_val("a=").unwrap(), ("a".to_string(), String::new()));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn parses_header() {
        assert_eq!(
            parse_header("X-Trace-Id:  abc ").unwrap(),
            ("X-Trace-Id".to_string(), "abc".to_string())
        );
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn parses_token_command() {
        let cli = Cli::try_parse_from([
            "oauth2-client",
            "token",
            "client-credentials",
            "--param",
            "audience=api",
        ])
        .unwrap();

        match cli.command {
            Command::Token { grant, params, .. } => {
                assert_eq!(grant, "client-credentials");
                assert_eq!(params, vec![("audience".to_string(), "api".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_request_command() {
        let cli = Cli::try_parse_from([
            "oauth2-client",
            "--log-level",
            "debug",
            "request",
            "GET",
            "https://api.example.com/me",
            "-H",
            "Accept: application/json",
            "--no-refresh",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Request {
                method,
                headers,
                no_refresh,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(headers.len(), 1);
                assert!(no_refresh);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
