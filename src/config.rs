use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

use crate::auth::RefreshMode;

/// Club Client - authenticated access to the club backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'b', long, env = "API_BASE_URL")]
    pub base_url: String,

    /// Token-exchange endpoint, relative to the base URL
    #[arg(long, env = "REFRESH_PATH", default_value = "auth/refresh")]
    pub refresh_path: String,

    /// Password login endpoint
    #[arg(long, env = "LOGIN_PATH", default_value = "api/login")]
    pub login_path: String,

    /// Endpoint probed to check the login status
    #[arg(long, env = "PROFILE_PATH", default_value = "mypage/profile")]
    pub profile_path: String,

    /// OAuth login entry point
    #[arg(long, env = "OAUTH_PATH", default_value = "auth/google")]
    pub oauth_path: String,

    /// How the refresh secret is sent (cookie, token)
    #[arg(long, env = "REFRESH_MODE", default_value = "cookie")]
    pub refresh_mode: String,

    /// Initial access token
    #[arg(short = 't', long, env = "ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Initial refresh token (token mode)
    #[arg(long, env = "REFRESH_TOKEN")]
    pub refresh_token: Option<String>,

    /// Initial refresh cookie, e.g. "refresh_token=abc" (cookie mode)
    #[arg(long, env = "REFRESH_COOKIE")]
    pub refresh_cookie: Option<String>,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send an authenticated request and print the response
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the base URL, or an absolute URL
        target: String,

        /// JSON body
        #[arg(short, long, conflicts_with = "file")]
        data: Option<String>,

        /// File to upload as multipart
        #[arg(short, long)]
        file: Option<String>,

        /// Multipart field name for --file
        #[arg(long, default_value = "file")]
        field: String,
    },

    /// Log in with username and password
    Login {
        #[arg(short, long, env = "CLUB_USERNAME")]
        username: Option<String>,

        #[arg(short, long, env = "CLUB_PASSWORD")]
        password: Option<String>,
    },

    /// Store the access token from an OAuth callback URL
    OauthCallback {
        /// Full callback URL including the query string
        url: String,
    },

    /// Print the OAuth login URL
    OauthUrl,

    /// Check whether the current credentials are accepted
    Status,

    /// Exchange the refresh secret for a new access token
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub base_url: Url,
    pub refresh_path: String,
    pub login_path: String,
    pub profile_path: String,
    pub oauth_path: String,

    // Credentials
    pub refresh_mode: RefreshMode,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub refresh_cookie: Option<String>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Defaults for everything but the base URL
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            refresh_path: "auth/refresh".to_string(),
            login_path: "api/login".to_string(),
            profile_path: "mypage/profile".to_string(),
            oauth_path: "auth/google".to_string(),
            refresh_mode: RefreshMode::Cookie,
            access_token: None,
            refresh_token: None,
            refresh_cookie: None,
            http_connect_timeout: 10,
            http_request_timeout: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }

    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let base_url = Url::parse(&args.base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", args.base_url))?;

        Ok(Config {
            base_url,
            refresh_path: args.refresh_path.clone(),
            login_path: args.login_path.clone(),
            profile_path: args.profile_path.clone(),
            oauth_path: args.oauth_path.clone(),
            refresh_mode: parse_refresh_mode(&args.refresh_mode)?,
            access_token: non_empty(&args.access_token),
            refresh_token: non_empty(&args.refresh_token),
            refresh_cookie: non_empty(&args.refresh_cookie),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "API_BASE_URL must use http or https: {}",
                self.base_url
            );
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        if self.refresh_mode == RefreshMode::Token && self.refresh_cookie.is_some() {
            tracing::warn!("REFRESH_COOKIE is ignored by token-mode refresh");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse refresh mode from string
fn parse_refresh_mode(s: &str) -> Result<RefreshMode> {
    match s.to_lowercase().as_str() {
        "cookie" | "" => Ok(RefreshMode::Cookie),
        "token" => Ok(RefreshMode::Token),
        other => anyhow::bail!("REFRESH_MODE must be 'cookie' or 'token', got '{}'", other),
    }
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}
