use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use reqwest::Method;
use std::str::FromStr;

use club_client::config::{self, Command, Config, LogFormat};
use club_client::{AuthClient, MultipartBody, RequestOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;

    init_logging(&config);
    config.validate()?;

    tracing::debug!(
        base_url = %config.base_url,
        refresh_mode = ?config.refresh_mode,
        "Configuration loaded"
    );

    let client = AuthClient::new(&config)?;

    match command {
        Command::Request {
            method,
            target,
            data,
            file,
            field,
        } => run_request(&client, &method, &target, data, file, &field).await,
        Command::Login { username, password } => run_login(&client, username, password).await,
        Command::OauthCallback { url } => {
            let token = client.complete_oauth_callback(&url)?;
            println!("{}", token.expose());
            Ok(())
        }
        Command::OauthUrl => {
            println!("{}", client.oauth_login_url()?);
            Ok(())
        }
        Command::Status => {
            let logged_in = client.check_login_status().await;
            println!("{}", if logged_in { "logged in" } else { "logged out" });
            print_refreshed_token(&client, config.access_token.as_deref());
            Ok(())
        }
        Command::Refresh => {
            let token = client.refresh_credential().await?;
            println!("{}", token.expose());
            Ok(())
        }
    }
}

/// Initialize tracing with the configured level; RUST_LOG takes precedence
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run_request(
    client: &AuthClient,
    method: &str,
    target: &str,
    data: Option<String>,
    file: Option<String>,
    field: &str,
) -> Result<()> {
    let method = Method::from_str(&method.to_uppercase())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut options = RequestOptions::new(method);

    if let Some(data) = data {
        let value: serde_json::Value =
            serde_json::from_str(&data).context("--data must be valid JSON")?;
        options = options.json(value);
    } else if let Some(file) = file {
        let path = config::expand_tilde(&file);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        options = options.multipart(MultipartBody::new().file(field, file_name, None, bytes));
    }

    let before = client.store().get();
    let response = client.request(target, options).await?;
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    eprintln!("HTTP {}", status);
    println!("{}", body);

    print_refreshed_token(client, before.as_ref().map(|c| c.expose()));

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_login(
    client: &AuthClient,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let username = match username {
        Some(u) => u,
        None => Input::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };

    let password = match password {
        Some(p) => p,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let token = client.login(&username, &password).await?;
    println!("{}", token.expose());
    Ok(())
}

/// Tell the user when a refresh replaced the token they started with
fn print_refreshed_token(client: &AuthClient, initial: Option<&str>) {
    let state = client.store().snapshot();
    match state.credential {
        Some(ref current) if Some(current.expose()) != initial => {
            eprintln!("Access token was refreshed: ACCESS_TOKEN={}", current.expose());
        }
        None if initial.is_some() => {
            eprintln!("Session ended: refresh failed, log in again");
        }
        _ => {}
    }
}
