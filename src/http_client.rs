use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Credential, CredentialStore, RefreshCoordinator, RefreshMode};
use crate::config::Config;
use crate::error::ClientError;

/// One named part of a multipart body
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub data: Bytes,
    pub file_name: Option<String>,
    pub mime: Option<String>,
}

/// Multipart form kept as plain data so it can be rebuilt for a retry
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    fields: Vec<MultipartField>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain text field
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(MultipartField {
            name: name.into(),
            data: Bytes::from(value.into()),
            file_name: None,
            mime: None,
        });
        self
    }

    /// Add a file field
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.fields.push(MultipartField {
            name: name.into(),
            data: data.into(),
            file_name: Some(file_name.into()),
            mime,
        });
        self
    }

    pub fn fields(&self) -> &[MultipartField] {
        &self.fields
    }

    fn to_form(&self) -> Result<Form, ClientError> {
        let mut form = Form::new();
        for field in &self.fields {
            let mut part = Part::bytes(field.data.to_vec());
            if let Some(ref file_name) = field.file_name {
                part = part.file_name(file_name.clone());
            }
            if let Some(ref mime) = field.mime {
                part = part
                    .mime_str(mime)
                    .map_err(|e| ClientError::InvalidHeader(format!("{}: {}", field.name, e)))?;
            }
            form = form.part(field.name.clone(), part);
        }
        Ok(form)
    }
}

/// Outbound request body
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,

    /// Structured payload, JSON-encoded on send
    Json(Value),

    /// Pre-encoded text payload
    Text(String),

    /// Opaque binary payload
    Binary(Bytes),

    /// Multipart form
    Multipart(MultipartBody),
}

impl RequestBody {
    /// Whether a JSON content type is assumed when the caller sets none
    pub fn infers_json_content_type(&self) -> bool {
        !matches!(self, RequestBody::Binary(_) | RequestBody::Multipart(_))
    }
}

/// Method, headers and body of a request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.body = RequestBody::Text(value.into());
        self
    }

    pub fn binary(mut self, data: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Binary(data.into());
        self
    }

    pub fn multipart(mut self, form: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    /// Add a header, replacing any previous value
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Merge caller headers with the inferred content type and bearer credential
pub fn build_headers(
    options: &RequestOptions,
    credential: Option<&Credential>,
) -> Result<HeaderMap, ClientError> {
    let mut headers = options.headers.clone();

    if options.body.infers_json_content_type() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    if let Some(credential) = credential {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|_| {
                ClientError::InvalidHeader("credential is not a valid header value".to_string())
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// Categorize a transport error for logging
fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

/// HTTP client for the club backend with credential refresh
///
/// Every call that needs authorization goes through [`AuthClient::request`].
/// Cloning is cheap and all clones share one credential store and one refresh
/// coordinator.
#[derive(Clone)]
pub struct AuthClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL that relative targets are joined onto
    base_url: Url,

    /// Current credential
    store: CredentialStore,

    /// Single-flight refresh
    coordinator: RefreshCoordinator,

    /// Cookie jar carrying the refresh cookie
    cookies: Arc<Jar>,

    pub(crate) login_path: String,
    pub(crate) profile_path: String,
    pub(crate) oauth_path: String,
}

impl AuthClient {
    /// Create a client with a fresh credential store, seeded from config
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_store(config, CredentialStore::new())
    }

    /// Create a client around an application-owned credential store
    pub fn with_store(config: &Config, store: CredentialStore) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(cookies.clone())
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = normalize_base(&config.base_url);
        let refresh_endpoint = base_url
            .join(config.refresh_path.trim_start_matches('/'))
            .with_context(|| format!("Invalid refresh path: {}", config.refresh_path))?;

        if let Some(ref token) = config.access_token {
            store.set(Credential::new(token.clone()));
        }
        if let Some(ref token) = config.refresh_token {
            store.set_refresh_secret(Some(Credential::new(token.clone())));
        }
        if let Some(ref cookie) = config.refresh_cookie {
            cookies.add_cookie_str(cookie, &base_url);
        }

        let coordinator = RefreshCoordinator::new(
            client.clone(),
            refresh_endpoint,
            config.refresh_mode,
            store.clone(),
        );

        Ok(Self {
            client,
            base_url,
            store,
            coordinator,
            cookies,
            login_path: config.login_path.clone(),
            profile_path: config.profile_path.clone(),
            oauth_path: config.oauth_path.clone(),
        })
    }

    /// Execute a request, refreshing the credential and retrying once on 401
    ///
    /// Any status is returned as-is; only transport failures become errors.
    /// A 401 that survives the refresh (or a failed refresh) is handed back
    /// to the caller without a third attempt.
    pub async fn request(&self, target: &str, options: RequestOptions) -> Result<Response, ClientError> {
        let url = self.resolve(target)?;
        let before = self.store.snapshot();

        let response = self
            .send_attempt(&url, &options, before.credential.as_ref(), 0)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(url = %url, "Received 401, refreshing credential...");

        match self.coordinator.refresh_since(before.generation).await {
            Ok(_) => {
                // Re-read rather than trust the refresh result
                let current = self.store.get();
                self.send_attempt(&url, &options, current.as_ref(), 1).await
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Refresh failed, returning original 401");
                Ok(response)
            }
        }
    }

    /// Execute a request and decode a JSON success body
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        let response = self.request(target, options).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn send_attempt(
        &self,
        url: &Url,
        options: &RequestOptions,
        credential: Option<&Credential>,
        attempt: u32,
    ) -> Result<Response, ClientError> {
        let request = self.build_request(url, options, credential)?;

        tracing::debug!(
            method = %options.method,
            url = %url,
            attempt = attempt,
            authorized = credential.is_some(),
            "Sending HTTP request"
        );

        match self.client.execute(request).await {
            Ok(response) => {
                tracing::debug!(
                    status = %response.status(),
                    attempt = attempt,
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    error_kind = error_kind(&e),
                    error = %e,
                    url = %url,
                    attempt = attempt,
                    "HTTP request error"
                );
                Err(ClientError::Network(e))
            }
        }
    }

    fn build_request(
        &self,
        url: &Url,
        options: &RequestOptions,
        credential: Option<&Credential>,
    ) -> Result<Request, ClientError> {
        let headers = build_headers(options, credential)?;
        let builder = self
            .client
            .request(options.method.clone(), url.clone())
            .headers(headers);

        let builder = match &options.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_vec(value)?),
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Binary(data) => builder.body(data.clone()),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        builder
            .build()
            .map_err(|e| ClientError::InvalidTarget(format!("{}: {}", url, e)))
    }

    /// Resolve an absolute URL or a path relative to the base URL
    pub fn resolve(&self, target: &str) -> Result<Url, ClientError> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }
        self.base_url
            .join(target.trim_start_matches('/'))
            .map_err(|e| ClientError::InvalidTarget(format!("{}: {}", target, e)))
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.coordinator.mode()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Seed the cookie jar, e.g. with a refresh cookie issued elsewhere
    pub fn add_cookie(&self, cookie: &str) {
        self.cookies.add_cookie_str(cookie, &self.base_url);
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Ensure the base path ends in '/' so joins append rather than replace
fn normalize_base(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
