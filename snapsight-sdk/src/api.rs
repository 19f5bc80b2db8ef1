// ABOUTME: REST client for image upload, messenger toggling and authentication
// ABOUTME: Built through a typed builder; retries transient failures with backoff

use http::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use typed_builder::TypedBuilder;
use url::Url;

use crate::constants::{retry, timeouts, urls};
use crate::error::SnapError;
use crate::fetcher::sniff_mime;
use crate::mode::Mode;
use crate::retry::{retry_with_backoff, RetryConfig};

#[derive(Debug, TypedBuilder)]
#[builder(build_method(into = Result<ApiClient, SnapError>))]
pub struct ApiClientConfig {
    #[builder(default = None)]
    pub auth_token: Option<SecretString>,

    #[builder(default = None)]
    pub base_url: Option<String>,

    #[builder(default = timeouts::HTTP_REQUEST_TIMEOUT)]
    pub timeout: Duration,

    #[builder(default = retry::MAX_RETRIES)]
    pub max_retries: u32,

    #[builder(default = urls::IMAGES_PREFIX.to_string())]
    pub images_prefix: String,
}

impl From<ApiClientConfig> for Result<ApiClient, SnapError> {
    fn from(config: ApiClientConfig) -> Self {
        ApiClient::from_config(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub result: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub result: Option<UploadResult>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub is_active: bool,
    #[serde(default)]
    pub process_type: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterParams {
    pub email: String,
    #[serde(serialize_with = "expose_password")]
    pub password: SecretString,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

fn expose_password<S>(password: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(password.expose_secret())
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
    images_prefix: String,
    retry: RetryConfig,
}

impl ApiClient {
    pub fn builder() -> ApiClientConfigBuilder<((), (), (), (), ())> {
        ApiClientConfig::builder()
    }

    pub fn from_config(config: ApiClientConfig) -> Result<Self, SnapError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("snapsight/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| {
                    SnapError::Configuration("Token contains invalid characters".to_string())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SnapError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        // Trailing slash so relative joins keep the last path segment
        let mut raw = config.base_url.unwrap_or_else(|| urls::API_BASE.to_string());
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SnapError::Configuration(format!(
                "API base URL must use http:// or https://: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            images_prefix: config.images_prefix.trim_matches('/').to_string(),
            retry: RetryConfig::with_max_retries(config.max_retries),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, SnapError> {
        Ok(self.base_url.join(path)?)
    }

    fn image_endpoint(&self, mode: Mode, action: &str) -> Result<Url, SnapError> {
        self.endpoint(&format!("{}/{}/{}", self.images_prefix, mode, action))
    }

    /// Upload an image file for one-off processing by `mode`
    pub async fn upload(&self, mode: Mode, path: &Path) -> Result<UploadResponse, SnapError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        self.upload_bytes(mode, name, data).await
    }

    pub async fn upload_bytes(
        &self,
        mode: Mode,
        file_name: String,
        data: Vec<u8>,
    ) -> Result<UploadResponse, SnapError> {
        let url = self.image_endpoint(mode, "upload")?;
        let mime = sniff_mime(&data).unwrap_or("application/octet-stream");
        log::debug!("Uploading {} ({} bytes) to {}", file_name, data.len(), url);

        retry_with_backoff(&self.retry, || {
            let url = url.clone();
            let file_name = file_name.clone();
            let data = data.clone();
            async move {
                let part = Part::bytes(data)
                    .file_name(file_name)
                    .mime_str(mime)
                    .map_err(|e| SnapError::Validation(e.to_string()))?;
                let form = Form::new().part("file", part);
                let response = self.client.post(url).multipart(form).send().await?;
                parse_json(response).await
            }
        })
        .await
    }

    /// Flip the server-side messenger listener for `mode`
    pub async fn toggle_messenger(&self, mode: Mode) -> Result<ToggleResponse, SnapError> {
        let url = self.image_endpoint(mode, "messenger")?;
        retry_with_backoff(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self.client.post(url).send().await?;
                parse_json(response).await
            }
        })
        .await
    }

    /// Exchange credentials for an access token
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<TokenResponse, SnapError> {
        let url = self.endpoint("auth/token")?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password.expose_secret()),
            ])
            .send()
            .await?;
        parse_json(response).await
    }

    /// Create an account. Not retried, since a lost response may still have
    /// created the user.
    pub async fn register(&self, params: &RegisterParams) -> Result<User, SnapError> {
        let url = self.endpoint("auth/register")?;
        log::debug!("Registering {}", params.email);
        let response = self.client.post(url).json(params).send().await?;
        parse_json(response).await
    }

    pub async fn current_user(&self) -> Result<User, SnapError> {
        let url = self.endpoint("auth/me")?;
        retry_with_backoff(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self.client.get(url).send().await?;
                parse_json(response).await
            }
        })
        .await
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, SnapError> {
    let response = check_response(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        log::debug!("Unexpected response body: {}", body);
        log::debug!("Decode error: {}", e);
        SnapError::InvalidResponse
    })
}

async fn check_response(response: Response) -> Result<Response, SnapError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| value.get("detail").cloned());

    match status {
        StatusCode::UNAUTHORIZED => Err(SnapError::Auth),
        StatusCode::TOO_MANY_REQUESTS => Err(SnapError::RateLimit),
        StatusCode::UNPROCESSABLE_ENTITY => Err(SnapError::Validation(
            detail
                .as_ref()
                .map(validation_message)
                .unwrap_or_else(|| "request was rejected".to_string()),
        )),
        _ => Err(SnapError::Http {
            status: status.as_u16(),
            message: match detail {
                Some(serde_json::Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            },
        }),
    }
}

/// Flatten a validation `detail` into `loc.joined: msg` entries separated by `, `
pub fn validation_message(detail: &serde_json::Value) -> String {
    match detail {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                let location = item
                    .get("loc")
                    .and_then(|loc| loc.as_array())
                    .map(|parts| {
                        parts
                            .iter()
                            .map(|part| match part {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(".")
                    })
                    .unwrap_or_default();
                let message = item
                    .get("msg")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or("invalid value");
                if location.is_empty() {
                    message.to_string()
                } else {
                    format!("{}: {}", location, message)
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
