use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
pub const AUTH_API_BASE_URL: &str = "https://api.smartlocker.example";
pub const LOCAL_AUTH_API_BASE_URL: &str = "http://localhost:8000";

const LOGIN_PATH: &str = "/api/auth/login/";
const PROFILE_PATH: &str = "/api/auth/profile/";
const TOKEN_REFRESH_PATH: &str = "/api/auth/token/refresh/";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthApiDefaults;

impl AuthApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}

#[derive(Clone, Debug)]
pub struct AuthApiClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AuthApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: AuthApiDefaults::CONNECT_TIMEOUT,
            request_timeout: AuthApiDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// HTTP client for the authentication service.
#[derive(Clone)]
pub struct AuthApiClient {
    http: Client,
    request_timeout: Duration,
    local: bool,
    endpoint_override: Option<String>,
}

impl AuthApiClient {
    pub fn new() -> Result<Self, AuthApiError> {
        Self::with_options(AuthApiClientOptions::default())
    }

    pub fn with_options(options: AuthApiClientOptions) -> Result<Self, AuthApiError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(AuthApiError::Transport)?;

        Ok(Self {
            http,
            request_timeout: options.request_timeout,
            local: false,
            endpoint_override: None,
        })
    }

    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit base URL override.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().trim_end_matches('/').to_string());
        self
    }

    /// Exchanges credentials for a user profile and token pair.
    ///
    /// A rejected login (400/401) surfaces as
    /// [`AuthApiError::InvalidCredentials`]; no retry is performed.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, AuthApiError> {
        let body = LoginRequest { username, password };
        let response = self
            .http
            .post(self.endpoint(LOGIN_PATH))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(AuthApiError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AuthApiError::Transport)?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(AuthApiError::InvalidCredentials(summarize_error_body(&body)));
        }
        if !status.is_success() {
            return Err(AuthApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        parse_login_response(&body)
    }

    /// Fetches the profile for the bearer of `access_token`.
    pub async fn profile(&self, access_token: &SecretString) -> Result<UserProfile, AuthApiError> {
        let response = self
            .http
            .get(self.endpoint(PROFILE_PATH))
            .timeout(self.request_timeout)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(AuthApiError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AuthApiError::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthApiError::Unauthorized(summarize_error_body(&body)));
        }
        if !status.is_success() {
            return Err(AuthApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| AuthApiError::Parse(err.to_string()))
    }

    /// Obtains a fresh access token from a refresh token.
    pub async fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<SecretString, AuthApiError> {
        let body = RefreshRequest {
            refresh: refresh_token.expose_secret(),
        };
        let response = self
            .http
            .post(self.endpoint(TOKEN_REFRESH_PATH))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(AuthApiError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AuthApiError::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthApiError::Unauthorized(summarize_error_body(&body)));
        }
        if !status.is_success() {
            return Err(AuthApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        let parsed: RefreshResponse =
            serde_json::from_str(&body).map_err(|err| AuthApiError::Parse(err.to_string()))?;
        Ok(SecretString::new(parsed.access))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    fn base_url(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_AUTH_API_BASE_URL
        } else {
            AUTH_API_BASE_URL
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Account role as reported by the accounts service.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Resident,
    DeliveryAgent,
    Support,
    Admin,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Profile of an authenticated account.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, alias = "user_type")]
    pub role: UserRole,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl UserProfile {
    /// Human-readable name, falling back to the username when the profile
    /// carries no first/last name.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// Successful login payload: profile plus token pair.
pub struct LoginResponse {
    pub user: UserProfile,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Debug, Error)]
pub enum AuthApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl AuthApiError {
    /// True when the error means the access token was rejected and a refresh
    /// may recover the request.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[derive(Debug, Deserialize)]
struct NestedLoginBody {
    user: UserProfile,
    tokens: TokenPairBody,
}

#[derive(Debug, Deserialize)]
struct TokenPairBody {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct FlatLoginBody {
    user: UserProfile,
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

fn parse_login_response(body: &str) -> Result<LoginResponse, AuthApiError> {
    if let Ok(nested) = serde_json::from_str::<NestedLoginBody>(body) {
        return Ok(LoginResponse {
            user: nested.user,
            access_token: SecretString::new(nested.tokens.access),
            refresh_token: SecretString::new(nested.tokens.refresh),
        });
    }

    if let Ok(flat) = serde_json::from_str::<FlatLoginBody>(body) {
        return Ok(LoginResponse {
            user: flat.user,
            access_token: SecretString::new(flat.access),
            refresh_token: SecretString::new(flat.refresh),
        });
    }

    Err(AuthApiError::Parse(
        "login response did not match any supported schema".to_string(),
    ))
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.detail.or(parsed.error).or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{
        parse_login_response, summarize_error_body, AuthApiClient, UserRole,
        AUTH_API_BASE_URL, LOCAL_AUTH_API_BASE_URL,
    };

    #[test]
    fn parse_nested_login_response() {
        let payload = r#"{
            "user": {"id": 1, "username": "admin", "email": "admin@smartlocker.example",
                     "first_name": "Admin", "last_name": "User", "user_type": "admin",
                     "is_verified": true},
            "tokens": {"access": "acc", "refresh": "ref"}
        }"#;
        let parsed = parse_login_response(payload).expect("parse nested login");

        assert_eq!(parsed.user.username, "admin");
        assert_eq!(parsed.user.role, UserRole::Admin);
        assert_eq!(parsed.access_token.expose_secret(), "acc");
        assert_eq!(parsed.refresh_token.expose_secret(), "ref");
    }

    #[test]
    fn parse_flat_login_response() {
        let payload = r#"{
            "user": {"id": 2, "username": "agent", "email": "agent@smartlocker.example",
                     "role": "delivery_agent"},
            "access": "acc2", "refresh": "ref2"
        }"#;
        let parsed = parse_login_response(payload).expect("parse flat login");

        assert_eq!(parsed.user.role, UserRole::DeliveryAgent);
        assert_eq!(parsed.access_token.expose_secret(), "acc2");
    }

    #[test]
    fn parse_unknown_role_falls_back() {
        let payload = r#"{
            "user": {"id": 3, "username": "ops", "email": "ops@smartlocker.example",
                     "role": "superintendent"},
            "access": "a", "refresh": "r"
        }"#;
        let parsed = parse_login_response(payload).expect("parse login");
        assert_eq!(parsed.user.role, UserRole::Unknown);
    }

    #[test]
    fn parse_rejects_tokenless_payload() {
        let payload = r#"{"user": {"id": 4, "username": "x", "email": "x@example.com"}}"#;
        assert!(parse_login_response(payload).is_err());
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let payload = r#"{
            "user": {"id": 5, "username": "plain", "email": "plain@example.com"},
            "access": "a", "refresh": "r"
        }"#;
        let parsed = parse_login_response(payload).expect("parse login");
        assert_eq!(parsed.user.display_name(), "plain");
    }

    #[test]
    fn summarize_prefers_detail_field() {
        let body = r#"{"detail": "No active account found with the given credentials"}"#;
        assert_eq!(
            summarize_error_body(body),
            "No active account found with the given credentials"
        );
    }

    #[test]
    fn summarize_truncates_non_json_body() {
        let body = "x".repeat(1000);
        assert_eq!(summarize_error_body(&body).len(), 220);
    }

    #[test]
    fn client_uses_production_base_url_by_default() {
        let client = AuthApiClient::new().expect("build client");
        assert_eq!(client.base_url(), AUTH_API_BASE_URL);
    }

    #[test]
    fn client_uses_local_base_url_when_enabled() {
        let client = AuthApiClient::new()
            .expect("build client")
            .with_local_mode(true);
        assert_eq!(client.base_url(), LOCAL_AUTH_API_BASE_URL);
    }

    #[test]
    fn client_endpoint_override_takes_precedence() {
        let client = AuthApiClient::new()
            .expect("build client")
            .with_local_mode(true)
            .with_endpoint("http://127.0.0.1:9999/   \n");
        assert_eq!(client.base_url(), "http://127.0.0.1:9999");
        assert_eq!(
            client.endpoint("/api/auth/login/"),
            "http://127.0.0.1:9999/api/auth/login/"
        );
    }
}
