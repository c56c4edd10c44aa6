use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::GithubConfig;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request to identity provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("identity provider answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("identity provider refused the code: {0}")]
    Refused(String),
}

/// What the identity provider tells us about the person signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Durable linking key, never the email.
    pub provider_user_id: i64,
    pub login: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError>;
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    api_url: String,
}

impl GithubClient {
    pub fn new(cfg: &GithubConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            token_url: cfg.token_url.clone(),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Private addresses only show up on `/user/emails`.
    async fn primary_email(&self, access_token: &str) -> Result<Option<String>, OAuthError> {
        let response = self
            .http
            .get(format!("{}/user/emails", self.api_url))
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let emails = response.json::<Vec<GithubEmail>>().await?;
        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, OAuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(OAuthError::Status { status, body })
}

#[async_trait]
impl IdentityProvider for GithubClient {
    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
        ];

        debug!("exchanging authorization code");
        let response = self
            .http
            .post(&self.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;
        let token = ensure_success(response)
            .await?
            .json::<TokenResponse>()
            .await?;

        // GitHub reports bad codes with a 200 and an `error` field.
        match (token.access_token, token.error) {
            (Some(access_token), None) => Ok(access_token),
            (_, error) => Err(OAuthError::Refused(
                token
                    .error_description
                    .or(error)
                    .unwrap_or_else(|| "no access token in response".into()),
            )),
        }
    }

    #[instrument(skip_all)]
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        let response = self
            .http
            .get(format!("{}/user", self.api_url))
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let user = ensure_success(response).await?.json::<GithubUser>().await?;

        let email = match user.email.filter(|e| !e.trim().is_empty()) {
            Some(email) => Some(email),
            None => match self.primary_email(access_token).await {
                Ok(email) => email,
                Err(e) => {
                    warn!(error = %e, github_id = user.id, "could not read github emails");
                    None
                }
            },
        };

        debug!(github_id = user.id, login = %user.login, has_email = email.is_some(), "github profile fetched");
        Ok(ProviderProfile {
            provider_user_id: user.id,
            login: user.login,
            email,
            avatar_url: user.avatar_url,
        })
    }
}
