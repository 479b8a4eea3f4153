use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;

use super::browser::Browser;
use super::listener::{redirect_uri, RedirectListener, RedirectPayload};
use super::state::AuthFlow;
use crate::config::ProviderConfig;
use crate::error::{from_server, AuthError};

/// Token data returned by either grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: chrono::Duration,
    pub refresh_token: Option<String>,
}

/// Credential redeemed at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantRequest<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl<'a> GrantRequest<'a> {
    /// Pick the credential to redeem. A refresh token wins over a code.
    pub fn from_parts(
        code: Option<&'a str>,
        refresh_token: Option<&'a str>,
    ) -> Result<Self, AuthError> {
        match (refresh_token, code) {
            (Some(token), _) if !token.is_empty() => Ok(Self::RefreshToken(token)),
            (_, Some(code)) if !code.is_empty() => Ok(Self::AuthorizationCode(code)),
            _ => Err(AuthError::FlowConfig(
                "provide an auth code or a refresh token".to_string(),
            )),
        }
    }

    fn grant_type(self) -> &'static str {
        match self {
            Self::AuthorizationCode(_) => "authorization_code",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Network-facing OAuth steps: the browser authorization and the token POST.
pub struct TokenExchange {
    client: reqwest::Client,
    browser: Arc<dyn Browser>,
    client_id: String,
    client_secret: Option<String>,
    authorize_url: String,
    token_url: String,
    listener_timeout: Duration,
    redirect_port: AtomicU16,
}

impl std::fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchange")
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_port", &self.redirect_port)
            .finish()
    }
}

impl TokenExchange {
    pub fn new(config: &ProviderConfig, client: reqwest::Client, browser: Arc<dyn Browser>) -> Self {
        Self {
            client,
            browser,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            listener_timeout: config.listener_timeout,
            redirect_port: AtomicU16::new(config.port),
        }
    }

    /// Redirect URI sent with authorize and token requests.
    pub fn redirect_uri(&self) -> String {
        redirect_uri(self.redirect_port.load(Ordering::SeqCst))
    }

    /// Build the authorize URL for the given scope and response type.
    pub fn authorize_url(&self, scope: &[String], flow: AuthFlow) -> Result<Url, AuthError> {
        build_authorize_url(
            &self.authorize_url,
            &self.client_id,
            scope,
            flow,
            &self.redirect_uri(),
        )
    }

    /// Bind the redirect listener, send the browser to the authorize URL and
    /// wait for the redirect.
    pub async fn authorize(
        &self,
        scope: &[String],
        flow: AuthFlow,
    ) -> Result<RedirectPayload, AuthError> {
        // Bound before navigation so the redirect cannot arrive first.
        let listener = RedirectListener::bind(self.redirect_port.load(Ordering::SeqCst)).await?;
        self.redirect_port.store(listener.port(), Ordering::SeqCst);
        let url = self.authorize_url(scope, flow)?;
        tracing::debug!(%flow, port = listener.port(), "Starting browser authorization");
        self.browser.open(url.as_str())?;
        listener.wait(self.listener_timeout).await
    }

    /// Obtain an authorization code through the browser.
    pub async fn request_auth_code(&self, scope: &[String]) -> Result<String, AuthError> {
        match self.authorize(scope, AuthFlow::Code).await? {
            RedirectPayload::Code(code) => Ok(code),
            RedirectPayload::Fragment(_) => Err(AuthError::InvalidResponse(
                "expected an authorization code, got a fragment".to_string(),
            )),
        }
    }

    /// Obtain an access token through the implicit grant.
    pub async fn request_implicit_token(&self, scope: &[String]) -> Result<TokenGrant, AuthError> {
        match self.authorize(scope, AuthFlow::Token).await? {
            RedirectPayload::Fragment(pairs) => grant_from_fragment(&pairs),
            RedirectPayload::Code(_) => Err(AuthError::InvalidResponse(
                "expected an access token fragment, got an authorization code".to_string(),
            )),
        }
    }

    /// Redeem an authorization code or a refresh token at the token endpoint.
    ///
    /// Supplying neither fails with [`AuthError::FlowConfig`] before any
    /// request is made.
    pub async fn redeem(
        &self,
        code: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let grant = GrantRequest::from_parts(code, refresh_token)?;
        let redirect_uri = self.redirect_uri();
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        match grant {
            GrantRequest::AuthorizationCode(code) => form.push(("code", code)),
            GrantRequest::RefreshToken(token) => form.push(("refresh_token", token)),
        }
        form.push(("grant_type", grant.grant_type()));

        tracing::debug!(grant_type = grant.grant_type(), "Requesting access token");
        let result = async {
            let response = self
                .client
                .post(&self.token_url)
                .header("Accept", "application/json")
                .form(&form)
                .send()
                .await?;
            let status = response.status();
            Ok::<_, reqwest::Error>((status, response.text().await?))
        }
        .await;
        let (_, body) = from_server(result)?;
        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("token response: {e}")))?;
        Ok(TokenGrant {
            access_token: payload.access_token,
            expires_in: token_lifetime(payload.expires_in)?,
            refresh_token: payload.refresh_token,
        })
    }
}

/// `<base>?client_id=..&scope=..&response_type=..&redirect_uri=..`
pub fn build_authorize_url(
    base: &str,
    client_id: &str,
    scope: &[String],
    flow: AuthFlow,
    redirect_uri: &str,
) -> Result<Url, AuthError> {
    let scope = scope.join(" ");
    Url::parse_with_params(
        base,
        &[
            ("client_id", client_id),
            ("scope", scope.as_str()),
            ("response_type", flow.response_type()),
            ("redirect_uri", redirect_uri),
        ],
    )
    .map_err(|e| AuthError::FlowConfig(format!("invalid authorize url {base}: {e}")))
}

fn grant_from_fragment(pairs: &HashMap<String, String>) -> Result<TokenGrant, AuthError> {
    let access_token = pairs
        .get("access_token")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::InvalidResponse("fragment is missing access_token".to_string()))?;
    let expires_in = pairs
        .get("expires_in")
        .ok_or_else(|| AuthError::InvalidResponse("fragment is missing expires_in".to_string()))?
        .parse::<i64>()
        .map_err(|e| AuthError::InvalidResponse(format!("invalid expires_in: {e}")))?;
    Ok(TokenGrant {
        access_token: access_token.clone(),
        expires_in: token_lifetime(expires_in)?,
        refresh_token: None,
    })
}

/// Lifetime from a server `expires_in`. Must be non-negative and yield a
/// representable expiry.
fn token_lifetime(expires_in: i64) -> Result<chrono::Duration, AuthError> {
    if expires_in < 0 {
        return Err(AuthError::InvalidResponse(format!(
            "negative expires_in: {expires_in}"
        )));
    }
    chrono::Duration::try_seconds(expires_in)
        .filter(|lifetime| Utc::now().checked_add_signed(*lifetime).is_some())
        .ok_or_else(|| AuthError::InvalidResponse(format!("expires_in out of range: {expires_in}")))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}
