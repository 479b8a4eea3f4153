//! Provider configuration (code, with an optional environment layer).

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::handler::StateSource;
use crate::auth::state::AuthFlow;
use crate::error::AuthError;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://login.live.com/oauth20_authorize.srf";
pub const DEFAULT_TOKEN_URL: &str = "https://login.live.com/oauth20_token.srf";
pub const DEFAULT_REDIRECT_PORT: u16 = 52763;
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for an [`AuthProvider`](crate::provider::AuthProvider).
///
/// # Example
/// ```
/// use onedrive_auth::auth::AuthFlow;
/// use onedrive_auth::config::ProviderConfig;
///
/// let config = ProviderConfig::new("0000000048150D2D")
///     .with_client_secret("secret")
///     .with_scope(["wl.signin", "wl.offline_access", "onedrive.readwrite"])
///     .with_flow(AuthFlow::Code);
/// assert_eq!(config.port, 52763);
/// ```
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: Vec<String>,
    pub flow: AuthFlow,
    pub port: u16,
    pub authorize_url: String,
    pub token_url: String,
    pub listener_timeout: Duration,
    pub state: StateSource,
}

impl ProviderConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            scope: Vec::new(),
            flow: AuthFlow::default(),
            port: DEFAULT_REDIRECT_PORT,
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            listener_timeout: DEFAULT_LISTENER_TIMEOUT,
            state: StateSource::default(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flow(mut self, flow: AuthFlow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// How long to wait for the browser redirect before giving up.
    pub fn with_listener_timeout(mut self, timeout: Duration) -> Self {
        self.listener_timeout = timeout;
        self
    }

    pub fn with_state(mut self, state: StateSource) -> Self {
        self.state = state;
        self
    }

    pub fn with_state_file(self, path: impl Into<PathBuf>) -> Self {
        self.with_state(StateSource::File(path.into()))
    }

    /// Load from environment variables (`ONEDRIVE_CLIENT_ID`,
    /// `ONEDRIVE_CLIENT_SECRET`, `ONEDRIVE_SCOPE`, `ONEDRIVE_AUTH_FLOW`,
    /// `ONEDRIVE_REDIRECT_PORT`, `ONEDRIVE_AUTH_STATE`). Without
    /// `ONEDRIVE_AUTH_STATE` the state lives in `~/.onedrive-auth/auth-state.json`.
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = lookup("ONEDRIVE_CLIENT_ID")
            .ok_or_else(|| AuthError::FlowConfig("ONEDRIVE_CLIENT_ID is not set".to_string()))?;
        let mut config = Self::new(client_id);
        if let Some(secret) = lookup("ONEDRIVE_CLIENT_SECRET") {
            config = config.with_client_secret(secret);
        }
        if let Some(scope) = lookup("ONEDRIVE_SCOPE") {
            config = config.with_scope(
                scope
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty()),
            );
        }
        if let Some(flow) = lookup("ONEDRIVE_AUTH_FLOW") {
            let flow = flow.trim().parse::<AuthFlow>().map_err(|_| {
                AuthError::FlowConfig(format!(
                    "invalid auth flow {flow:?}; only 'code' or 'token' is allowed"
                ))
            })?;
            config = config.with_flow(flow);
        }
        if let Some(port) = lookup("ONEDRIVE_REDIRECT_PORT") {
            let port = port.trim().parse::<u16>().map_err(|e| {
                AuthError::FlowConfig(format!("invalid ONEDRIVE_REDIRECT_PORT {port:?}: {e}"))
            })?;
            config = config.with_port(port);
        }
        config = match lookup("ONEDRIVE_AUTH_STATE") {
            Some(path) => config.with_state_file(path),
            None => config.with_state(StateSource::default_file()),
        };
        Ok(config)
    }
}
