//! Token lifecycle and the authenticated request wrapper.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::auth::browser::{Browser, SystemBrowser};
use crate::auth::exchange::{TokenExchange, TokenGrant};
use crate::auth::handler::{AuthStateHandler, StateSource};
use crate::auth::state::{AuthFlow, AuthState};
use crate::config::ProviderConfig;
use crate::error::{classify, AuthError, Result};

type Acquisition = BoxFuture<'static, Result<String>>;

/// Weak handle to the running acquisition, tagged with its generation. The
/// acquisition itself is owned by its waiters only.
struct PendingToken {
    generation: u64,
    future: WeakShared<Acquisition>,
}

/// Response of an authenticated API call that passed error classification.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Hands out valid access tokens and runs authenticated requests.
///
/// Cloning is cheap; clones share state and the pending acquisition, so
/// concurrent [`AuthProvider::token`] calls trigger at most one browser or
/// token-endpoint round trip.
///
/// # Example
/// ```no_run
/// use onedrive_auth::config::ProviderConfig;
/// use onedrive_auth::provider::AuthProvider;
///
/// # async fn example() -> onedrive_auth::error::Result<()> {
/// let provider = AuthProvider::new(
///     ProviderConfig::new("0000000048150D2D")
///         .with_client_secret("secret")
///         .with_scope(["wl.signin", "wl.offline_access", "onedrive.readwrite"])
///         .with_state_file("auth-state.json"),
/// );
/// let request = reqwest::Client::new()
///     .get("https://api.onedrive.com/v1.0/drive/root:/Music")
///     .build()?;
/// let response = provider.api(request).await?;
/// println!("{}", response.text());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthProvider {
    inner: Arc<Inner>,
}

struct Inner {
    scope: Vec<String>,
    flow: AuthFlow,
    client: reqwest::Client,
    exchange: TokenExchange,
    state: Mutex<AuthStateHandler>,
    pending: Mutex<Option<PendingToken>>,
    generation: AtomicU64,
}

/// Clears the pending slot when its acquisition finishes, fails, panics or is
/// dropped by every waiter.
struct PendingGuard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut slot = self.inner.lock_pending();
        if slot
            .as_ref()
            .is_some_and(|pending| pending.generation == self.generation)
        {
            slot.take();
        }
    }
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProvider")
            .field("scope", &self.inner.scope)
            .field("flow", &self.inner.flow)
            .field("exchange", &self.inner.exchange)
            .finish()
    }
}

impl AuthProvider {
    /// Provider using a fresh HTTP client and the system browser.
    pub fn new(config: ProviderConfig) -> Self {
        Self::from_parts(config, reqwest::Client::new(), Arc::new(SystemBrowser))
    }

    /// Provider persisting its state to `path` on every change.
    pub fn with_state_file(config: ProviderConfig, path: impl Into<PathBuf>) -> Self {
        Self::new(config.with_state(StateSource::File(path.into())))
    }

    pub fn from_parts(
        config: ProviderConfig,
        client: reqwest::Client,
        browser: Arc<dyn Browser>,
    ) -> Self {
        let exchange = TokenExchange::new(&config, client.clone(), browser);
        let ProviderConfig {
            scope, flow, state, ..
        } = config;
        Self {
            inner: Arc::new(Inner {
                scope,
                flow,
                client,
                exchange,
                state: Mutex::new(AuthStateHandler::new(state)),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register a callback fired with the current state after every change.
    ///
    /// Observers run while the state is locked and must not call back into
    /// the provider.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        self.inner.lock_state().subscribe(Arc::new(observer));
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> AuthState {
        self.inner.lock_state().get().clone()
    }

    /// Drop expired tokens and reset the state if the configured scope or
    /// flow changed. Returns the resulting state.
    pub fn validate(&self) -> Result<AuthState> {
        self.inner.validate()
    }

    /// Return a valid access token, acquiring one if needed.
    ///
    /// The acquisition lives only as long as some caller awaits it; when every
    /// waiter is dropped the flow is cancelled and the redirect listener
    /// released.
    pub async fn token(&self) -> Result<String> {
        let pending = {
            let mut slot = self.inner.lock_pending();
            let state = self.inner.validate()?;
            if let Some(token) = state.access_token() {
                return Ok(token.to_string());
            }
            match slot.as_ref().and_then(|pending| pending.future.upgrade()) {
                Some(pending) => {
                    tracing::debug!("Joining pending token acquisition");
                    pending
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let guard = PendingGuard {
                        inner: self.inner.clone(),
                        generation,
                    };
                    let acquisition = async move {
                        let guard = guard;
                        guard.inner.acquire().await
                    }
                    .boxed()
                    .shared();
                    *slot = acquisition
                        .downgrade()
                        .map(|future| PendingToken { generation, future });
                    acquisition
                }
            }
        };
        pending.await
    }

    /// Forget all credentials. The next [`AuthProvider::token`] call starts
    /// over with a full authorization.
    pub fn reset(&self) -> Result<()> {
        tracing::info!("Resetting auth state");
        self.inner.lock_state().reset()
    }

    /// Execute `request` with a bearer token.
    ///
    /// A `401` first drops the access token and retries; a second `401` in the
    /// code flow resets the whole state and retries once more. Any further
    /// `401` resets the state and fails with [`AuthError::Exhausted`].
    pub async fn api(&self, request: reqwest::Request) -> Result<ApiResponse> {
        let mut attempt: u32 = 0;
        loop {
            let token = self.token().await?;
            let mut outbound = request.try_clone().ok_or_else(|| {
                AuthError::InvalidRequest("request body cannot be replayed".to_string())
            })?;
            let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                AuthError::InvalidResponse("access token is not a valid header value".to_string())
            })?;
            outbound.headers_mut().insert(AUTHORIZATION, bearer);

            let response = self.inner.client.execute(outbound).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;

            if status != StatusCode::UNAUTHORIZED {
                return match classify(status, &body) {
                    Some(err) => Err(err),
                    None => Ok(ApiResponse {
                        status,
                        headers,
                        body,
                    }),
                };
            }

            match (attempt, self.inner.flow) {
                (0, _) => {
                    tracing::warn!(attempt, "Request unauthorized; dropping access token");
                    self.inner.lock_state().clear_access_token()?;
                }
                (1, AuthFlow::Code) => {
                    tracing::warn!(attempt, "Request unauthorized again; resetting auth state");
                    self.inner.lock_state().reset()?;
                }
                _ => {
                    tracing::warn!(
                        attempt,
                        "Request unauthorized; resetting auth state and giving up"
                    );
                    self.inner.lock_state().reset()?;
                    return Err(AuthError::Exhausted {
                        attempts: attempt + 1,
                    });
                }
            }
            attempt += 1;
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, AuthStateHandler> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingToken>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(&self) -> Result<AuthState> {
        let mut handler = self.lock_state();
        let state = handler.get().clone();
        if state.access_token().is_some() && state.is_expired() {
            tracing::debug!("Access token expired");
            handler.clear_access_token()?;
        }
        if !handler.current().matches(&self.scope, self.flow) {
            tracing::info!(
                flow = %self.flow,
                scope = ?self.scope,
                "Scope or flow changed; resetting auth state"
            );
            let (scope, flow) = (self.scope.clone(), self.flow);
            handler.update(|state| state.adopt(scope, flow))?;
        }
        Ok(handler.current().clone())
    }

    async fn acquire(&self) -> Result<String> {
        let result = match self.flow {
            AuthFlow::Token => self.acquire_implicit().await,
            AuthFlow::Code => self.acquire_by_code().await,
        };
        match &result {
            Ok(_) => tracing::info!(flow = %self.flow, "Access token acquired"),
            Err(err) => tracing::warn!(flow = %self.flow, error = %err, "Token acquisition failed"),
        }
        result
    }

    async fn acquire_implicit(&self) -> Result<String> {
        let grant = self.exchange.request_implicit_token(&self.scope).await?;
        self.apply_grant(grant)
    }

    async fn acquire_by_code(&self) -> Result<String> {
        let (mut code, refresh_token) = {
            let handler = self.lock_state();
            let state = handler.current();
            (
                state.auth_code().map(str::to_string),
                state.refresh_token().map(str::to_string),
            )
        };
        if code.is_none() && refresh_token.is_none() {
            let fresh = self.exchange.request_auth_code(&self.scope).await?;
            self.lock_state().set_auth_code(Some(fresh.clone()))?;
            code = Some(fresh);
        }
        match self
            .exchange
            .redeem(code.as_deref(), refresh_token.as_deref())
            .await
        {
            Ok(grant) => self.apply_grant(grant),
            Err(err) => {
                if refresh_token.is_none() {
                    // Codes are single use; a failed redemption spends it.
                    self.lock_state().set_auth_code(None)?;
                }
                Err(err)
            }
        }
    }

    /// Store a grant in one update.
    fn apply_grant(&self, grant: TokenGrant) -> Result<String> {
        let TokenGrant {
            access_token,
            expires_in,
            refresh_token,
        } = grant;
        let token = access_token.clone();
        self.lock_state().update(|state| {
            state.set_access_token(access_token, expires_in);
            if refresh_token.is_some() {
                state.set_refresh_token(refresh_token);
            }
            state.set_auth_code(None);
        })?;
        Ok(token)
    }
}
