#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use onedrive_auth::auth::{AuthFlow, AuthState, Browser, StateSource};
use onedrive_auth::config::ProviderConfig;
use onedrive_auth::error::AuthError;
use onedrive_auth::provider::AuthProvider;
use reqwest::Url;
use wiremock::MockServer;

/// What the fake user does after the authorize page opens.
#[derive(Debug, Clone)]
pub enum Redirect {
    /// Redirect back with `?code=...`.
    Code(String),
    /// Load the relay page, then post `#<fragment>` back like its script does.
    Fragment(String),
    /// Never come back.
    Silent,
}

/// Browser stand-in that records authorize URLs and drives the redirect
/// listener over real HTTP.
pub struct FakeBrowser {
    redirect: Redirect,
    opened: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub fn new(redirect: Redirect) -> Arc<Self> {
        Arc::new(Self {
            redirect,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn code(code: &str) -> Arc<Self> {
        Self::new(Redirect::Code(code.to_string()))
    }

    pub fn fragment(fragment: &str) -> Arc<Self> {
        Self::new(Redirect::Fragment(fragment.to_string()))
    }

    pub fn silent() -> Arc<Self> {
        Self::new(Redirect::Silent)
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("browser lock poisoned").clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().expect("browser lock poisoned").len()
    }
}

impl Browser for FakeBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        self.opened
            .lock()
            .expect("browser lock poisoned")
            .push(url.to_string());
        let url = Url::parse(url).expect("authorize url");
        let redirect = url
            .query_pairs()
            .find(|(key, _)| key == "redirect_uri")
            .map(|(_, value)| value.replace("localhost", "127.0.0.1"))
            .expect("redirect_uri parameter");
        match &self.redirect {
            Redirect::Code(code) => {
                let target = format!("{redirect}/?code={code}");
                tokio::spawn(async move {
                    let _ = reqwest::get(target).await;
                });
            }
            Redirect::Fragment(fragment) => {
                let body = format!("#{fragment}");
                tokio::spawn(async move {
                    let client = reqwest::Client::new();
                    let _ = client.get(&redirect).send().await;
                    let _ = client.post(&redirect).body(body).send().await;
                });
            }
            Redirect::Silent => {}
        }
        Ok(())
    }
}

pub fn scope(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub fn config(server: &MockServer, scope_values: &[&str], flow: AuthFlow) -> ProviderConfig {
    ProviderConfig::new("client-id")
        .with_client_secret("client-secret")
        .with_scope(scope_values.iter().copied())
        .with_flow(flow)
        .with_port(0)
        .with_token_url(format!("{}/oauth20_token.srf", server.uri()))
        .with_listener_timeout(Duration::from_secs(10))
}

pub fn provider(config: ProviderConfig, browser: &Arc<FakeBrowser>) -> AuthProvider {
    AuthProvider::from_parts(config, reqwest::Client::new(), browser.clone())
}

/// State holding a valid access token (and optionally a refresh token).
pub fn authenticated_state(
    scope_values: &[&str],
    flow: AuthFlow,
    access_token: &str,
    refresh_token: Option<&str>,
) -> StateSource {
    let mut state = AuthState::new(scope(scope_values), flow);
    state.set_access_token(access_token, ChronoDuration::hours(1));
    state.set_refresh_token(refresh_token.map(str::to_string));
    StateSource::Memory(state)
}

/// Collects every state the provider reports.
pub fn record_states(provider: &AuthProvider) -> Arc<Mutex<Vec<AuthState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    provider.on_state_change(move |state: &AuthState| {
        sink.lock().expect("observer lock poisoned").push(state.clone());
    });
    seen
}
