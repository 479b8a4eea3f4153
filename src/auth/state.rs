use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// OAuth grant used to obtain access tokens.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthFlow {
    /// Authorization-code grant with refresh tokens.
    #[default]
    Code,
    /// Implicit grant; the token arrives in the redirect fragment.
    Token,
}

impl AuthFlow {
    /// Value of the `response_type` authorize parameter.
    pub fn response_type(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }
}

/// Cached authentication state.
///
/// Serializes to the persisted JSON form:
/// `{"scope": [..], "flow": "code", "accessToken": .., "expires": <epoch ms>,
/// "refreshToken": .., "authCode": ..}`.
///
/// # Example
/// ```
/// use onedrive_auth::auth::{AuthFlow, AuthState};
///
/// let state = AuthState::new(vec!["onedrive.readwrite".to_string()], AuthFlow::Code);
/// assert!(state.access_token().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PersistedState", into = "PersistedState")]
pub struct AuthState {
    scope: Vec<String>,
    flow: AuthFlow,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
    auth_code: Option<String>,
}

impl AuthState {
    pub fn new(scope: Vec<String>, flow: AuthFlow) -> Self {
        Self {
            scope,
            flow,
            ..Self::default()
        }
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn flow(&self) -> AuthFlow {
        self.flow
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }

    /// Whether the stored expiry lies in the past. A state without an expiry
    /// counts as expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at <= now)
    }

    /// Store a fresh access token valid for `expires_in` from now. Lifetimes
    /// past the representable range saturate.
    pub fn set_access_token(&mut self, token: impl Into<String>, expires_in: Duration) {
        let expires_at = Utc::now()
            .checked_add_signed(expires_in)
            .unwrap_or(if expires_in < Duration::zero() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        self.access_token = Some(token.into());
        self.expires_at = Some(expires_at);
    }

    /// Drop the access token but keep the refresh token and any auth code.
    pub fn clear_access_token(&mut self) {
        self.access_token = None;
    }

    pub fn set_refresh_token(&mut self, token: Option<String>) {
        self.refresh_token = token;
    }

    pub fn set_auth_code(&mut self, code: Option<String>) {
        self.auth_code = code;
    }

    /// Clear every credential; scope and flow are kept.
    pub fn reset(&mut self) {
        self.access_token = None;
        self.expires_at = None;
        self.refresh_token = None;
        self.auth_code = None;
    }

    /// Reset and take over a new scope and flow.
    pub fn adopt(&mut self, scope: Vec<String>, flow: AuthFlow) {
        self.reset();
        self.scope = scope;
        self.flow = flow;
    }

    /// Whether this state was created for the given scope and flow.
    pub fn matches(&self, scope: &[String], flow: AuthFlow) -> bool {
        self.flow == flow && scope_equal(&self.scope, scope)
    }
}

/// Set equality on scopes: same size and every element of `a` present in `b`.
///
/// ```
/// use onedrive_auth::auth::scope_equal;
///
/// let a = vec!["a".to_string(), "b".to_string()];
/// let c = vec!["a".to_string(), "c".to_string()];
/// assert!(!scope_equal(&a, &c));
/// ```
pub fn scope_equal(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|s| b.contains(s))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PersistedState {
    scope: Vec<String>,
    flow: AuthFlow,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    expires: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_code: Option<String>,
}

impl From<PersistedState> for AuthState {
    fn from(raw: PersistedState) -> Self {
        let expires_at = match raw.expires {
            0 => None,
            ms => DateTime::<Utc>::from_timestamp_millis(ms),
        };
        // An access token without a usable expiry cannot be trusted.
        let access_token = raw.access_token.filter(|_| expires_at.is_some());
        Self {
            scope: raw.scope,
            flow: raw.flow,
            access_token,
            expires_at,
            refresh_token: raw.refresh_token,
            auth_code: raw.auth_code,
        }
    }
}

impl From<AuthState> for PersistedState {
    fn from(state: AuthState) -> Self {
        Self {
            scope: state.scope,
            flow: state.flow,
            access_token: state.access_token,
            expires: state.expires_at.map_or(0, |at| at.timestamp_millis()),
            refresh_token: state.refresh_token,
            auth_code: state.auth_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scope_equal_is_set_equality() {
        assert!(scope_equal(&scope(&["a", "b"]), &scope(&["b", "a"])));
        assert!(scope_equal(&scope(&[]), &scope(&[])));
        assert!(!scope_equal(&scope(&["a", "b"]), &scope(&["a", "c"])));
        assert!(!scope_equal(&scope(&["a"]), &scope(&["a", "b"])));
    }

    #[test]
    fn flow_parses_and_displays_lowercase() {
        assert_eq!("code".parse::<AuthFlow>().unwrap(), AuthFlow::Code);
        assert_eq!("token".parse::<AuthFlow>().unwrap(), AuthFlow::Token);
        assert!("password".parse::<AuthFlow>().is_err());
        assert_eq!(AuthFlow::Token.to_string(), "token");
        assert_eq!(AuthFlow::Code.response_type(), "code");
    }

    #[test]
    fn reset_keeps_scope_and_flow() {
        let mut state = AuthState::new(scope(&["wl.signin"]), AuthFlow::Code);
        state.set_access_token("access", Duration::seconds(3600));
        state.set_refresh_token(Some("refresh".to_string()));
        state.set_auth_code(Some("code".to_string()));

        state.reset();

        assert_eq!(state.scope(), scope(&["wl.signin"]).as_slice());
        assert_eq!(state.flow(), AuthFlow::Code);
        assert!(state.access_token().is_none());
        assert!(state.expires_at().is_none());
        assert!(state.refresh_token().is_none());
        assert!(state.auth_code().is_none());
    }

    #[test]
    fn clear_access_token_keeps_refresh_token() {
        let mut state = AuthState::new(scope(&["a"]), AuthFlow::Code);
        state.set_access_token("access", Duration::seconds(60));
        state.set_refresh_token(Some("refresh".to_string()));

        state.clear_access_token();

        assert!(state.access_token().is_none());
        assert_eq!(state.refresh_token(), Some("refresh"));
    }

    #[test]
    fn each_mutator_touches_only_its_field() {
        let mut state = AuthState::default();
        state.set_auth_code(Some("code".to_string()));
        state.set_refresh_token(Some("refresh".to_string()));
        assert_eq!(state.auth_code(), Some("code"));
        assert_eq!(state.refresh_token(), Some("refresh"));
        assert!(state.access_token().is_none());
    }

    #[test]
    fn expiry_checks() {
        let mut state = AuthState::default();
        assert!(state.is_expired());
        state.set_access_token("access", Duration::seconds(3600));
        assert!(!state.is_expired());
        assert!(state.is_expired_at(Utc::now() + Duration::hours(2)));
    }

    #[test]
    fn oversized_lifetime_saturates_instead_of_overflowing() {
        let mut state = AuthState::default();
        state.set_access_token("access", Duration::MAX);
        assert_eq!(state.expires_at(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(!state.is_expired());

        state.set_access_token("access", Duration::MIN);
        assert_eq!(state.expires_at(), Some(DateTime::<Utc>::MIN_UTC));
        assert!(state.is_expired());
    }

    #[test]
    fn persisted_form_uses_camel_case_and_epoch_millis() {
        let mut state = AuthState::new(scope(&["wl.signin", "onedrive.readwrite"]), AuthFlow::Code);
        state.set_access_token("access", Duration::seconds(3600));
        state.set_refresh_token(Some("refresh".to_string()));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["scope"], serde_json::json!(["wl.signin", "onedrive.readwrite"]));
        assert_eq!(json["flow"], "code");
        assert_eq!(json["accessToken"], "access");
        assert_eq!(json["refreshToken"], "refresh");
        assert_eq!(
            json["expires"].as_i64().unwrap(),
            state.expires_at().unwrap().timestamp_millis()
        );
        assert!(json.get("authCode").is_none());
    }

    #[test]
    fn persisted_round_trip_reproduces_state() {
        let mut state = AuthState::new(scope(&["a", "b"]), AuthFlow::Code);
        state.set_access_token("access", Duration::seconds(3600));
        state.set_refresh_token(Some("refresh".to_string()));
        state.set_auth_code(Some("code".to_string()));

        let raw = serde_json::to_string(&state).unwrap();
        let loaded: AuthState = serde_json::from_str(&raw).unwrap();

        // Millisecond precision is what survives the round trip.
        assert_eq!(loaded.scope(), state.scope());
        assert_eq!(loaded.flow(), state.flow());
        assert_eq!(loaded.access_token(), Some("access"));
        assert_eq!(
            loaded.expires_at().map(|at| at.timestamp_millis()),
            state.expires_at().map(|at| at.timestamp_millis())
        );
        assert_eq!(loaded.refresh_token(), Some("refresh"));
        assert_eq!(loaded.auth_code(), Some("code"));
    }

    #[test]
    fn missing_fields_load_as_defaults() {
        let loaded: AuthState = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, AuthState::default());
    }

    #[test]
    fn access_token_without_expiry_is_dropped_on_load() {
        let loaded: AuthState =
            serde_json::from_str(r#"{"scope":[],"flow":"token","accessToken":"x","expires":0}"#)
                .unwrap();
        assert!(loaded.access_token().is_none());
        assert_eq!(loaded.flow(), AuthFlow::Token);
    }
}
