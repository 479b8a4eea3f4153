use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::state::AuthState;
use crate::error::AuthError;

/// Callback invoked with the current state after every mutation.
pub type StateObserver = Arc<dyn Fn(&AuthState) + Send + Sync>;

/// Where the auth state lives between runs.
#[derive(Debug, Clone)]
pub enum StateSource {
    /// Keep state in memory only, starting from the given state.
    Memory(AuthState),
    /// Read state from and write it back to a JSON file.
    File(PathBuf),
}

impl Default for StateSource {
    fn default() -> Self {
        Self::Memory(AuthState::default())
    }
}

impl StateSource {
    /// Default state file path (`~/.onedrive-auth/auth-state.json`).
    pub fn default_file() -> Self {
        Self::File(default_state_dir().join("auth-state.json"))
    }
}

/// Owns one [`AuthState`] and its persistence strategy.
///
/// All mutations go through [`AuthStateHandler::update`] (or the per-field
/// helpers built on it), which persists synchronously and then notifies
/// observers.
pub struct AuthStateHandler {
    state: AuthState,
    file: Option<PathBuf>,
    observers: Vec<StateObserver>,
}

impl fmt::Debug for AuthStateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStateHandler")
            .field("state", &self.state)
            .field("file", &self.file)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl AuthStateHandler {
    pub fn new(source: StateSource) -> Self {
        match source {
            StateSource::Memory(state) => Self {
                state,
                file: None,
                observers: Vec::new(),
            },
            StateSource::File(path) => Self {
                state: read_state_file(&path).unwrap_or_default(),
                file: Some(path),
                observers: Vec::new(),
            },
        }
    }

    /// Path of the backing file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Current state, refreshed from the backing file when it exists.
    pub fn get(&mut self) -> &AuthState {
        if let Some(path) = &self.file {
            if let Some(state) = read_state_file(path) {
                self.state = state;
            }
        }
        &self.state
    }

    /// In-memory state without touching the backing file.
    pub fn current(&self) -> &AuthState {
        &self.state
    }

    pub fn subscribe(&mut self, observer: StateObserver) {
        self.observers.push(observer);
    }

    /// Apply a mutation, persist it and notify observers.
    pub fn update<F>(&mut self, mutate: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut AuthState),
    {
        let mut next = self.state.clone();
        mutate(&mut next);
        if let Some(path) = &self.file {
            write_state_file(path, &next)?;
        }
        self.state = next;
        for observer in &self.observers {
            observer(&self.state);
        }
        Ok(())
    }

    pub fn clear_access_token(&mut self) -> Result<(), AuthError> {
        self.update(AuthState::clear_access_token)
    }

    pub fn set_refresh_token(&mut self, token: Option<String>) -> Result<(), AuthError> {
        self.update(|state| state.set_refresh_token(token))
    }

    pub fn set_auth_code(&mut self, code: Option<String>) -> Result<(), AuthError> {
        self.update(|state| state.set_auth_code(code))
    }

    pub fn reset(&mut self) -> Result<(), AuthError> {
        self.update(AuthState::reset)
    }
}

/// Read a state file, treating a missing, unreadable or malformed file as
/// absent.
fn read_state_file(path: &Path) -> Option<AuthState> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Failed to read auth state file");
            return Some(AuthState::default());
        }
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Ignoring malformed auth state file"
            );
            Some(AuthState::default())
        }
    }
}

fn write_state_file(path: &Path, state: &AuthState) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let serialized = serde_json::to_string(state)?;
    fs::write(path, serialized)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn default_state_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".onedrive-auth"))
        .unwrap_or_else(|| PathBuf::from(".onedrive-auth"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::state::AuthFlow;
    use chrono::Duration;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn state_path(dir: &TempDir) -> PathBuf {
        dir.path().join("auth-state.json")
    }

    #[test]
    fn memory_source_starts_from_given_state() {
        let initial = AuthState::new(vec!["a".to_string()], AuthFlow::Token);
        let mut handler = AuthStateHandler::new(StateSource::Memory(initial.clone()));
        assert_eq!(handler.get(), &initial);
        assert!(handler.file().is_none());
    }

    #[test]
    fn update_notifies_observers_with_new_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut handler = AuthStateHandler::new(StateSource::default());
        handler.subscribe(Arc::new(move |state: &AuthState| {
            sink.lock()
                .unwrap()
                .push(state.auth_code().map(str::to_string));
        }));

        handler.set_auth_code(Some("abc".to_string())).unwrap();
        handler.set_auth_code(None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("abc".to_string()), None]
        );
    }

    #[test]
    fn file_source_persists_on_update_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = state_path(&dir);
        let mut handler = AuthStateHandler::new(StateSource::File(path.clone()));
        handler
            .update(|state| {
                state.adopt(vec!["wl.signin".to_string()], AuthFlow::Code);
                state.set_access_token("access", Duration::seconds(3600));
                state.set_refresh_token(Some("refresh".to_string()));
            })
            .unwrap();

        let mut reopened = AuthStateHandler::new(StateSource::File(path));
        let state = reopened.get();
        assert_eq!(state.scope(), ["wl.signin".to_string()].as_slice());
        assert_eq!(state.access_token(), Some("access"));
        assert_eq!(state.refresh_token(), Some("refresh"));
    }

    #[test]
    fn get_picks_up_external_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = state_path(&dir);
        let mut handler = AuthStateHandler::new(StateSource::File(path.clone()));
        assert_eq!(handler.get(), &AuthState::default());

        fs::write(&path, r#"{"scope":["x"],"flow":"token","expires":0}"#).unwrap();

        assert_eq!(handler.get().flow(), AuthFlow::Token);
        assert_eq!(handler.get().scope(), ["x".to_string()].as_slice());
    }

    #[test]
    fn malformed_file_is_treated_as_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = state_path(&dir);
        fs::write(&path, "{not json").unwrap();

        let mut handler = AuthStateHandler::new(StateSource::File(path.clone()));
        assert_eq!(handler.get(), &AuthState::default());

        // Re-reading a file that turns malformed later is tolerated as well.
        handler.set_auth_code(Some("code".to_string())).unwrap();
        fs::write(&path, "garbage").unwrap();
        assert_eq!(handler.get(), &AuthState::default());
    }

    #[test]
    fn failed_persist_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the write fail.
        let path = dir.path().join("blocked");
        fs::create_dir(&path).unwrap();
        let mut handler = AuthStateHandler::new(StateSource::File(path));

        let err = handler.set_auth_code(Some("code".to_string())).unwrap_err();
        assert!(matches!(err, AuthError::Io(_)));
        assert!(handler.current().auth_code().is_none());
    }
}
