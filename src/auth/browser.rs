use crate::error::AuthError;

/// Opens the authorize URL for the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> Result<(), AuthError>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        tracing::debug!(url, "Opening system browser");
        webbrowser::open(url)
            .map_err(|e| AuthError::Io(format!("failed to open browser: {e}")))
    }
}
