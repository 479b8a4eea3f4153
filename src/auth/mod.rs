//! Auth state, redirect listener and the OAuth token exchange.

pub mod browser;
pub mod exchange;
pub mod handler;
pub mod listener;
pub mod state;

pub use browser::{Browser, SystemBrowser};
pub use exchange::{GrantRequest, TokenExchange, TokenGrant};
pub use handler::{AuthStateHandler, StateObserver, StateSource};
pub use listener::{RedirectListener, RedirectPayload};
pub use state::{scope_equal, AuthFlow, AuthState};
