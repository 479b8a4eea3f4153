//! OneDrive OAuth2 token provider.
//!
//! Acquires, caches, refreshes and invalidates access tokens for the Microsoft
//! account (`login.live.com`) authorization-code and implicit grants, and wraps
//! outbound API calls with bounded re-authentication on `401`.
//!
//! # Quick Start
//!
//! ```no_run
//! use onedrive_auth::prelude::*;
//!
//! # async fn example() -> onedrive_auth::error::Result<()> {
//! let provider = AuthProvider::new(
//!     ProviderConfig::new("0000000048150D2D")
//!         .with_client_secret("secret")
//!         .with_scope(["wl.signin", "wl.offline_access", "onedrive.readwrite"])
//!         .with_flow(AuthFlow::Code)
//!         .with_state_file("auth-state.json"),
//! );
//! let token = provider.token().await?;
//! println!("{token}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
