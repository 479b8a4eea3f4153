//! Convenience re-exports for common use.

pub use crate::auth::{AuthFlow, AuthState, StateSource};
pub use crate::config::ProviderConfig;
pub use crate::error::{AuthError, Result};
pub use crate::provider::{ApiResponse, AuthProvider};
