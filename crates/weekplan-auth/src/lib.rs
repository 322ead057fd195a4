pub mod google;
pub mod session;

pub use google::{GoogleOAuth2Provider, GoogleTokenResponse};
pub use session::{SessionStore, TokenSet};

use anyhow::Result;

/// Initialize the auth module
pub fn init() -> Result<()> {
    tracing::info!("WeekPlan auth initialized");
    Ok(())
}
