//! Calendar-specific error types.

use thiserror::Error;

/// One failed attempt in the retrieval route chain, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct RouteFailure {
    pub route: String,
    pub reason: String,
}

impl std::fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.route, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("All {} retrieval routes failed", .failures.len())]
    FeedUnavailable { failures: Vec<RouteFailure> },

    #[error("Authentication required")]
    AuthRequired,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl CalendarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidUrl(_) => "The calendar URL is not valid.".to_string(),
            Self::FeedUnavailable { .. } => {
                "The calendar feed could not be reached. Events may be out of date.".to_string()
            }
            Self::AuthRequired => "Please sign in to your calendar account.".to_string(),
            Self::ApiError(msg) => format!("Calendar error: {}", msg),
            Self::InvalidResponse(_) => "The calendar server sent an unexpected reply.".to_string(),
            Self::Network(_) => "Network error. Check your connection.".to_string(),
        }
    }

    /// Per-route failure reasons, for log output.
    pub fn route_details(&self) -> Vec<String> {
        match self {
            Self::FeedUnavailable { failures } => {
                failures.iter().map(|f| f.to_string()).collect()
            }
            _ => Vec::new(),
        }
    }
}
