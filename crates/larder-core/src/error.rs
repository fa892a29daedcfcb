use thiserror::Error;

use crate::models::Key;

/// Errors surfaced by the repository and its remote collaborators.
///
/// `Clone` so that one coordinated fetch result can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("Resource not found: {0}")]
    NotFound(Key),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Server error: status {0}")]
    ServerError(u16),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T, E = RepoError> = std::result::Result<T, E>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RepoError {
    /// Whether a cached entry may be served in place of this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RepoError::Unavailable(_) | RepoError::ServerError(_))
    }

    /// Truncate a response body to avoid carrying excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success HTTP status to the error taxonomy.
    pub fn from_status(key: Option<&Key>, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            404 => RepoError::NotFound(key.cloned().unwrap_or_else(|| Key::new(""))),
            408 | 429 | 502 | 503 | 504 => RepoError::Unavailable(format!(
                "status {}: {}",
                status,
                Self::truncate_body(body)
            )),
            code => RepoError::ServerError(code),
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(err: reqwest::Error) -> Self {
        // Anything without a status never got a usable response.
        match err.status() {
            Some(status) if err.is_decode() => RepoError::ServerError(status.as_u16()),
            _ => RepoError::Unavailable(err.to_string()),
        }
    }
}
