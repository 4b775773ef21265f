use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Authentication failed: {0}")]
    Unauthorized(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected response payload: {0}")]
    Payload(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Calendar error: {0}")]
    Calendar(String),
    #[error("Notification error: {0}")]
    Notification(String),
}

impl InfraError {
    /// True for expired or rejected tokens, where the caller should drop the session
    /// instead of showing a transient error.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unauthorized_counts_as_authentication_failure() {
        assert!(InfraError::Unauthorized("http 401".to_string()).is_authentication());
        assert!(!InfraError::Network("timed out".to_string()).is_authentication());
        assert!(!InfraError::Payload("not json".to_string()).is_authentication());
    }
}
