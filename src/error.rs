use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop an operation before any retrieval happens.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("BBR_API_KEY is missing. Set it in the environment or in env/.env")]
    MissingApiKey,

    #[error("No plan found with id {plan_id}")]
    PlanNotFound { plan_id: String },

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures while paging through a remote register.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("Request failed: {message}")]
    Transport { message: String, transient: bool },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Server reported another page but no cursor")]
    MissingCursor,

    #[error("Stopped after {0} pages")]
    PageLimit(usize),
}

impl RetrievalError {
    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::Status { status, .. } => *status == 429 || *status >= 500,
            RetrievalError::Transport { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        // The GraphQL URL carries the API key
        let err = err.without_url();
        RetrievalError::Transport {
            transient: err.is_timeout() || err.is_connect(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| RetrievalError::Status {
            status,
            url: "https://example.invalid".to_string(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_permanent_kinds() {
        assert!(!RetrievalError::Malformed("x".into()).is_transient());
        assert!(!RetrievalError::InvalidUrl("x".into()).is_transient());
        assert!(!RetrievalError::GraphQl("x".into()).is_transient());
        assert!(!RetrievalError::MissingCursor.is_transient());
        assert!(!RetrievalError::PageLimit(10).is_transient());
        assert!(
            RetrievalError::Transport {
                message: "timed out".into(),
                transient: true
            }
            .is_transient()
        );
    }
}
