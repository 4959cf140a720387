use parley_shared::ErrorCode;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Error envelope returned by the server.
    #[error("{message} ({code})")]
    Api { code: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("message cache lock poisoned")]
    CachePoisoned,
}

impl ClientError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Taxonomy code of a server error, when the server sent a known one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api { code, .. } => ErrorCode::from_code(code),
            _ => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        self.code().is_some_and(|c| c.is_authentication())
    }

    pub fn is_authorization(&self) -> bool {
        self.code().is_some_and(|c| c.is_authorization())
    }

    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|c| c.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        self.code().is_some_and(|c| c.is_conflict())
    }
}
