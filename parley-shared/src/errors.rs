#[cfg(feature = "server")]
use axum::http::StatusCode;
#[cfg(feature = "server")]
use axum::response::{IntoResponse, Response};
#[cfg(feature = "server")]
use axum::Json;
use serde::{Deserialize, Serialize};

#[cfg(feature = "server")]
use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Authentication errors
/// - E2xxx: User errors
/// - E3xxx: Channel and membership errors
/// - E4xxx: Message errors
/// - E5xxx: Contact errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Forbidden,
    BadRequest,

    // Auth (E1xxx)
    Unauthenticated,
    TokenExpired,
    TokenInvalid,

    // User (E2xxx)
    UserNotFound,
    UsernameTaken,
    InvalidUsername,

    // Channel (E3xxx)
    ChannelNotFound,
    NotMember,
    NotAdmin,
    AlreadyMember,
    LinkNotFound,
    PrivateChannel,

    // Message (E4xxx)
    MessageNotFound,

    // Contact (E5xxx)
    ContactNotFound,
    DuplicateContact,
}

impl ErrorCode {
    const ALL: [ErrorCode; 20] = [
        Self::InternalError,
        Self::ValidationError,
        Self::NotFound,
        Self::Forbidden,
        Self::BadRequest,
        Self::Unauthenticated,
        Self::TokenExpired,
        Self::TokenInvalid,
        Self::UserNotFound,
        Self::UsernameTaken,
        Self::InvalidUsername,
        Self::ChannelNotFound,
        Self::NotMember,
        Self::NotAdmin,
        Self::AlreadyMember,
        Self::LinkNotFound,
        Self::PrivateChannel,
        Self::MessageNotFound,
        Self::ContactNotFound,
        Self::DuplicateContact,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Forbidden => "E0005",
            Self::BadRequest => "E0008",

            // Auth
            Self::Unauthenticated => "E1001",
            Self::TokenExpired => "E1004",
            Self::TokenInvalid => "E1005",

            // User
            Self::UserNotFound => "E2001",
            Self::UsernameTaken => "E2002",
            Self::InvalidUsername => "E2003",

            // Channel
            Self::ChannelNotFound => "E3001",
            Self::NotMember => "E3002",
            Self::NotAdmin => "E3003",
            Self::AlreadyMember => "E3004",
            Self::LinkNotFound => "E3005",
            Self::PrivateChannel => "E3006",

            // Message
            Self::MessageNotFound => "E4001",

            // Contact
            Self::ContactNotFound => "E5001",
            Self::DuplicateContact => "E5002",
        }
    }

    /// Reverse lookup of [`ErrorCode::code`], used when decoding error envelopes.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Missing identity; the caller has to sign in again.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::TokenExpired | Self::TokenInvalid)
    }

    /// Caller is known but not allowed to act on the resource.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::NotMember | Self::NotAdmin | Self::Forbidden)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::UserNotFound
                | Self::ChannelNotFound
                | Self::MessageNotFound
                | Self::LinkNotFound
                | Self::ContactNotFound
        )
    }

    /// Well-formed request that clashes with existing state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyMember | Self::UsernameTaken | Self::DuplicateContact)
    }

    #[cfg(feature = "server")]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::BadRequest | Self::InvalidUsername
            | Self::PrivateChannel => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::TokenExpired | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotMember | Self::NotAdmin => StatusCode::FORBIDDEN,
            Self::NotFound | Self::UserNotFound | Self::ChannelNotFound | Self::MessageNotFound
            | Self::LinkNotFound | Self::ContactNotFound => StatusCode::NOT_FOUND,
            Self::AlreadyMember | Self::UsernameTaken | Self::DuplicateContact => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[cfg(feature = "server")]
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The taxonomy code, if this is a known error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Known { code, .. } => Some(*code),
            AppError::Validation(_) => Some(ErrorCode::ValidationError),
            _ => None,
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
