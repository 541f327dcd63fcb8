use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the attendance core can surface. Nothing here is fatal to
/// the process; each variant maps to a per-request HTTP status.
#[derive(Error, Debug)]
pub enum Error {
    #[error("student id must be in format 20YY-NNNNNN (e.g. 2023-123456), got {0:?}")]
    InvalidFormat(String),

    #[error("student id or rfid already registered: {0}")]
    DuplicateIdentity(String),

    #[error("no active student matches identifier {0:?}")]
    UnknownIdentity(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// Two taps for the same student raced. Retried internally by the
    /// ledger; only surfaced once the retry budget is spent.
    #[error("conflicting concurrent taps, please try again")]
    Conflict,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::DuplicateIdentity(_) => StatusCode::CONFLICT,
            Error::UnknownIdentity(_) => StatusCode::NOT_FOUND,
            Error::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Error::Conflict => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::InvalidFormat(_) => "invalid_format",
            Error::DuplicateIdentity(_) => "duplicate_identity",
            Error::UnknownIdentity(_) => "unknown_identity",
            Error::MissingParameter(_) => "missing_parameter",
            Error::Conflict => "conflict",
            Error::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.into())
    }
}
