#![allow(non_snake_case)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

pub fn Fine<V>(v: V) -> Success<V>
where
    V: Serialize,
{
    Success::of(v)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    NotFound { message: String },
    InvalidPayload { message: String },
    InvalidSession { message: String },
    AuthenticationFailure { message: String },
    Forbidden { message: String },
    InternalError { kind: &'static str, message: String },
    Unknown { message: String },
}

impl Error {
    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn internal<S: Into<String>>(kind: &'static str, msg: S) -> Error {
        Error::InternalError {
            kind,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidSession { .. } | Error::AuthenticationFailure { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InternalError { kind, message } => write!(f, "{}: {}", kind, message),
            Error::NotFound { message }
            | Error::InvalidPayload { message }
            | Error::InvalidSession { message }
            | Error::AuthenticationFailure { message }
            | Error::Forbidden { message }
            | Error::Unknown { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("Requested row does not exist"),
            other => Self::internal("DatabaseError", other.to_string()),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::internal("PasswordHashError", err.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Self::internal("SerializationError", err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::internal("CsvError", err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::internal("XlsxError", err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown {
            message: err.to_string(),
        }
    }
}
