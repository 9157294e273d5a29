//! HTTP error mapping for catalog handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// A host or file name that is not a single plain path component.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("snapshot {file} cannot be parsed: {source}")]
    Unparsable {
        file: String,
        #[source]
        source: rdb::RdbError,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    /// Maps a filesystem error on `what`, turning a missing entry into 404.
    pub(crate) fn from_io(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound(what.to_string())
        } else {
            Self::Io(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidName(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unparsable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Unparsable { .. } => "unparsable",
            Self::Io(_) | Self::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "catalog request failed");
        }
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
