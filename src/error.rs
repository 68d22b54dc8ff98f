//! Error handler for dirauth.

use axum::extract::rejection::BytesRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Body(#[from] BytesRejection),

    #[error("directory server unavailable")]
    Connection(#[source] BoxError),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("no matching directory entry")]
    NotFound,

    #[error("upstream did not answer in time")]
    Timeout,

    #[error("basic authentication relay failed")]
    Relay(#[source] reqwest::Error),

    #[error("internal server error")]
    Internal(#[source] BoxError),
}

impl ServerError {
    /// Wrap any failure reaching the directory server.
    pub fn connection<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Box::new(err))
    }

    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }

    /// HTTP status matching this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Decode(_) | ServerError::Body(_) => {
                StatusCode::BAD_REQUEST
            },
            ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Connection(_) | ServerError::Relay(_) => {
                StatusCode::BAD_GATEWAY
            },
            ServerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Relay(err)
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .status(self.status_code())
            .details(&self.to_string());

        let response = match &self {
            ServerError::Decode(_) | ServerError::Body(_) => {
                response.title("Request body could not be decoded.")
            },
            ServerError::InvalidCredentials => {
                response.title("Authentication failed.")
            },
            ServerError::NotFound => {
                response.title("Authenticated entry not found.")
            },
            ServerError::Timeout => response.title("Upstream timed out."),
            ServerError::Connection(source) => {
                tracing::error!(error = %source, "directory server unreachable");
                response.title("Upstream service unavailable.")
            },
            ServerError::Relay(source) => {
                tracing::error!(error = %source, "basic relay request failed");
                response.title("Upstream service unavailable.")
            },
            ServerError::Internal(source) => {
                tracing::error!(error = %source, "server returned 500 status");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
