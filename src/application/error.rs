use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::application::query::QueryError;
use crate::application::ratings::AggregateError;
use crate::application::repos::RepoError;
use crate::config::Environment;
use crate::domain::{error::DomainError, types::ResourceKind};
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Whether a failure is the caller's fault or a dependency's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Dependency,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no {resource} found with that id")]
    NotFound { resource: &'static str },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("duplicate value violates `{constraint}`")]
    Conflict { constraint: String },
    #[error("document store failure during `{op}`")]
    Store {
        op: &'static str,
        #[source]
        source: RepoError,
    },
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(kind: ResourceKind) -> Self {
        Self::NotFound {
            resource: kind.as_str(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Lift a repository failure, keeping client-caused variants client-side.
    pub fn from_repo(op: &'static str, err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound { resource: "record" },
            RepoError::InvalidInput { message } => Self::Validation(message),
            RepoError::Duplicate { constraint } => Self::Conflict { constraint },
            other => Self::Store { op, source: other },
        }
    }

    pub fn class(&self) -> ErrorClass {
        if self.status_code().is_client_error() {
            ErrorClass::Client
        } else {
            ErrorClass::Dependency
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } | AppError::Domain(DomainError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Query(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Store {
                source: RepoError::Timeout | RepoError::Persistence(_),
                ..
            } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Infra(InfraError::Database { .. } | InfraError::Cache(_))
            | AppError::Aggregate(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_)
            | AppError::Domain(DomainError::Invariant { .. })
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
            _ => "Something went very wrong",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Vec<String>>,
}

/// Renders service errors for the configured environment. Client errors
/// always carry their message; server errors only do in development.
#[derive(Debug, Clone, Copy)]
pub struct ErrorResponder {
    environment: Environment,
}

impl ErrorResponder {
    const SOURCE: &'static str = "application::error::ErrorResponder";

    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn render(&self, error: &AppError) -> Response {
        let status = error.status_code();
        let report = ErrorReport::from_error(Self::SOURCE, status, error);

        let body = match (error.class(), self.environment) {
            (ErrorClass::Client, _) => ErrorBody {
                status: "fail",
                message: error.to_string(),
                detail: None,
            },
            (ErrorClass::Dependency, Environment::Development) => ErrorBody {
                status: "error",
                message: error.to_string(),
                detail: Some(report.messages.clone()),
            },
            (ErrorClass::Dependency, Environment::Production) => {
                tracing::error!(
                    status = status.as_u16(),
                    chain = ?report.messages,
                    "request failed on a dependency"
                );
                ErrorBody {
                    status: "error",
                    message: error.presentation_message().to_string(),
                    detail: None,
                }
            }
        };

        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ErrorResponder::new(Environment::Production).render(&self)
    }
}
