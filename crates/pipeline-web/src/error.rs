//! Mapping from pipeline errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use pipeline_core::{PipelineError, ServiceError};
use serde_json::json;

/// Error returned by handlers and the session middleware.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    /// The caller must sign in again.
    SignIn {
        reason: String,
        redirect_to: String,
        html: bool,
    },
}

impl ApiError {
    pub fn sign_in(reason: impl Into<String>, redirect_to: &str, html: bool) -> Self {
        Self::SignIn {
            reason: reason.into(),
            redirect_to: redirect_to.to_string(),
            html,
        }
    }

    /// Turn a guard failure into a sign-in redirect where it calls for one.
    pub fn from_guard(err: PipelineError, redirect_to: &str, html: bool) -> Self {
        if err.requires_sign_in() {
            Self::sign_in(err.to_string(), redirect_to, html)
        } else {
            Self::Pipeline(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::SignIn { html: true, .. } => StatusCode::SEE_OTHER,
            Self::SignIn { .. } => StatusCode::UNAUTHORIZED,
            Self::Pipeline(err) => status_for(err),
        }
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidMove { .. } | PipelineError::InvalidCard { .. } => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::NotAuthenticated | PipelineError::SessionExpired { .. } => {
            StatusCode::UNAUTHORIZED
        }
        PipelineError::Service(ServiceError::NotFound(_)) => StatusCode::NOT_FOUND,
        PipelineError::Service(ServiceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Service(_)
        | PipelineError::PersistenceWriteFailed { .. }
        | PipelineError::PreferenceFetchFailed(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::SignIn {
                redirect_to,
                html: true,
                ..
            } => Redirect::to(&redirect_to).into_response(),
            Self::SignIn {
                reason,
                redirect_to,
                ..
            } => (
                status,
                Json(json!({ "error": reason, "redirect_to": redirect_to })),
            )
                .into_response(),
            Self::Pipeline(err) => {
                if status.is_server_error() {
                    tracing::warn!(error = %err, status = status.as_u16(), "Request failed");
                }
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
        }
    }
}
