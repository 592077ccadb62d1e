use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use common::validation::FormValidationResult;
use log::error;
use thiserror::Error;

use crate::{
    backends::BackendError,
    params::ParamError,
    payloads::{ErrorablePayload, FieldErrorsResponse, ToHttpResponse},
    submission::SubmitError,
};

/// Shown instead of backend details when something upstream breaks.
pub const SERVICE_PROBLEM: &str = "Sorry, there is a problem with the service";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("form has {} field error(s)", .0.errors.len())]
    Form(FormValidationResult),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("rendering failed: {0}")]
    Render(#[source] BackendError),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Form(_) | Self::Params(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Submit(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Render(e) => e
                .status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            Self::Form(form) => HttpResponse::BadRequest().json(FieldErrorsResponse {
                errors: form.errors.clone(),
            }),
            Self::Params(e) => ErrorablePayload::<()>::Err(e.to_string())
                .to_response_with(HttpResponse::Ok(), status),
            Self::BadRequest(msg) => ErrorablePayload::<()>::Err(msg.clone())
                .to_response_with(HttpResponse::Ok(), status),
            Self::Submit(e) => {
                error!("Submission failed: {e}");
                ErrorablePayload::<()>::Err(SERVICE_PROBLEM.to_string()).to_response(HttpResponse::Ok())
            }
            Self::Render(e) if status == StatusCode::NOT_FOUND => {
                error!("Render failed: {e}");
                ErrorablePayload::<()>::NotFound.to_response(HttpResponse::Ok())
            }
            Self::Render(e) => {
                error!("Render failed: {e}");
                ErrorablePayload::<()>::Err(SERVICE_PROBLEM.to_string())
                    .to_response_with(HttpResponse::Ok(), status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(status: u16) -> AppError {
        AppError::Render(BackendError::Status {
            url: "/render".to_string(),
            status,
        })
    }

    #[test]
    fn status_codes() {
        let mut form = FormValidationResult::default();
        form.add_error("file", "Select an accounts file.");
        assert_eq!(AppError::Form(form).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(ParamError::UnknownPackageType("x".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(SubmitError::TimedOut("f".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn render_status_is_propagated() {
        assert_eq!(render(404).error_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(render(503).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(render(302).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::Render(BackendError::UnexpectedContentType(None)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
