use actix_web::{http::StatusCode, HttpResponse, HttpResponseBuilder};
pub use common::payloads::*;
use serde::Serialize;

pub trait ToHttpResponse {
    /// Wraps an ErrorablePayload in an HttpResponse.
    /// on_successful is the builder used for ErrorablePayload::Ok, and on_error
    /// the status used for ErrorablePayload::Err.
    fn to_response_with(self, on_successful: HttpResponseBuilder, on_error: StatusCode) -> HttpResponse;

    /// Like to_response_with, with errors reported as 500.
    fn to_response(self, on_successful: HttpResponseBuilder) -> HttpResponse
    where
        Self: Sized,
    {
        self.to_response_with(on_successful, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl<T: Serialize> ToHttpResponse for ErrorablePayload<T> {
    fn to_response_with(self, mut on_successful: HttpResponseBuilder, on_error: StatusCode) -> HttpResponse {
        match self {
            ErrorablePayload::Ok(_) => on_successful.json(self),
            ErrorablePayload::NotFound => HttpResponse::NotFound().json(self),
            ErrorablePayload::Err(_) => HttpResponse::build(on_error).json(self),
        }
    }
}
