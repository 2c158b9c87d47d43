//! Gateway-level error → HTTP response mapping (`spec.md` §6, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use antwort_protocol::{ApiError, ErrorKind};

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: &'static str,
    message: String,
    param: Option<String>,
}

/// A thin local newtype so `ApiError` (defined in `antwort-protocol`) can
/// implement axum's foreign `IntoResponse` trait without violating the
/// orphan rule.
pub struct ApiErrorResponse(pub ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(e: ApiError) -> Self {
        ApiErrorResponse(e)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorBody {
                error: ErrorDetail {
                    error_type: err.kind.wire_type(),
                    message: err.message,
                    param: err.param,
                },
            }),
        )
            .into_response()
    }
}

pub fn body_too_large(message: impl Into<String>) -> Response {
    (StatusCode::PAYLOAD_TOO_LARGE, message.into()).into_response()
}

pub fn unsupported_media_type(message: impl Into<String>) -> Response {
    (StatusCode::UNSUPPORTED_MEDIA_TYPE, message.into()).into_response()
}

pub fn kind_for_transport_error(status: Option<u16>) -> ErrorKind {
    match status {
        Some(s) if (400..500).contains(&s) && s != 429 => ErrorKind::InvalidRequest,
        Some(429) => ErrorKind::RateLimited,
        Some(_) => ErrorKind::ServerError,
        None => ErrorKind::ServerError,
    }
}
