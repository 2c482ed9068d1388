use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use services::services::{
    boost::{CancelError, PurchaseError},
    form_generation::FormGenerationError,
    forms::FormError,
    ledger::LedgerError,
    promotion::PromotionError,
    responses::ResponseError,
};
use thiserror::Error;
use ts_rs::TS;
use utils::response::ApiResponse;

const UPSTREAM_FAILURE: &str = "A backing service failed, please retry";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Purchase(#[from] PurchaseError),
    #[error(transparent)]
    Cancel(#[from] CancelError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Generation(#[from] FormGenerationError),
    #[error(transparent)]
    Promotion(#[from] PromotionError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    BadRequest(String),
}

/// Machine readable part of an error response
#[derive(Debug, Clone, Serialize, TS)]
pub struct ErrorData {
    pub code: String,
}

struct Failure {
    status: StatusCode,
    code: &'static str,
    retry_after_secs: Option<u64>,
}

impl Failure {
    fn new(status: StatusCode, code: &'static str) -> Self {
        Self {
            status,
            code,
            retry_after_secs: None,
        }
    }

    fn upstream() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "external_service_error")
    }
}

fn ledger_failure(err: &LedgerError) -> Failure {
    match err {
        LedgerError::ProfileNotFound => Failure::new(StatusCode::NOT_FOUND, "profile_not_found"),
        LedgerError::InsufficientCredits => {
            Failure::new(StatusCode::PAYMENT_REQUIRED, "insufficient_credits")
        }
        LedgerError::Database(_) => Failure::upstream(),
    }
}

impl ApiError {
    fn failure(&self) -> Failure {
        match self {
            ApiError::Purchase(err) => {
                let status = match err {
                    PurchaseError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    PurchaseError::NotOwner => StatusCode::FORBIDDEN,
                    PurchaseError::FormNotFound
                    | PurchaseError::ProductNotFound
                    | PurchaseError::ProfileNotFound => StatusCode::NOT_FOUND,
                    PurchaseError::ProductInactive => StatusCode::CONFLICT,
                    PurchaseError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
                    PurchaseError::FormNotPublished
                    | PurchaseError::InvalidIdempotencyKey
                    | PurchaseError::IdempotencyKeyExpired
                    | PurchaseError::IdempotencyKeyMismatch => StatusCode::BAD_REQUEST,
                    PurchaseError::Database(_) => return Failure::upstream(),
                };
                Failure::new(status, err.code())
            }
            ApiError::Cancel(err) => {
                let status = match err {
                    CancelError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    CancelError::NotBuyer => StatusCode::FORBIDDEN,
                    CancelError::NotFound => StatusCode::NOT_FOUND,
                    CancelError::AlreadyCancelled | CancelError::AlreadyCompleted => {
                        StatusCode::BAD_REQUEST
                    }
                    CancelError::Ledger(ledger) => return ledger_failure(ledger),
                    CancelError::Database(_) => return Failure::upstream(),
                };
                Failure::new(status, err.code())
            }
            ApiError::Ledger(err) => ledger_failure(err),
            ApiError::Form(err) => match err {
                FormError::NotFound => Failure::new(StatusCode::NOT_FOUND, "not_found"),
                FormError::NotOwner => Failure::new(StatusCode::FORBIDDEN, "not_owner"),
                FormError::Closed => Failure::new(StatusCode::BAD_REQUEST, "form_closed"),
                FormError::Database(_) => Failure::upstream(),
            },
            ApiError::Response(err) => match err {
                ResponseError::FormNotFound => Failure::new(StatusCode::NOT_FOUND, "not_found"),
                ResponseError::ProfileNotFound => {
                    Failure::new(StatusCode::NOT_FOUND, "profile_not_found")
                }
                ResponseError::FormNotOpen => {
                    Failure::new(StatusCode::BAD_REQUEST, "form_not_published")
                }
                ResponseError::AnswersNotObject
                | ResponseError::MissingAnswer(_)
                | ResponseError::NegativeDuration => {
                    Failure::new(StatusCode::BAD_REQUEST, "validation_error")
                }
                ResponseError::Ledger(ledger) => ledger_failure(ledger),
                ResponseError::Database(_) => Failure::upstream(),
            },
            ApiError::Generation(err) => match err {
                FormGenerationError::InvalidPrompt => {
                    Failure::new(StatusCode::BAD_REQUEST, "validation_error")
                }
                FormGenerationError::ProfileNotFound => {
                    Failure::new(StatusCode::NOT_FOUND, "profile_not_found")
                }
                FormGenerationError::RateLimited { retry_after_secs } => Failure {
                    status: StatusCode::TOO_MANY_REQUESTS,
                    code: "rate_limited",
                    retry_after_secs: Some(*retry_after_secs),
                },
                FormGenerationError::Unavailable => {
                    Failure::new(StatusCode::BAD_GATEWAY, "generation_unavailable")
                }
                FormGenerationError::Timeout => {
                    Failure::new(StatusCode::BAD_GATEWAY, "generation_timeout")
                }
                FormGenerationError::Llm(_) | FormGenerationError::InvalidSchema(_) => {
                    Failure::new(StatusCode::BAD_GATEWAY, "generation_failed")
                }
                FormGenerationError::Database(_) => Failure::upstream(),
            },
            ApiError::Promotion(err) => match err {
                PromotionError::FormNotFound => Failure::new(StatusCode::NOT_FOUND, "not_found"),
                PromotionError::Database(_) => Failure::upstream(),
            },
            ApiError::Database(_) => Failure::upstream(),
            ApiError::Unauthorized(_) => Failure::new(StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::BadRequest(_) => Failure::new(StatusCode::BAD_REQUEST, "validation_error"),
        }
    }
}

/// Fixed client text for 5xx responses. The underlying error may carry
/// upstream bodies or driver messages, so it only goes to the log.
fn server_error_message(code: &str) -> &'static str {
    match code {
        "generation_unavailable" => "Form generation is not configured",
        "generation_timeout" => "Form generation timed out, please retry",
        "generation_failed" => "Form generation failed, please retry",
        _ => UPSTREAM_FAILURE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let failure = self.failure();

        // Upstream details stay in the logs; clients get a generic message
        let message = if failure.status.is_server_error() {
            tracing::error!(error = %self, code = failure.code, "Request failed");
            server_error_message(failure.code).to_string()
        } else {
            tracing::debug!(error = %self, code = failure.code, "Request rejected");
            self.to_string()
        };

        let body = ApiResponse::<(), ErrorData>::error_with_data(
            ErrorData {
                code: failure.code.to_string(),
            },
            &message,
        );
        let mut response = (failure.status, Json(body)).into_response();
        if let Some(secs) = failure.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
