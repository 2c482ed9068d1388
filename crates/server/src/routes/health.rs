use axum::{
    Router, extract::State, http::StatusCode, response::Json as ResponseJson, routing::get,
};
use services::services::database_validator::{
    DatabaseValidationError, DatabaseValidator, ValidationResult,
};
use utils::response::ApiResponse;

use crate::{error::ApiError, state::AppState};

/// 200 when migrations are applied and every table exists, 503 otherwise
pub async fn health(
    State(state): State<AppState>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<ValidationResult>>), ApiError> {
    let result = DatabaseValidator::new(state.db.pool.clone())
        .validate()
        .await
        .map_err(|DatabaseValidationError::Database(err)| ApiError::Database(err))?;

    if result.is_ok() {
        Ok((StatusCode::OK, ResponseJson(ApiResponse::success(result))))
    } else {
        let message = result.summary();
        Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            ResponseJson(ApiResponse::success_with_message(result, message)),
        ))
    }
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/health", get(health))
}
