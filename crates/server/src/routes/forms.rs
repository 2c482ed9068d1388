use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use db::models::form::Form;
use serde::Deserialize;
use services::services::{
    forms::FormWithQuestions,
    responses::{SubmitOutcome, SubmitResponse},
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    auth::{MaybeUser, RequireUser},
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize, TS)]
pub struct GenerateFormRequest {
    pub prompt: String,
}

/// Generate a draft form from a natural-language description
pub async fn generate_form(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Json(request): Json<GenerateFormRequest>,
) -> Result<ResponseJson<ApiResponse<FormWithQuestions>>, ApiError> {
    let created = state
        .generation
        .generate(user_id, &request.prompt, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(created)))
}

pub async fn list_my_forms(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
) -> Result<ResponseJson<ApiResponse<Vec<Form>>>, ApiError> {
    let forms = state.forms.list_owned(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(forms)))
}

pub async fn get_form(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<FormWithQuestions>>, ApiError> {
    let form = state.forms.get(form_id).await?;
    Ok(ResponseJson(ApiResponse::success(form)))
}

pub async fn publish_form(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(form_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Form>>, ApiError> {
    let form = state.forms.publish(user_id, form_id).await?;
    Ok(ResponseJson(ApiResponse::success(form)))
}

/// Anonymous submissions are accepted but never rewarded
pub async fn submit_response(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(form_id): Path<Uuid>,
    Json(submission): Json<SubmitResponse>,
) -> Result<ResponseJson<ApiResponse<SubmitOutcome>>, ApiError> {
    let outcome = state
        .responses
        .submit(user, form_id, &submission, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/forms",
        Router::new()
            .route("/", get(list_my_forms))
            .route("/generate", post(generate_form))
            .route("/{form_id}", get(get_form))
            .route("/{form_id}/publish", post(publish_form))
            .route("/{form_id}/responses", post(submit_response)),
    )
}
