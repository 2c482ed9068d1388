use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use chrono::Utc;
use db::models::boost_purchase::BoostPurchaseWithStatus;
use serde::Deserialize;
use services::services::promotion::{DEFAULT_FEED_LIMIT, FeedItem};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// Forms with a running boost, best placement first
pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<FeedItem>>>, ApiError> {
    let items = state
        .promotions
        .feed(Utc::now(), query.limit.unwrap_or(DEFAULT_FEED_LIMIT))
        .await?;
    Ok(ResponseJson(ApiResponse::success(items)))
}

pub async fn get_form_promotions(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<BoostPurchaseWithStatus>>>, ApiError> {
    let purchases = state.promotions.for_form(form_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(purchases)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/feed", get(get_feed))
        .route("/forms/{form_id}/promotions", get(get_form_promotions))
}
