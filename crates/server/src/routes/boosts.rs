use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use db::models::{boost_product::BoostProduct, boost_purchase::BoostPurchaseWithStatus};
use services::services::boost::{CancelOutcome, PurchaseOutcome, PurchaseRequest};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    auth::{MaybeUser, RequireUser},
    error::ApiError,
    state::AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub async fn list_products(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<BoostProduct>>>, ApiError> {
    let products = state.boosts.products().await?;
    Ok(ResponseJson(ApiResponse::success(products)))
}

/// Buy a boost for one of the caller's forms. An `Idempotency-Key` header
/// takes precedence over a key in the body.
pub async fn purchase_boost(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    Json(mut request): Json<PurchaseRequest>,
) -> Result<ResponseJson<ApiResponse<PurchaseOutcome>>, ApiError> {
    if let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) {
        let key = value
            .to_str()
            .map_err(|_| ApiError::BadRequest("Idempotency-Key must be ASCII".to_string()))?;
        request.idempotency_key = Some(key.to_string());
    }

    let outcome = state.boosts.purchase(user, &request, Utc::now()).await?;
    let message = outcome.message.clone();
    Ok(ResponseJson(ApiResponse::success_with_message(outcome, message)))
}

pub async fn cancel_boost(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(purchase_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CancelOutcome>>, ApiError> {
    let outcome = state.boosts.cancel(user, purchase_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn my_purchases(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
) -> Result<ResponseJson<ApiResponse<Vec<BoostPurchaseWithStatus>>>, ApiError> {
    let purchases = state.boosts.purchases_by_buyer(user_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(purchases)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/boosts",
        Router::new()
            .route("/products", get(list_products))
            .route("/purchase", post(purchase_boost))
            .route("/mine", get(my_purchases))
            .route("/{purchase_id}/cancel", post(cancel_boost)),
    )
}
