use axum::{
    Json, Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::credits_ledger::LedgerEntry;
use serde::{Deserialize, Serialize};
use services::services::ledger::{BalanceDrift, BootstrapOutcome};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{auth::RequireUser, error::ApiError, state::AppState};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize, TS)]
pub struct BootstrapRequest {
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, TS)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, TS)]
pub struct ReconcileResponse {
    pub balance: i64,
    /// Present when the stored balance had drifted from the ledger and was rewritten
    pub repaired: Option<BalanceDrift>,
}

/// Create the caller's profile on first sign-in and grant the welcome bonus
pub async fn bootstrap(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    body: Option<Json<BootstrapRequest>>,
) -> Result<ResponseJson<ApiResponse<BootstrapOutcome>>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let display_name = request
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if display_name.is_some_and(|name| name.chars().count() > 80) {
        return Err(ApiError::BadRequest(
            "display_name must be at most 80 characters".to_string(),
        ));
    }
    let outcome = state.ledger.bootstrap_account(user_id, display_name).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn get_balance(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
) -> Result<ResponseJson<ApiResponse<BalanceResponse>>, ApiError> {
    let balance = state.ledger.balance(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(BalanceResponse { balance })))
}

pub async fn get_ledger(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Query(query): Query<HistoryQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<LedgerEntry>>>, ApiError> {
    let entries = state
        .ledger
        .history(user_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(ResponseJson(ApiResponse::success(entries)))
}

/// Recompute the caller's balance from their ledger
pub async fn reconcile(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
) -> Result<ResponseJson<ApiResponse<ReconcileResponse>>, ApiError> {
    let repaired = state.ledger.reconcile_user(user_id).await?;
    let balance = state.ledger.balance(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(ReconcileResponse {
        balance,
        repaired,
    })))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/profiles/bootstrap", post(bootstrap))
        .nest(
            "/credits",
            Router::new()
                .route("/balance", get(get_balance))
                .route("/ledger", get(get_ledger))
                .route("/reconcile", post(reconcile)),
        )
}
