use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod boosts;
pub mod credits;
pub mod feed;
pub mod forms;
pub mod health;

/// All API routes under `/api`, with request tracing
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router(&state))
        .merge(credits::router(&state))
        .merge(boosts::router(&state))
        .merge(feed::router(&state))
        .merge(forms::router(&state));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderValue, Request, StatusCode, header},
    };
    use db::DBService;
    use serde_json::{Value, json};
    use services::services::{
        config::Config,
        form_generation::{FormSchemaGenerator, GeneratedForm},
        llm_client::LlmError,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    const SECRET: &str = "route-test-secret";

    struct FixedGenerator;

    #[async_trait]
    impl FormSchemaGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedForm, LlmError> {
            serde_json::from_value(json!({
                "title": "Coffee habits",
                "description": "How do you take your coffee?",
                "category": "lifestyle",
                "estimated_time": 3,
                "difficulty": 2,
                "questions": [
                    {"type": "short_text", "title": "Favourite drink?", "required": true},
                    {"type": "yes_no", "title": "Do you use oat milk?", "required": true}
                ]
            }))
            .map_err(|e| LlmError::Output(e.to_string()))
        }
    }

    async fn test_state() -> AppState {
        let db = DBService::new_in_memory().await.unwrap();
        let config = Config {
            jwt_secret: SECRET.to_string(),
            ..Config::default()
        };
        AppState::with_generator(db, config, Some(Arc::new(FixedGenerator)))
    }

    fn token_for(user: Uuid) -> String {
        utils::jwt::issue(user, SECRET.as_bytes(), 300).unwrap()
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
        extra_header: Option<(&str, &str)>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
        }
        if let Some((name, value)) = extra_header {
            builder = builder.header(name, value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn product_id(state: &AppState, code: &str) -> String {
        let (status, body) = call(state, "GET", "/api/boosts/products", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["code"] == code)
            .map(|p| p["id"].as_str().unwrap().to_string())
            .unwrap()
    }

    /// Bootstrap, generate and publish a form; returns the form JSON
    async fn owner_with_published_form(state: &AppState, owner: Uuid) -> Value {
        let (status, body) =
            call(state, "POST", "/api/profiles/bootstrap", Some(owner), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["created"], true);
        assert_eq!(body["data"]["welcome_bonus"], 100);

        let (status, form) = call(
            state,
            "POST",
            "/api/forms/generate",
            Some(owner),
            Some(json!({"prompt": "A short survey about coffee habits"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(form["data"]["status"], "draft");
        assert_eq!(form["data"]["questions"].as_array().unwrap().len(), 2);

        let form_id = form["data"]["id"].as_str().unwrap().to_string();
        let (status, published) = call(
            state,
            "POST",
            &format!("/api/forms/{form_id}/publish"),
            Some(owner),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(published["data"]["status"], "published");
        form["data"].clone()
    }

    #[tokio::test]
    async fn test_health_reports_ready_database() {
        let state = test_state().await;
        let (status, body) = call(&state, "GET", "/api/health", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_initialized"], true);
        assert_eq!(body["data"]["active_products"], 4);
    }

    #[tokio::test]
    async fn test_auth_is_enforced() {
        let state = test_state().await;

        let (status, body) = call(&state, "GET", "/api/credits/balance", None, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_data"]["code"], "unauthenticated");

        let forged = utils::jwt::issue(Uuid::new_v4(), b"someone-else", 300).unwrap();
        let request = Request::builder()
            .uri("/api/credits/balance")
            .header(header::AUTHORIZATION, format!("Bearer {forged}"))
            .body(Body::empty())
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_purchase_flow_with_idempotent_replay() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let form = owner_with_published_form(&state, owner).await;
        let form_id = form["id"].as_str().unwrap().to_string();
        let product = product_id(&state, "needs_responses_24h").await;
        let request = json!({"form_id": form_id, "boost_product_id": product});

        let (status, first) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            Some(owner),
            Some(request.clone()),
            Some(("Idempotency-Key", "checkout-1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["balance"], 40);
        assert_eq!(first["data"]["replayed"], false);
        assert_eq!(first["data"]["purchase"]["status"], "running");

        let (status, second) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            Some(owner),
            Some(request),
            Some(("Idempotency-Key", "checkout-1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["data"]["replayed"], true);
        assert_eq!(second["data"]["balance"], 40);
        assert_eq!(second["data"]["purchase"]["id"], first["data"]["purchase"]["id"]);

        let (_, ledger) =
            call(&state, "GET", "/api/credits/ledger", Some(owner), None, None).await;
        assert_eq!(ledger["data"].as_array().unwrap().len(), 2);

        let (status, feed) = call(&state, "GET", "/api/feed?limit=5", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        let items = feed["data"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["form_id"], form["id"]);
        assert_eq!(items[0]["placement"], "needs_responses");
    }

    #[tokio::test]
    async fn test_purchase_rejections() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let form = owner_with_published_form(&state, owner).await;
        let pin = product_id(&state, "pin_6h").await;
        let request = json!({"form_id": form["id"], "boost_product_id": pin});

        let (status, body) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            None,
            Some(request.clone()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_data"]["code"], "unauthenticated");

        let (status, body) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            Some(owner),
            Some(request),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error_data"]["code"], "insufficient_credits");

        let (_, balance) =
            call(&state, "GET", "/api/credits/balance", Some(owner), None, None).await;
        assert_eq!(balance["data"]["balance"], 100);
    }

    #[tokio::test]
    async fn test_completed_response_is_rewarded_once() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let form = owner_with_published_form(&state, owner).await;
        let form_id = form["id"].as_str().unwrap();

        let respondent = Uuid::new_v4();
        call(&state, "POST", "/api/profiles/bootstrap", Some(respondent), None, None).await;

        let answers: serde_json::Map<String, Value> = form["questions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| (q["id"].as_str().unwrap().to_string(), json!("yes")))
            .collect();
        let submission = json!({"answers": answers, "duration_sec": 120});
        let uri = format!("/api/forms/{form_id}/responses");

        let (status, first) = call(
            &state,
            "POST",
            &uri,
            Some(respondent),
            Some(submission.clone()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["rewarded_credits"], 20);
        assert_eq!(first["data"]["balance"], 120);

        let (status, second) =
            call(&state, "POST", &uri, Some(respondent), Some(submission), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["data"]["rewarded_credits"], 0);
        assert_eq!(second["data"]["balance"], 120);
    }

    #[tokio::test]
    async fn test_draft_form_rejects_responses() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        call(&state, "POST", "/api/profiles/bootstrap", Some(owner), None, None).await;
        let (_, form) = call(
            &state,
            "POST",
            "/api/forms/generate",
            Some(owner),
            Some(json!({"prompt": "A short survey about coffee habits"})),
            None,
        )
        .await;
        let form_id = form["data"]["id"].as_str().unwrap();

        let (status, body) = call(
            &state,
            "POST",
            &format!("/api/forms/{form_id}/responses"),
            None,
            Some(json!({"answers": {}, "duration_sec": 30})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_data"]["code"], "form_not_published");
    }

    #[tokio::test]
    async fn test_idempotency_header_overrides_body_key() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let form = owner_with_published_form(&state, owner).await;
        let product = product_id(&state, "needs_responses_24h").await;

        let (status, first) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            Some(owner),
            Some(json!({
                "form_id": form["id"],
                "boost_product_id": product,
                "idempotency_key": "from-body"
            })),
            Some(("Idempotency-Key", "from-header")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["purchase"]["idempotency_key"], "from-header");

        let (status, replay) = call(
            &state,
            "POST",
            "/api/boosts/purchase",
            Some(owner),
            Some(json!({"form_id": form["id"], "boost_product_id": product})),
            Some(("Idempotency-Key", "from-header")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["data"]["replayed"], true);
        assert_eq!(replay["data"]["balance"], 40);
    }

    #[tokio::test]
    async fn test_non_ascii_idempotency_header_is_rejected() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let form = owner_with_published_form(&state, owner).await;
        let product = product_id(&state, "needs_responses_24h").await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/boosts/purchase")
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for(owner)))
            .header(header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", HeaderValue::from_bytes(b"cl\xc3\xa9").unwrap())
            .body(Body::from(
                json!({"form_id": form["id"], "boost_product_id": product}).to_string(),
            ))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error_data"]["code"], "validation_error");

        let (_, balance) =
            call(&state, "GET", "/api/credits/balance", Some(owner), None, None).await;
        assert_eq!(balance["data"]["balance"], 100);
    }
}
