// REST API endpoints for the context service

use axum::{
    Extension, Router,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::auth::{AuthError, TokenValidator, VerifiedIdentity};
use crate::vault::{ContextStore, HistoryQuery};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<TokenValidator>,
    pub store: Arc<dyn ContextStore>,
}

impl AppState {
    pub fn new(validator: Arc<TokenValidator>, store: Arc<dyn ContextStore>) -> Self {
        Self { validator, store }
    }
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/context",
            get(get_context).put(set_context).delete(clear_context),
        )
        .route("/contexts", get(list_contexts))
        .route("/history", get(history))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Validate the bearer token and attach the verified identity to the request.
async fn require_identity(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&request) else {
        return unauthorized("missing bearer token");
    };

    match state.validator.validate(&token).await {
        Ok(identity) => {
            debug!(
                "Authenticated {} via {}",
                identity.display(),
                identity.authorized_party()
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            warn!("Rejected bearer token: {}", err);
            auth_error_response(&err)
        }
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn auth_error_response(err: &AuthError) -> Response {
    if err.is_retryable() {
        // Identity provider unreachable: degraded, not rejected
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "authentication temporarily unavailable" })),
        )
            .into_response();
    }
    unauthorized(&err.to_string())
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn get_context(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Response {
    match state
        .store
        .get(identity.subject(), identity.authorized_party())
        .await
    {
        Some(context) => Json(context).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "context": null }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetContextRequest {
    patient_id: String,
}

async fn set_context(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    Json(payload): Json<SetContextRequest>,
) -> Response {
    // Subject and actor come from the token, never from the payload
    let result = state
        .store
        .set(
            identity.subject(),
            identity.email(),
            &payload.patient_id,
            identity.authorized_party(),
        )
        .await;

    match result {
        Ok(context) => Json(context).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn clear_context(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Json<Value> {
    let cleared = state
        .store
        .clear(identity.subject(), identity.authorized_party())
        .await;
    Json(json!({ "cleared": cleared }))
}

/// List every active context (administrative view).
async fn list_contexts(State(state): State<AppState>) -> Json<Value> {
    let contexts = state.store.list_all().await;
    Json(json!({
        "count": contexts.len(),
        "contexts": contexts,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    all_subjects: Option<bool>,
    include_access: Option<bool>,
}

async fn history(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    Query(params): Query<HistoryParams>,
) -> Json<Value> {
    let mut query = if params.all_subjects.unwrap_or(false) {
        HistoryQuery::all()
    } else {
        HistoryQuery::for_subject(identity.subject().clone())
    };
    query.limit = params.limit;
    if params.include_access == Some(false) {
        query = query.without_access();
    }

    let entries = state.store.history(query).await;
    Json(json!({
        "count": entries.len(),
        "entries": entries,
    }))
}
