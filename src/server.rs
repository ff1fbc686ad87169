//! HTTP surface.
//!
//! `/me` requires an identity, `/session` reports one if cached, and
//! `/health` is open.

use anyhow::Result;
use axum::{Extension, Json, Router, middleware::from_fn_with_state, routing::get};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::auth::Identity;
use crate::middleware::{AuthState, pass_user_context, verify_access_token};

pub fn build_router(state: AuthState) -> Router {
    let protected = Router::new()
        .route("/me", get(me))
        .route_layer(from_fn_with_state(state.clone(), verify_access_token));

    let advisory = Router::new()
        .route("/session", get(session))
        .route_layer(from_fn_with_state(state, pass_user_context));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .merge(advisory)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(router: Router, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Identity gate listening on http://{}", bind);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn me(Extension(identity): Extension<Identity>) -> Json<Value> {
    Json(json!({
        "subject_id": identity.subject_id(),
        "user": identity.user(),
    }))
}

async fn session(identity: Option<Extension<Identity>>) -> Json<Value> {
    match identity {
        Some(Extension(identity)) => Json(json!({
            "authenticated": true,
            "subject_id": identity.subject_id(),
        })),
        None => Json(json!({ "authenticated": false })),
    }
}
