use axum::extract::State;
use axum::Json;

use crate::app::AppContext;
use crate::hub::Health;

/// `GET /healthz`
pub async fn health_handler(State(ctx): State<AppContext>) -> Json<Health> {
    Json(ctx.hub.health().await)
}
