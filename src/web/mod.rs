//! HTTP and WebSocket surface
//!
//! | Route            | Handler                              |
//! |------------------|--------------------------------------|
//! | `GET /`          | embedded UI page                     |
//! | `GET /static/app.js` | embedded UI script               |
//! | `GET /healthz`   | [`health::health_handler`]           |
//! | `GET /ws/events` | [`events::events_handler`]           |
//! | `GET /ws/control`| [`control::control_handler`]         |

pub mod control;
pub mod events;
pub mod health;

use axum::http::{header, HeaderValue};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::AppContext;

pub use control::{ControlCommand, ControlError};

const INDEX_HTML: &str = include_str!("../../static/index.html");
const APP_JS: &str = include_str!("../../static/app.js");

/// Build the application router
pub fn router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx.settings.cors_origins);

    Router::new()
        .route("/", get(index))
        .route("/static/app.js", get(app_js))
        .route("/healthz", get(health::health_handler))
        .route("/ws/events", get(events::events_handler))
        .route("/ws/control", get(control::control_handler))
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], APP_JS)
}

/// `*` allows any origin; otherwise only the listed ones
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
