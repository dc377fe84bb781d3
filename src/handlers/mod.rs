pub mod imports;
pub mod orders;

use axum::{
    routing::{get, post, put},
    Router,
};
use serde::Serialize;

use crate::AppState;

/// Standard success envelope for JSON responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/products/import", post(imports::import_products))
        .route("/health", get(health_check))
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
