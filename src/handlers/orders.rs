use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    auth::AuthSession,
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::ApiResponse,
    services::checkout::{CreateOrderInput, CreateOrderResponse},
    services::orders::{OrderFilters, OrderListResponse, DEFAULT_PAGE_SIZE},
    AppState,
};

pub async fn create_order(
    State(state): State<AppState>,
    session: AuthSession,
    Json(input): Json<CreateOrderInput>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let response = state.services.checkout.create_order(&session, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(response))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

fn map_status_str(status: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(status.trim()).map_err(|_| {
        ServiceError::InvalidInput(format!("Unknown order status: {}", status))
    })
}

pub async fn update_order_status(
    State(state): State<AppState>,
    session: AuthSession,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let new_status = map_status_str(&request.status)?;
    state
        .services
        .order_status
        .update_status(&session, order_id, new_status)
        .await?;
    Ok(Json(ApiResponse::new(serde_json::Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    pub status: Option<String>,
    pub search: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    DEFAULT_PAGE_SIZE
}

pub async fn list_orders(
    State(state): State<AppState>,
    session: AuthSession,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let status = query.status.as_deref().map(map_status_str).transpose()?;
    let filters = OrderFilters {
        status,
        search: query.search,
    };

    let response = state
        .services
        .orders
        .get_orders(&session, query.page, query.per_page, filters)
        .await?;
    Ok(Json(ApiResponse::new(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_mapping_is_case_insensitive() {
        assert_eq!(map_status_str("PAID").unwrap(), OrderStatus::Paid);
        assert_eq!(map_status_str("cancelled").unwrap(), OrderStatus::Cancelled);
        assert_eq!(map_status_str(" shipped ").unwrap(), OrderStatus::Shipped);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_matches!(map_status_str("refunded"), Err(ServiceError::InvalidInput(_)));
    }
}
