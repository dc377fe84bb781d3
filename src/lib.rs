//! homeware-api
//!
//! Storefront checkout and catalog import backend for a home-goods
//! retailer: inventory-safe order creation with customer identity
//! reconciliation, an admin order status machine, and a spreadsheet
//! bulk-import pipeline.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::AdminGuard;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    checkout::CheckoutService, import::ImportService, order_status::OrderStatusService,
    orders::OrderQueryService,
};

/// Service container handed to the handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: CheckoutService,
    pub order_status: OrderStatusService,
    pub orders: OrderQueryService,
    pub import: ImportService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        admin_guard: Arc<AdminGuard>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(db.clone(), event_sender.clone()),
            order_status: OrderStatusService::new(
                db.clone(),
                admin_guard.clone(),
                event_sender.clone(),
            ),
            orders: OrderQueryService::new(db.clone(), admin_guard.clone()),
            import: ImportService::new(db, admin_guard, event_sender),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub services: AppServices,
}

/// Builds the application router with tracing and CORS layers applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", handlers::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
