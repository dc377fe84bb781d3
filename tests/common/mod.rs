#![allow(dead_code)]

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbBackend, Schema,
};
use uuid::Uuid;

use homeware_api::{
    app_router,
    auth::{AdminGuard, AuthSession},
    config::AppConfig,
    entities::{self, product},
    services::checkout::{CreateOrderInput, OrderItemInput},
    AppServices, AppState,
};

pub const ADMIN_EMAIL: &str = "admin@example.com";

/// In-memory SQLite database plus the full service stack, with a known
/// admin allow-list. A single pooled connection keeps the in-memory
/// database alive and shared.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.expect("connect to sqlite");

        let schema = Schema::new(DbBackend::Sqlite);
        let statements = [
            schema.create_table_from_entity(entities::Product),
            schema.create_table_from_entity(entities::Customer),
            schema.create_table_from_entity(entities::Order),
            schema.create_table_from_entity(entities::OrderItem),
        ];
        for statement in statements {
            db.execute(db.get_database_backend().build(&statement))
                .await
                .expect("create table");
        }

        let db = Arc::new(db);
        let admin_guard = Arc::new(AdminGuard::new(vec![ADMIN_EMAIL.to_string()]));
        let services = AppServices::new(db.clone(), admin_guard, None);

        Self { db, services }
    }

    /// The full HTTP router over this app's database and services.
    pub fn router(&self) -> axum::Router {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            log_level: "info".to_string(),
            environment: "test".to_string(),
            auto_migrate: false,
            admin_emails: vec![ADMIN_EMAIL.to_string()],
        };
        app_router(AppState {
            db: self.db.clone(),
            config,
            services: self.services.clone(),
        })
    }

    pub fn admin_session() -> AuthSession {
        AuthSession::authenticated("admin-1", ADMIN_EMAIL)
    }

    pub fn user_session(user_id: &str) -> AuthSession {
        AuthSession::authenticated(user_id, format!("{}@customer.example.com", user_id))
    }

    pub async fn seed_product(&self, sku: &str, name: &str, price: i64, stock: i32) -> product::Model {
        let active = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            category: Set("Kitchen".to_string()),
            images: Set(serde_json::json!(["https://img.example.com/p.jpg"])),
            is_active: Set(true),
            stock: Set(stock),
            low_stock_threshold: Set(5),
            ..Default::default()
        };
        active.insert(&*self.db).await.expect("seed product")
    }

    pub async fn seed_inactive_product(&self, sku: &str, price: i64, stock: i32) -> product::Model {
        let active = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Inactive {}", sku)),
            description: Set(None),
            price: Set(price),
            category: Set("Kitchen".to_string()),
            images: Set(serde_json::json!(["https://img.example.com/p.jpg"])),
            is_active: Set(false),
            stock: Set(stock),
            low_stock_threshold: Set(5),
            ..Default::default()
        };
        active.insert(&*self.db).await.expect("seed inactive product")
    }
}

/// A valid checkout input for the given cart lines.
pub fn order_input(phone: &str, items: Vec<OrderItemInput>) -> CreateOrderInput {
    CreateOrderInput {
        customer_name: "An Nguyen".to_string(),
        phone: phone.to_string(),
        email: Some("an.nguyen@example.com".to_string()),
        address: "12 Hang Gai, Hoan Kiem, Ha Noi".to_string(),
        notes: None,
        items,
    }
}

pub fn line(product_id: Uuid, quantity: i32) -> OrderItemInput {
    OrderItemInput {
        product_id,
        quantity,
    }
}
