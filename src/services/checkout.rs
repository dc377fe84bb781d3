use crate::{
    auth::AuthSession,
    db::DbPool,
    entities::{
        customer,
        order::{self, OrderStatus},
        order_item, product,
    },
    errors::{first_validation_message, ServiceError},
    events::{Event, EventSender},
};
use lazy_static::lazy_static;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    /// National mobile numbers: leading `0` or `+84`, a carrier prefix
    /// digit in {3,5,7,8,9}, then 8 more digits.
    static ref PHONE_RE: Regex = Regex::new(r"^(0|\+84)[35789]\d{8}$").unwrap();
}

pub const MIN_ITEM_QUANTITY: i32 = 1;
pub const MAX_ITEM_QUANTITY: i32 = 99;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Name must be between 2 and 100 characters"
    ))]
    pub customer_name: String,

    #[validate(regex(path = "PHONE_RE", message = "Invalid phone number"))]
    pub phone: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,

    #[validate(length(
        min = 10,
        max = 500,
        message = "Address must be between 10 and 500 characters"
    ))]
    pub address: String,

    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,

    pub items: Vec<OrderItemInput>,
}

impl CreateOrderInput {
    /// Trims free-text fields and treats empty optionals as absent.
    fn normalized(mut self) -> Self {
        self.customer_name = self.customer_name.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.address = self.address.trim().to_string();
        self.email = self
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        self.notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
}

/// Merges duplicate product lines so the stock pre-check and the decrement
/// see the same aggregate demand per product. Input order is preserved.
fn merge_item_quantities(items: &[OrderItemInput]) -> Vec<(Uuid, i32)> {
    let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, qty)) => *qty += item.quantity,
            None => merged.push((item.product_id, item.quantity)),
        }
    }
    merged
}

/// True for unique/check constraint violations surfacing from the
/// database layer, which the checkout path translates into business-level
/// failures instead of leaking raw database errors. Foreign-key failures
/// are deliberately excluded; those are infrastructure problems.
fn is_constraint_violation(err: &DbErr) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("unique") || msg.contains("check constraint") || msg.contains("duplicate key")
}

/// Maps a stock-decrement failure: a constraint hit means a concurrent
/// checkout won the race past the pre-check, so the caller gets the same
/// out-of-stock answer the pre-check would have given.
fn decrement_failure(product_name: &str, err: DbErr) -> ServiceError {
    if is_constraint_violation(&err) {
        ServiceError::InsufficientStock(format!("{} is out of stock", product_name))
    } else {
        ServiceError::DatabaseError(err)
    }
}

/// Maps a customer-insert failure: a constraint hit means a concurrent
/// checkout claimed the phone number first.
fn customer_insert_failure(err: DbErr) -> ServiceError {
    if is_constraint_violation(&err) {
        ServiceError::Conflict("Phone number already in use by another account".to_string())
    } else {
        ServiceError::DatabaseError(err)
    }
}

/// Checkout engine: validates a cart, atomically reserves inventory,
/// reconciles customer identity and persists the order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CheckoutService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates an order from the submitted cart and shipping details.
    ///
    /// Everything from the availability check to the order insert runs in
    /// one transaction; the row locks taken on the product batch prevent
    /// two concurrent checkouts from both passing the stock check for the
    /// last unit.
    #[instrument(skip(self, input), fields(user_id = ?session.user_id))]
    pub async fn create_order(
        &self,
        session: &AuthSession,
        input: CreateOrderInput,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let input = input.normalized();
        input
            .validate()
            .map_err(|e| ServiceError::ValidationError(first_validation_message(&e)))?;

        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        for item in &input.items {
            if !(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&item.quantity) {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity must be between {} and {}",
                    MIN_ITEM_QUANTITY, MAX_ITEM_QUANTITY
                )));
            }
        }

        let requested = merge_item_quantities(&input.items);
        let product_ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        // Row locks on the whole batch; dropped harmlessly on backends
        // without FOR UPDATE support.
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .filter(product::Column::IsActive.eq(true))
            .lock_exclusive()
            .all(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch products for checkout");
                ServiceError::DatabaseError(e)
            })?;

        if products.len() < product_ids.len() {
            return Err(ServiceError::InvalidInput(
                "Some products are unavailable or no longer active".to_string(),
            ));
        }

        let product_by_id = |id: Uuid| {
            products
                .iter()
                .find(|p| p.id == id)
                .expect("product fetched above")
        };

        // Availability pre-check runs to completion before any mutation.
        for (id, quantity) in &requested {
            let found = product_by_id(*id);
            if found.stock == 0 {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} is out of stock",
                    found.name
                )));
            }
            if found.stock < *quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} left in stock for {}",
                    found.stock, found.name
                )));
            }
        }

        // Inventory reservation: decrement inside the same transaction.
        for (id, quantity) in &requested {
            let found = product_by_id(*id).clone();
            let remaining = found.stock - quantity;
            let name = found.name.clone();
            let mut active: product::ActiveModel = found.into();
            active.stock = Set(remaining);
            active.update(&txn).await.map_err(|e| {
                if is_constraint_violation(&e) {
                    warn!(product_id = %id, error = %e, "stock constraint hit during decrement");
                } else {
                    error!(error = %e, product_id = %id, "Failed to decrement stock");
                }
                decrement_failure(&name, e)
            })?;
        }

        // Authoritative total from snapshot prices; client totals are
        // never trusted.
        let total: i64 = requested
            .iter()
            .map(|(id, quantity)| product_by_id(*id).price * i64::from(*quantity))
            .sum();

        let reconciled =
            reconcile_customer(&txn, &input, session.user_id.as_deref()).await?;

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            total: Set(total),
            status: Set(OrderStatus::Pending),
            shipping_name: Set(input.customer_name.clone()),
            shipping_phone: Set(input.phone.clone()),
            shipping_address: Set(input.address.clone()),
            notes: Set(input.notes.clone()),
            customer_id: Set(reconciled.id),
            user_id: Set(session.user_id.clone()),
            ..Default::default()
        };
        order_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        for (id, quantity) in &requested {
            let snapshot_price = product_by_id(*id).price;
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(*id),
                quantity: Set(*quantity),
                price: Set(snapshot_price),
                ..Default::default()
            };
            item.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order item");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, total, customer_id = %reconciled.id, "Order created successfully");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        Ok(CreateOrderResponse { order_id })
    }
}

/// Resolves the tension between phone-based identity (guests, returning
/// customers) and account-based identity (authenticated users), in strict
/// priority order:
///
/// 1. phone match: refresh contact fields; link the caller's account only
///    when the record is unlinked, never overwrite an existing link
/// 2. account match: move the record to the submitted phone unless another
///    customer already owns it
/// 3. otherwise create a fresh record, guest or linked
async fn reconcile_customer(
    txn: &DatabaseTransaction,
    input: &CreateOrderInput,
    user_id: Option<&str>,
) -> Result<customer::Model, ServiceError> {
    if let Some(existing) = customer::Entity::find()
        .filter(customer::Column::Phone.eq(input.phone.as_str()))
        .one(txn)
        .await?
    {
        let already_linked = existing.user_id.is_some();
        let mut active: customer::ActiveModel = existing.into();
        // Submitted checkout data is treated as the most current
        active.name = Set(input.customer_name.clone());
        active.email = Set(input.email.clone());
        active.address = Set(input.address.clone());
        if !already_linked {
            if let Some(uid) = user_id {
                active.user_id = Set(Some(uid.to_string()));
            }
        }
        let updated = active.update(txn).await?;
        return Ok(updated);
    }

    if let Some(uid) = user_id {
        if let Some(existing) = customer::Entity::find()
            .filter(customer::Column::UserId.eq(uid))
            .one(txn)
            .await?
        {
            let phone_owner = customer::Entity::find()
                .filter(customer::Column::Phone.eq(input.phone.as_str()))
                .filter(customer::Column::Id.ne(existing.id))
                .one(txn)
                .await?;
            if phone_owner.is_some() {
                return Err(ServiceError::Conflict(
                    "Phone number already in use by another account".to_string(),
                ));
            }

            let mut active: customer::ActiveModel = existing.into();
            active.name = Set(input.customer_name.clone());
            active.phone = Set(input.phone.clone());
            active.email = Set(input.email.clone());
            active.address = Set(input.address.clone());
            let updated = active.update(txn).await?;
            return Ok(updated);
        }
    }

    let created = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id.map(str::to_string)),
        name: Set(input.customer_name.clone()),
        phone: Set(input.phone.clone()),
        email: Set(input.email.clone()),
        address: Set(input.address.clone()),
        ..Default::default()
    };
    created.insert(txn).await.map_err(customer_insert_failure)
}
