use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{AdminGuard, AuthSession},
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        order_item, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Validates whether a status transition is allowed.
///
/// `Completed` and `Cancelled` are terminal; everything not listed here is
/// rejected.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, Cancelled)
            | (Paid, Shipped)
            | (Paid, Cancelled)
            | (Shipped, Completed)
            | (Shipped, Cancelled)
    )
}

/// Admin-only order status transitions with compensating stock
/// restoration on cancellation.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    admin_guard: Arc<AdminGuard>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DbPool>,
        admin_guard: Arc<AdminGuard>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            admin_guard,
            event_sender,
        }
    }

    /// Applies a guarded status transition to an order.
    ///
    /// The order row is locked for the duration of the transaction so
    /// concurrent transition attempts on the same order are serialized;
    /// a second cancel therefore fails the transition check instead of
    /// restoring stock twice.
    #[instrument(skip(self, session), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        session: &AuthSession,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let admin = self.admin_guard.require_admin(session)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        // Row lock serializes concurrent transition attempts
        let existing = order::Entity::find()
            .filter(order::Column::Id.eq(order_id))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order for status update");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = existing.status;

        if !is_valid_transition(old_status, new_status) {
            warn!(order_id = %order_id, %old_status, %new_status, "rejected status transition");
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot transition from status '{}' to '{}'",
                old_status, new_status
            )));
        }

        if new_status == OrderStatus::Cancelled {
            restore_stock(&txn, order_id).await?;
        }

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            %old_status,
            %new_status,
            admin = %admin.email,
            "Order status updated"
        );

        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
            }
            if new_status == OrderStatus::Cancelled {
                if let Err(e) = event_sender.send(Event::OrderCancelled(order_id)).await {
                    warn!(error = %e, order_id = %order_id, "Failed to send order cancelled event");
                }
            }
        }

        Ok(updated)
    }
}

/// Returns every item's quantity to its product's stock. Runs inside the
/// caller's transaction, before the status flips to CANCELLED.
async fn restore_stock(
    txn: &sea_orm::DatabaseTransaction,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let mut items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(txn)
        .await?;
    // Fixed lock acquisition order across callers; avoids deadlocking
    // against a concurrent checkout over an overlapping product set
    items.sort_by_key(|item| item.product_id);

    for item in items {
        let found = product::Entity::find()
            .filter(product::Column::Id.eq(item.product_id))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "product {} referenced by order {} no longer exists",
                    item.product_id, order_id
                ))
            })?;

        let restored = found.stock + item.quantity;
        let mut active: product::ActiveModel = found.into();
        active.stock = Set(restored);
        active.update(txn).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn transition_table_closure() {
        use OrderStatus::*;
        let allowed = [
            (Pending, Paid),
            (Pending, Cancelled),
            (Paid, Shipped),
            (Paid, Cancelled),
            (Shipped, Completed),
            (Shipped, Cancelled),
        ];

        for from in OrderStatus::iter() {
            for to in OrderStatus::iter() {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    is_valid_transition(from, to),
                    expected,
                    "transition {:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        use OrderStatus::*;
        for to in OrderStatus::iter() {
            assert!(!is_valid_transition(Completed, to));
            assert!(!is_valid_transition(Cancelled, to));
        }
    }
}
