use std::sync::Arc;

use sea_orm::{
    ColumnTrait, Condition, EntityTrait, IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    auth::{AdminGuard, AuthSession},
    db::DbPool,
    entities::order::{self, OrderStatus},
    errors::ServiceError,
};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilters {
    /// Exact status match
    pub status: Option<OrderStatus>,
    /// Substring search across order id, shipping name and shipping phone
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub pagination: Pagination,
}

/// Clamps a requested page into the valid range for `total` rows,
/// returning the effective page and row offset. Page numbering is
/// 1-based; an over-range request lands on the last valid page.
pub(crate) fn clamp_page(page: u64, per_page: u64, total: u64) -> (u64, u64) {
    let total_pages = if total == 0 {
        1
    } else {
        total.div_ceil(per_page)
    };
    let page = page.max(1).min(total_pages);
    (page, (page - 1) * per_page)
}

/// Admin order listing with filtering and consistent pagination.
#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DbPool>,
    admin_guard: Arc<AdminGuard>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DbPool>, admin_guard: Arc<AdminGuard>) -> Self {
        Self { db, admin_guard }
    }

    /// Lists orders for the back office, newest first.
    ///
    /// Count and page fetch run inside one repeatable-read transaction so
    /// the reported total and the returned rows are mutually consistent
    /// under concurrent writes. SQLite ignores the isolation hint, where
    /// transactions are serializable anyway.
    #[instrument(skip(self, session))]
    pub async fn get_orders(
        &self,
        session: &AuthSession,
        page: u64,
        per_page: u64,
        filters: OrderFilters,
    ) -> Result<OrderListResponse, ServiceError> {
        self.admin_guard.require_admin(session)?;

        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let mut query = order::Entity::find();
        if let Some(status) = filters.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(search) = filters
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let mut condition = Condition::any()
                .add(order::Column::ShippingName.contains(search))
                .add(order::Column::ShippingPhone.contains(search));
            // The id column is a UUID, matched whole rather than by
            // substring to stay portable across backends
            if let Ok(id) = Uuid::parse_str(search) {
                condition = condition.add(order::Column::Id.eq(id));
            }
            query = query.filter(condition);
        }

        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::RepeatableRead), None)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to begin transaction for order listing");
                ServiceError::DatabaseError(e)
            })?;

        let total = query.clone().count(&txn).await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let (page, offset) = clamp_page(page, per_page, total);

        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .offset(offset)
            .limit(per_page)
            .all(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, page, per_page, "Failed to fetch orders page");
                ServiceError::DatabaseError(e)
            })?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        let total_pages = if total == 0 { 1 } else { total.div_ceil(per_page) };

        info!(total, page, per_page, returned = orders.len(), "Orders listed");

        Ok(OrderListResponse {
            orders,
            pagination: Pagination {
                page,
                per_page,
                total,
                total_pages,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_range_page_clamps_to_last_valid_page() {
        // 50 orders, page 100 of 20 => page 3, offset 40
        assert_eq!(clamp_page(100, 20, 50), (3, 40));
    }

    #[test]
    fn zero_total_still_yields_first_page() {
        assert_eq!(clamp_page(5, 20, 0), (1, 0));
    }

    #[test]
    fn page_zero_is_treated_as_first() {
        assert_eq!(clamp_page(0, 20, 50), (1, 0));
    }

    #[test]
    fn exact_boundary_keeps_requested_page() {
        assert_eq!(clamp_page(3, 20, 60), (3, 40));
    }
}
