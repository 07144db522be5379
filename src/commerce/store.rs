use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    BusinessCategory, Order, OrderEvent, OrderStatus, PaymentProof, Plan, Subscription,
};
use super::subscriptions::SubscriptionChange;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("uniqueness conflict on {0}")]
    Conflict(String),
    #[error("catalog regeneration already holds the catalog lock")]
    CatalogBusy,
    #[error("category {category_id} would have {found} catalog plans")]
    CatalogIncomplete { category_id: Uuid, found: usize },
    #[error("order {0} does not exist")]
    MissingOrder(Uuid),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a whole-catalog swap.
#[derive(Debug, Clone)]
pub struct CatalogSwap {
    pub inserted: Vec<Plan>,
    pub retired: usize,
}

/// Outcome of a compare-and-set on an order's status.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Order),
    /// Another writer moved the order first; carries the winner's state.
    Lost(Order),
}

#[derive(Debug, Clone)]
pub enum Settlement {
    Settled {
        order: Order,
        change: SubscriptionChange,
    },
    Lost(Order),
}

/// Non-paid terminal transition requested from `pending`. Rejected proofs are
/// kept in the audit trail, never in `gateway_payment_id`.
#[derive(Debug, Clone)]
pub struct TerminalUpdate<'a> {
    pub status: OrderStatus,
    pub failure_reason: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// key: commerce-category-directory -> external category listing
#[async_trait]
pub trait CategoryDirectory: Send + Sync {
    /// Active categories ordered by `(order, name)`.
    async fn list_active(&self) -> StoreResult<Vec<BusinessCategory>>;
}

/// key: commerce-store -> plan, order, subscription persistence seam
#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<Plan>>;
    async fn active_plans(&self, category_id: Option<Uuid>) -> StoreResult<Vec<Plan>>;

    /// Retires every active non-custom plan and inserts `plans` atomically.
    /// Fails without any visible change unless every id in `category_ids`
    /// ends with exactly three active non-custom plans.
    async fn replace_catalog(
        &self,
        category_ids: &[Uuid],
        plans: Vec<Plan>,
    ) -> StoreResult<CatalogSwap>;

    async fn insert_order(&self, order: &Order) -> StoreResult<()>;
    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>>;
    async fn order_by_payment_id(&self, gateway_payment_id: &str) -> StoreResult<Option<Order>>;

    /// CAS `pending -> update.status`.
    async fn transition_order(
        &self,
        order_id: Uuid,
        update: TerminalUpdate<'_>,
    ) -> StoreResult<Transition>;

    /// CAS `pending -> paid` and create or extend the subscriber's
    /// subscription in the same atomic unit.
    async fn settle_order(
        &self,
        order_id: Uuid,
        proof: &PaymentProof,
        at: DateTime<Utc>,
    ) -> StoreResult<Settlement>;

    async fn append_order_event(&self, event: &OrderEvent) -> StoreResult<()>;
    async fn order_events(&self, order_id: Uuid) -> StoreResult<Vec<OrderEvent>>;

    async fn active_subscription(&self, subscriber_id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn active_subscriptions_with_plans(&self) -> StoreResult<Vec<(Subscription, Plan)>>;
}
