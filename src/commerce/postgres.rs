use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{
    BillingCycle, BusinessCategory, FeatureLimits, Order, OrderEvent, OrderEventType, OrderStatus,
    PaymentProof, Plan, PlanTier, Subscription, SubscriptionStatus,
};
use super::store::{
    CatalogSwap, CategoryDirectory, CommerceStore, Settlement, StoreError, StoreResult,
    TerminalUpdate, Transition,
};
use super::subscriptions::{apply_payment, SubscriptionChange};

/// Advisory lock key held for the lifetime of a catalog swap transaction.
const CATALOG_LOCK_KEY: i64 = 0x6d65_6e75_6361_7431;

/// key: commerce-postgres-store -> sqlx-backed persistence
#[derive(Clone)]
pub struct PgCommerceStore {
    pool: PgPool,
}

impl PgCommerceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
        }
    }
    StoreError::Database(err)
}

#[derive(FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    sort_order: i32,
    is_active: bool,
}

#[derive(FromRow)]
struct PlanRow {
    id: Uuid,
    category_id: Uuid,
    name: String,
    tier: String,
    price: i64,
    original_price: i64,
    currency: String,
    billing_cycle: String,
    is_default: bool,
    feature_limits: Json<FeatureLimits>,
    features_list: Json<Vec<String>>,
    is_custom: bool,
    active: bool,
    version: i32,
    superseded_by: Option<Uuid>,
    created_by: String,
    updated_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = StoreError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: row.id,
            category_id: row.category_id,
            name: row.name,
            tier: PlanTier::from_str(&row.tier)
                .ok_or_else(|| StoreError::Corrupt(format!("plan tier `{}`", row.tier)))?,
            price: row.price,
            original_price: row.original_price,
            currency: row.currency,
            billing_cycle: BillingCycle::from_str(&row.billing_cycle).ok_or_else(|| {
                StoreError::Corrupt(format!("plan billing cycle `{}`", row.billing_cycle))
            })?,
            is_default: row.is_default,
            feature_limits: row.feature_limits.0,
            features_list: row.features_list.0,
            is_custom: row.is_custom,
            active: row.active,
            version: row.version,
            superseded_by: row.superseded_by,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    subscriber_id: Uuid,
    plan_id: Uuid,
    amount: i64,
    currency: String,
    billing_cycle: String,
    status: String,
    gateway_order_id: String,
    gateway_payment_id: Option<String>,
    gateway_signature: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            subscriber_id: row.subscriber_id,
            plan_id: row.plan_id,
            amount: row.amount,
            currency: row.currency,
            billing_cycle: BillingCycle::from_str(&row.billing_cycle).ok_or_else(|| {
                StoreError::Corrupt(format!("order billing cycle `{}`", row.billing_cycle))
            })?,
            status: OrderStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("order status `{}`", row.status)))?,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            gateway_signature: row.gateway_signature,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: Uuid,
    subscriber_id: Uuid,
    plan_id: Uuid,
    source_order_id: Uuid,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            subscriber_id: row.subscriber_id,
            plan_id: row.plan_id,
            source_order_id: row.source_order_id,
            start_date: row.start_date,
            end_date: row.end_date,
            status: SubscriptionStatus::from_str(&row.status).ok_or_else(|| {
                StoreError::Corrupt(format!("subscription status `{}`", row.status))
            })?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderEventRow {
    id: Uuid,
    order_id: Uuid,
    event_type: String,
    payload: Value,
    occurred_at: DateTime<Utc>,
}

async fn insert_plan(tx: &mut Transaction<'_, Postgres>, plan: &Plan) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO plans (
            id, category_id, name, tier, price, original_price, currency, billing_cycle,
            is_default, feature_limits, features_list, is_custom, active, version,
            superseded_by, created_by, updated_by, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        "#,
    )
    .bind(plan.id)
    .bind(plan.category_id)
    .bind(&plan.name)
    .bind(plan.tier.as_str())
    .bind(plan.price)
    .bind(plan.original_price)
    .bind(&plan.currency)
    .bind(plan.billing_cycle.as_str())
    .bind(plan.is_default)
    .bind(Json(plan.feature_limits))
    .bind(Json(&plan.features_list))
    .bind(plan.is_custom)
    .bind(plan.active)
    .bind(plan.version)
    .bind(plan.superseded_by)
    .bind(&plan.created_by)
    .bind(&plan.updated_by)
    .bind(plan.created_at)
    .bind(plan.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(map_conflict)?;
    Ok(())
}

async fn write_subscription_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &SubscriptionChange,
) -> StoreResult<()> {
    match change {
        SubscriptionChange::Opened {
            subscription,
            expired_prior,
        } => {
            if let Some(closed) = expired_prior {
                sqlx::query("UPDATE subscriptions SET status = $2, updated_at = $3 WHERE id = $1")
                    .bind(closed.id)
                    .bind(closed.status.as_str())
                    .bind(closed.updated_at)
                    .execute(&mut **tx)
                    .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO subscriptions (
                    id, subscriber_id, plan_id, source_order_id, start_date, end_date,
                    status, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(subscription.id)
            .bind(subscription.subscriber_id)
            .bind(subscription.plan_id)
            .bind(subscription.source_order_id)
            .bind(subscription.start_date)
            .bind(subscription.end_date)
            .bind(subscription.status.as_str())
            .bind(subscription.created_at)
            .bind(subscription.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(map_conflict)?;
        }
        SubscriptionChange::Extended { subscription } => {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET plan_id = $2, end_date = $3, source_order_id = $4, updated_at = $5
                WHERE id = $1
                "#,
            )
            .bind(subscription.id)
            .bind(subscription.plan_id)
            .bind(subscription.end_date)
            .bind(subscription.source_order_id)
            .bind(subscription.updated_at)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl CategoryDirectory for PgCommerceStore {
    async fn list_active(&self) -> StoreResult<Vec<BusinessCategory>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, sort_order, is_active FROM business_categories WHERE is_active = TRUE ORDER BY sort_order ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| BusinessCategory {
                id: row.id,
                name: row.name,
                order: row.sort_order,
                is_active: row.is_active,
            })
            .collect())
    }
}

#[async_trait]
impl CommerceStore for PgCommerceStore {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<Plan>> {
        let row = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Plan::try_from).transpose()
    }

    async fn active_plans(&self, category_id: Option<Uuid>) -> StoreResult<Vec<Plan>> {
        let rows = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT * FROM plans
            WHERE active = TRUE AND ($1::uuid IS NULL OR category_id = $1)
            ORDER BY category_id ASC, price ASC
            "#,
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Plan::try_from).collect()
    }

    async fn replace_catalog(
        &self,
        category_ids: &[Uuid],
        plans: Vec<Plan>,
    ) -> StoreResult<CatalogSwap> {
        let mut tx = self.pool.begin().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(CATALOG_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;
        if !locked {
            return Err(StoreError::CatalogBusy);
        }

        let prior: Vec<(Uuid, Uuid, String, i32)> = sqlx::query_as(
            "SELECT id, category_id, tier, version FROM plans WHERE active = TRUE AND is_custom = FALSE FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut by_slot: HashMap<(Uuid, String), (Uuid, i32)> = prior
            .into_iter()
            .map(|(id, category_id, tier, version)| ((category_id, tier), (id, version)))
            .collect();

        let now = Utc::now();
        let mut retired = 0;
        let mut inserted = Vec::with_capacity(plans.len());
        for mut plan in plans {
            if let Some((prior_id, prior_version)) =
                by_slot.remove(&(plan.category_id, plan.tier.as_str().to_string()))
            {
                plan.version = prior_version + 1;
                sqlx::query(
                    "UPDATE plans SET active = FALSE, superseded_by = $2, updated_by = $3, updated_at = $4 WHERE id = $1",
                )
                .bind(prior_id)
                .bind(plan.id)
                .bind(&plan.updated_by)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                retired += 1;
            }
            insert_plan(&mut tx, &plan).await?;
            inserted.push(plan);
        }

        // Slots with no replacement (deactivated categories, dropped tiers).
        for (leftover_id, _) in by_slot.into_values() {
            sqlx::query("UPDATE plans SET active = FALSE, updated_at = $2 WHERE id = $1")
                .bind(leftover_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            retired += 1;
        }

        let counts: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT category_id, COUNT(*) FROM plans
            WHERE active = TRUE AND is_custom = FALSE AND category_id = ANY($1)
            GROUP BY category_id
            "#,
        )
        .bind(category_ids.to_vec())
        .fetch_all(&mut *tx)
        .await?;
        let counts: HashMap<Uuid, i64> = counts.into_iter().collect();
        for category_id in category_ids {
            let found = counts.get(category_id).copied().unwrap_or(0);
            if found != 3 {
                return Err(StoreError::CatalogIncomplete {
                    category_id: *category_id,
                    found: usize::try_from(found).unwrap_or(0),
                });
            }
        }

        tx.commit().await?;
        Ok(CatalogSwap { inserted, retired })
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, subscriber_id, plan_id, amount, currency, billing_cycle, status,
                gateway_order_id, gateway_payment_id, gateway_signature, failure_reason,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(order.subscriber_id)
        .bind(order.plan_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.billing_cycle.as_str())
        .bind(order.status.as_str())
        .bind(&order.gateway_order_id)
        .bind(&order.gateway_payment_id)
        .bind(&order.gateway_signature)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_by_payment_id(&self, gateway_payment_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE gateway_payment_id = $1")
            .bind(gateway_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        update: TerminalUpdate<'_>,
    ) -> StoreResult<Transition> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = $2, failure_reason = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(update.status.as_str())
        .bind(update.failure_reason)
        .bind(update.at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Transition::Applied(row.try_into()?)),
            None => {
                let current = self
                    .order(order_id)
                    .await?
                    .ok_or(StoreError::MissingOrder(order_id))?;
                Ok(Transition::Lost(current))
            }
        }
    }

    async fn settle_order(
        &self,
        order_id: Uuid,
        proof: &PaymentProof,
        at: DateTime<Utc>,
    ) -> StoreResult<Settlement> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'paid', gateway_payment_id = $2, gateway_signature = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(&proof.gateway_payment_id)
        .bind(&proof.gateway_signature)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_conflict)?;

        let Some(row) = row else {
            tx.rollback().await?;
            let current = self
                .order(order_id)
                .await?
                .ok_or(StoreError::MissingOrder(order_id))?;
            return Ok(Settlement::Lost(current));
        };
        let paid = Order::try_from(row)?;

        // `FOR UPDATE` locks nothing for a first purchase, so settlements for
        // one subscriber queue on a transaction-scoped advisory lock. Keys are
        // int4 hashes and cannot meet `CATALOG_LOCK_KEY`.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(paid.subscriber_id.to_string())
            .execute(&mut *tx)
            .await?;

        let prior = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE subscriber_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(paid.subscriber_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Subscription::try_from)
        .transpose()?;

        let change = apply_payment(prior.as_ref(), &paid, at);
        write_subscription_change(&mut tx, &change).await?;
        tx.commit().await?;

        Ok(Settlement::Settled {
            order: paid,
            change,
        })
    }

    async fn append_order_event(&self, event: &OrderEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_events (id, order_id, event_type, payload, occurred_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(event.order_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order_events(&self, order_id: Uuid) -> StoreResult<Vec<OrderEvent>> {
        let rows = sqlx::query_as::<_, OrderEventRow>(
            "SELECT id, order_id, event_type, payload, occurred_at FROM order_events WHERE order_id = $1 ORDER BY occurred_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let event_type = OrderEventType::from_str(&row.event_type).ok_or_else(|| {
                    StoreError::Corrupt(format!("order event type `{}`", row.event_type))
                })?;
                Ok(OrderEvent {
                    id: row.id,
                    order_id: row.order_id,
                    event_type,
                    payload: row.payload,
                    occurred_at: row.occurred_at,
                })
            })
            .collect()
    }

    async fn active_subscription(&self, subscriber_id: Uuid) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE subscriber_id = $1 AND status = 'active'",
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn active_subscriptions_with_plans(&self) -> StoreResult<Vec<(Subscription, Plan)>> {
        let subscriptions = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE status = 'active' ORDER BY end_date ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let plans = sqlx::query_as::<_, PlanRow>(
            "SELECT p.* FROM plans p WHERE p.id IN (SELECT DISTINCT plan_id FROM subscriptions WHERE status = 'active')",
        )
        .fetch_all(&self.pool)
        .await?;
        let plans: HashMap<Uuid, Plan> = plans
            .into_iter()
            .map(|row| Plan::try_from(row).map(|plan| (plan.id, plan)))
            .collect::<StoreResult<_>>()?;

        subscriptions
            .into_iter()
            .map(|row| {
                let subscription = Subscription::try_from(row)?;
                let plan = plans.get(&subscription.plan_id).cloned().ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "subscription {} references unknown plan {}",
                        subscription.id, subscription.plan_id
                    ))
                })?;
                Ok((subscription, plan))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commerce::catalog::synthesize;

    // key: commerce-postgres-tests -> catalog swap atomicity
    #[sqlx::test]
    #[ignore = "requires DATABASE_URL with Postgres server"]
    async fn replace_catalog_supersedes_prior_plans(pool: PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let category = BusinessCategory {
            id: Uuid::new_v4(),
            name: "Restaurants".into(),
            order: 1,
            is_active: true,
        };
        sqlx::query("INSERT INTO business_categories (id, name, sort_order, is_active) VALUES ($1, $2, $3, TRUE)")
            .bind(category.id)
            .bind(&category.name)
            .bind(category.order)
            .execute(&pool)
            .await
            .unwrap();

        let store = PgCommerceStore::new(pool.clone());
        let first = store
            .replace_catalog(&[category.id], synthesize(&category, "ops", "INR", Utc::now()))
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 3);
        assert_eq!(first.retired, 0);

        let second = store
            .replace_catalog(&[category.id], synthesize(&category, "ops", "INR", Utc::now()))
            .await
            .unwrap();
        assert_eq!(second.retired, 3);
        assert!(second.inserted.iter().all(|plan| plan.version == 2));

        let old = store.plan(first.inserted[0].id).await.unwrap().unwrap();
        assert!(!old.active);
        assert_eq!(old.superseded_by, Some(second.inserted[0].id));
        assert_eq!(store.active_plans(Some(category.id)).await.unwrap().len(), 3);
    }
}
