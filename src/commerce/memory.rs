use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    BusinessCategory, Order, OrderEvent, OrderStatus, PaymentProof, Plan, Subscription,
    SubscriptionStatus,
};
use super::store::{
    CatalogSwap, CategoryDirectory, CommerceStore, Settlement, StoreError, StoreResult,
    TerminalUpdate, Transition,
};
use super::subscriptions::{apply_payment, SubscriptionChange};

#[derive(Default)]
struct MemoryState {
    categories: Vec<BusinessCategory>,
    plans: Vec<Plan>,
    orders: HashMap<Uuid, Order>,
    subscriptions: Vec<Subscription>,
    events: Vec<OrderEvent>,
}

/// key: commerce-memory-store -> single-process store for tests and local runs
///
/// Every operation runs under one lock, so each call is atomic. Catalog swaps
/// are staged on a copy and only published after validation.
#[derive(Default)]
pub struct MemoryCommerceStore {
    state: Mutex<MemoryState>,
}

impl MemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(categories: Vec<BusinessCategory>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                categories,
                ..MemoryState::default()
            }),
        }
    }

    pub async fn insert_category(&self, category: BusinessCategory) {
        self.state.lock().await.categories.push(category);
    }

    pub async fn insert_plan(&self, plan: Plan) {
        self.state.lock().await.plans.push(plan);
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    pub async fn plans(&self) -> Vec<Plan> {
        self.state.lock().await.plans.clone()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.clone()
    }
}

fn stage_catalog(
    current: &[Plan],
    category_ids: &[Uuid],
    plans: Vec<Plan>,
) -> StoreResult<(Vec<Plan>, CatalogSwap)> {
    let mut staged = current.to_vec();
    let mut inserted = Vec::with_capacity(plans.len());
    let mut retired = 0;

    for mut plan in plans {
        if let Some(prior) = staged.iter_mut().find(|existing| {
            existing.is_catalog_managed()
                && existing.category_id == plan.category_id
                && existing.tier == plan.tier
        }) {
            plan.version = prior.version + 1;
            prior.active = false;
            prior.superseded_by = Some(plan.id);
            prior.updated_by = plan.updated_by.clone();
            prior.updated_at = plan.updated_at;
            retired += 1;
        }
        inserted.push(plan.clone());
        staged.push(plan);
    }

    let fresh: HashSet<Uuid> = inserted.iter().map(|plan| plan.id).collect();
    for leftover in staged
        .iter_mut()
        .filter(|plan| plan.is_catalog_managed() && !fresh.contains(&plan.id))
    {
        leftover.active = false;
        retired += 1;
    }

    for category_id in category_ids {
        let found = staged
            .iter()
            .filter(|plan| plan.is_catalog_managed() && plan.category_id == *category_id)
            .count();
        if found != 3 {
            return Err(StoreError::CatalogIncomplete {
                category_id: *category_id,
                found,
            });
        }
    }

    Ok((staged, CatalogSwap { inserted, retired }))
}

fn active_for(state: &MemoryState, subscriber_id: Uuid) -> Option<&Subscription> {
    state.subscriptions.iter().find(|subscription| {
        subscription.subscriber_id == subscriber_id
            && subscription.status == SubscriptionStatus::Active
    })
}

fn store_subscription(state: &mut MemoryState, subscription: Subscription) {
    match state
        .subscriptions
        .iter_mut()
        .find(|existing| existing.id == subscription.id)
    {
        Some(existing) => *existing = subscription,
        None => state.subscriptions.push(subscription),
    }
}

#[async_trait]
impl CategoryDirectory for MemoryCommerceStore {
    async fn list_active(&self) -> StoreResult<Vec<BusinessCategory>> {
        let state = self.state.lock().await;
        let mut categories: Vec<BusinessCategory> = state
            .categories
            .iter()
            .filter(|category| category.is_active)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        Ok(categories)
    }
}

#[async_trait]
impl CommerceStore for MemoryCommerceStore {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<Plan>> {
        let state = self.state.lock().await;
        Ok(state.plans.iter().find(|plan| plan.id == plan_id).cloned())
    }

    async fn active_plans(&self, category_id: Option<Uuid>) -> StoreResult<Vec<Plan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<Plan> = state
            .plans
            .iter()
            .filter(|plan| plan.active)
            .filter(|plan| category_id.map_or(true, |id| plan.category_id == id))
            .cloned()
            .collect();
        plans.sort_by(|a, b| {
            a.category_id
                .cmp(&b.category_id)
                .then_with(|| a.price.cmp(&b.price))
        });
        Ok(plans)
    }

    async fn replace_catalog(
        &self,
        category_ids: &[Uuid],
        plans: Vec<Plan>,
    ) -> StoreResult<CatalogSwap> {
        let mut state = self.state.lock().await;
        let (staged, swap) = stage_catalog(&state.plans, category_ids, plans)?;
        state.plans = staged;
        Ok(swap)
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict("orders.id".to_string()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn order_by_payment_id(&self, gateway_payment_id: &str) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.gateway_payment_id.as_deref() == Some(gateway_payment_id))
            .cloned())
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        update: TerminalUpdate<'_>,
    ) -> StoreResult<Transition> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::MissingOrder(order_id))?;
        if order.status != OrderStatus::Pending {
            return Ok(Transition::Lost(order.clone()));
        }
        order.status = update.status;
        order.failure_reason = update.failure_reason.map(str::to_string);
        order.updated_at = update.at;
        Ok(Transition::Applied(order.clone()))
    }

    async fn settle_order(
        &self,
        order_id: Uuid,
        proof: &PaymentProof,
        at: DateTime<Utc>,
    ) -> StoreResult<Settlement> {
        let mut state = self.state.lock().await;
        let current = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::MissingOrder(order_id))?;
        if current.status != OrderStatus::Pending {
            return Ok(Settlement::Lost(current));
        }
        let reused = state.orders.values().any(|order| {
            order.id != order_id
                && order.gateway_payment_id.as_deref() == Some(proof.gateway_payment_id.as_str())
        });
        if reused {
            return Err(StoreError::Conflict("orders.gateway_payment_id".to_string()));
        }

        let mut paid = current;
        paid.status = OrderStatus::Paid;
        paid.gateway_payment_id = Some(proof.gateway_payment_id.clone());
        paid.gateway_signature = Some(proof.gateway_signature.clone());
        paid.updated_at = at;

        let change = apply_payment(active_for(&state, paid.subscriber_id), &paid, at);
        match &change {
            SubscriptionChange::Opened {
                subscription,
                expired_prior,
            } => {
                if let Some(closed) = expired_prior {
                    store_subscription(&mut state, closed.clone());
                }
                store_subscription(&mut state, subscription.clone());
            }
            SubscriptionChange::Extended { subscription } => {
                store_subscription(&mut state, subscription.clone());
            }
        }
        state.orders.insert(order_id, paid.clone());

        Ok(Settlement::Settled {
            order: paid,
            change,
        })
    }

    async fn append_order_event(&self, event: &OrderEvent) -> StoreResult<()> {
        self.state.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn order_events(&self, order_id: Uuid) -> StoreResult<Vec<OrderEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn active_subscription(&self, subscriber_id: Uuid) -> StoreResult<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(active_for(&state, subscriber_id).cloned())
    }

    async fn active_subscriptions_with_plans(&self) -> StoreResult<Vec<(Subscription, Plan)>> {
        let state = self.state.lock().await;
        let mut rows = Vec::new();
        for subscription in state
            .subscriptions
            .iter()
            .filter(|subscription| subscription.status == SubscriptionStatus::Active)
        {
            let plan = state
                .plans
                .iter()
                .find(|plan| plan.id == subscription.plan_id)
                .ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "subscription {} references unknown plan {}",
                        subscription.id, subscription.plan_id
                    ))
                })?;
            rows.push((subscription.clone(), plan.clone()));
        }
        Ok(rows)
    }
}
