#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use menu_commerce::commerce::store::{
    CatalogSwap, Settlement, StoreResult, TerminalUpdate, Transition,
};
use menu_commerce::commerce::{
    sign_payment, BillingCycle, BusinessCategory, CommerceStore, ExpiryClock, FeatureLimits,
    GatewayError, GatewayOrder, GatewayRetryPolicy, Limit, MemoryCommerceStore, Order,
    OrderEvent, OrderEventType, OrderLifecycleManager, PaymentGateway, PaymentProof, Plan,
    PlanTier, StoreError, Subscription,
};
use tokio::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

pub const KEY_SECRET: &str = "test_key_secret";

/// Gateway double: `create_order` pops scripted failures before succeeding,
/// `verify_signature` checks real HMACs unless marked unavailable.
#[derive(Default)]
pub struct ScriptedGateway {
    create_failures: Mutex<VecDeque<GatewayError>>,
    verify_unavailable: Mutex<bool>,
    mismatch_delay: Mutex<Option<Duration>>,
    pub create_calls: AtomicU32,
    pub verify_calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, failures: impl IntoIterator<Item = GatewayError>) {
        self.create_failures.lock().unwrap().extend(failures);
    }

    pub fn set_verify_unavailable(&self, unavailable: bool) {
        *self.verify_unavailable.lock().unwrap() = unavailable;
    }

    /// Signature mismatches are reported only after `delay`.
    pub fn delay_mismatches(&self, delay: Duration) {
        *self.mismatch_delay.lock().unwrap() = Some(delay);
    }

    pub fn creates(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(&self, _amount: i64, _currency: &str) -> Result<GatewayOrder, GatewayError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{call}"),
        })
    }

    async fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        gateway_signature: &str,
    ) -> Result<bool, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if *self.verify_unavailable.lock().unwrap() {
            return Err(GatewayError::Unavailable("503".into()));
        }
        let valid = sign_payment(KEY_SECRET, gateway_order_id, gateway_payment_id) == gateway_signature;
        if !valid {
            let delay = *self.mismatch_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(valid)
    }
}

pub fn fast_retry(max_attempts: u32) -> GatewayRetryPolicy {
    GatewayRetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_multiplier: 2.0,
        attempt_timeout: Duration::from_millis(200),
    }
}

pub fn category(name: &str, order: i32) -> BusinessCategory {
    BusinessCategory {
        id: Uuid::new_v4(),
        name: name.to_string(),
        order,
        is_active: true,
    }
}

pub fn monthly_plan(price: i64) -> Plan {
    let now = Utc::now();
    Plan {
        id: Uuid::new_v4(),
        category_id: Uuid::new_v4(),
        name: "Cafe Starter".into(),
        tier: PlanTier::Starter,
        price,
        original_price: price * 2,
        currency: "INR".into(),
        billing_cycle: BillingCycle::Monthly,
        is_default: true,
        feature_limits: FeatureLimits {
            items: Limit::Count(50),
            scans: Limit::Count(1000),
        },
        features_list: vec!["Up to 50 menu items".into()],
        is_custom: false,
        active: true,
        version: 1,
        superseded_by: None,
        created_by: "test".into(),
        updated_by: "test".into(),
        created_at: now,
        updated_at: now,
    }
}

pub struct Harness {
    pub store: Arc<MemoryCommerceStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub manager: OrderLifecycleManager,
}

impl Harness {
    pub async fn store_events(&self, order_id: Uuid) -> Vec<OrderEventType> {
        self.store
            .order_events(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }
}

pub fn harness(max_attempts: u32) -> Harness {
    let store = Arc::new(MemoryCommerceStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let manager = OrderLifecycleManager::new(
        store.clone(),
        gateway.clone(),
        fast_retry(max_attempts),
        ExpiryClock::default(),
    );
    Harness {
        store,
        gateway,
        manager,
    }
}

/// Memory store wrapper with switchable faults.
pub struct FaultyStore {
    pub inner: Arc<MemoryCommerceStore>,
    catalog_batch_limit: Mutex<Option<usize>>,
    fail_event_appends: AtomicBool,
    catalog_gate: RwLock<()>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryCommerceStore>) -> Self {
        Self {
            inner,
            catalog_batch_limit: Mutex::new(None),
            fail_event_appends: AtomicBool::new(false),
            catalog_gate: RwLock::new(()),
        }
    }

    /// The next catalog swap only receives the first `plans` of its batch.
    pub fn cut_next_catalog_batch(&self, plans: usize) {
        *self.catalog_batch_limit.lock().unwrap() = Some(plans);
    }

    pub fn fail_event_appends(&self, fail: bool) {
        self.fail_event_appends.store(fail, Ordering::SeqCst);
    }

    /// Parks every catalog swap until the returned guard drops.
    pub async fn park_catalog_swaps(&self) -> RwLockWriteGuard<'_, ()> {
        self.catalog_gate.write().await
    }
}

#[async_trait]
impl CommerceStore for FaultyStore {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<Plan>> {
        self.inner.plan(plan_id).await
    }

    async fn active_plans(&self, category_id: Option<Uuid>) -> StoreResult<Vec<Plan>> {
        self.inner.active_plans(category_id).await
    }

    async fn replace_catalog(
        &self,
        category_ids: &[Uuid],
        mut plans: Vec<Plan>,
    ) -> StoreResult<CatalogSwap> {
        let _open = self.catalog_gate.read().await;
        let limit = self.catalog_batch_limit.lock().unwrap().take();
        if let Some(limit) = limit {
            plans.truncate(limit);
        }
        self.inner.replace_catalog(category_ids, plans).await
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.inner.insert_order(order).await
    }

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        self.inner.order(order_id).await
    }

    async fn order_by_payment_id(&self, gateway_payment_id: &str) -> StoreResult<Option<Order>> {
        self.inner.order_by_payment_id(gateway_payment_id).await
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        update: TerminalUpdate<'_>,
    ) -> StoreResult<Transition> {
        self.inner.transition_order(order_id, update).await
    }

    async fn settle_order(
        &self,
        order_id: Uuid,
        proof: &PaymentProof,
        at: DateTime<Utc>,
    ) -> StoreResult<Settlement> {
        self.inner.settle_order(order_id, proof, at).await
    }

    async fn append_order_event(&self, event: &OrderEvent) -> StoreResult<()> {
        if self.fail_event_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("order_events unavailable".into()));
        }
        self.inner.append_order_event(event).await
    }

    async fn order_events(&self, order_id: Uuid) -> StoreResult<Vec<OrderEvent>> {
        self.inner.order_events(order_id).await
    }

    async fn active_subscription(&self, subscriber_id: Uuid) -> StoreResult<Option<Subscription>> {
        self.inner.active_subscription(subscriber_id).await
    }

    async fn active_subscriptions_with_plans(&self) -> StoreResult<Vec<(Subscription, Plan)>> {
        self.inner.active_subscriptions_with_plans().await
    }
}
