use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::expiry::{ExpiryClock, OrderAction};
use super::gateway::{GatewayRetryPolicy, PaymentGateway};
use super::models::{
    BillingCycle, Order, OrderEvent, OrderEventType, OrderStatus, PaymentProof, Plan, Subscription,
};
use super::store::{CommerceStore, Settlement, StoreError, TerminalUpdate, Transition};
use super::verifier::{PaymentVerifier, RejectionReason, VerificationFailure};
use crate::error::{CommerceError, CommerceResult};

/// Result of a gateway callback. `replayed` is set when the order was already
/// terminal and nothing changed.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackOutcome {
    pub order: Order,
    pub subscription: Option<Subscription>,
    pub replayed: bool,
}

/// key: commerce-order-view -> order plus countdown and offered actions
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub remaining_ms: i64,
    pub expired: bool,
    pub actions: Vec<OrderAction>,
}

/// key: commerce-order-lifecycle -> pending, paid, failed, cancelled
#[derive(Clone)]
pub struct OrderLifecycleManager {
    store: Arc<dyn CommerceStore>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: PaymentVerifier,
    retry: GatewayRetryPolicy,
    clock: ExpiryClock,
}

impl OrderLifecycleManager {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateway: Arc<dyn PaymentGateway>,
        retry: GatewayRetryPolicy,
        clock: ExpiryClock,
    ) -> Self {
        let verifier = PaymentVerifier::new(gateway.clone(), store.clone(), retry.clone());
        Self {
            store,
            gateway,
            verifier,
            retry,
            clock,
        }
    }

    pub fn clock(&self) -> &ExpiryClock {
        &self.clock
    }

    async fn purchasable_plan(
        &self,
        plan_id: Uuid,
        billing_cycle: BillingCycle,
    ) -> CommerceResult<Plan> {
        let plan = self
            .store
            .plan(plan_id)
            .await?
            .ok_or(CommerceError::PlanNotFound(plan_id))?;
        if !plan.active {
            return Err(CommerceError::PlanSuperseded {
                plan_id,
                superseded_by: plan.superseded_by,
            });
        }
        if plan.is_custom {
            return Err(CommerceError::CustomPlanRestricted(plan_id));
        }
        if plan.billing_cycle != billing_cycle {
            return Err(CommerceError::BillingCycleMismatch {
                plan: plan.billing_cycle,
                requested: billing_cycle,
            });
        }
        Ok(plan)
    }

    /// Opens a pending order against the gateway. Nothing is persisted when
    /// the gateway cannot be reached.
    pub async fn create(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        billing_cycle: BillingCycle,
    ) -> CommerceResult<Order> {
        let plan = self.purchasable_plan(plan_id, billing_cycle).await?;

        let gateway_order = self
            .retry
            .run("create_order", || {
                self.gateway.create_order(plan.price, &plan.currency)
            })
            .await
            .map_err(CommerceError::GatewayUnavailable)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            subscriber_id,
            plan_id: plan.id,
            amount: plan.price,
            currency: plan.currency.clone(),
            billing_cycle,
            status: OrderStatus::Pending,
            gateway_order_id: gateway_order.gateway_order_id,
            gateway_payment_id: None,
            gateway_signature: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_order(&order).await?;
        self.record(
            order.id,
            OrderEventType::Created,
            json!({
                "plan_id": plan.id,
                "amount": order.amount,
                "gateway_order_id": order.gateway_order_id,
            }),
        )
        .await?;

        info!(order_id = %order.id, %subscriber_id, plan_id = %plan.id, amount = order.amount, "order created");
        Ok(order)
    }

    pub async fn on_gateway_callback(
        &self,
        order_id: Uuid,
        proof: PaymentProof,
    ) -> CommerceResult<CallbackOutcome> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(CommerceError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return self.replay(order).await;
        }

        let verified = match self.verifier.verify(&order, &proof).await {
            Ok(verified) => verified,
            Err(VerificationFailure::Rejected(reason)) => {
                return self.reject(&order, &proof, reason).await;
            }
            Err(VerificationFailure::GatewayUnavailable(err)) => {
                warn!(%order_id, error = %err, "signature check unavailable; order left pending");
                return Err(CommerceError::GatewayUnavailable(err));
            }
            Err(VerificationFailure::Store(err)) => return Err(err.into()),
        };

        let settlement = match self.store.settle_order(order_id, &verified, Utc::now()).await {
            Ok(settlement) => settlement,
            // A concurrent callback for another order claimed this payment id first.
            Err(StoreError::Conflict(constraint)) if constraint.contains("gateway_payment_id") => {
                return self
                    .reject(&order, &proof, RejectionReason::PaymentProofReused)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        match settlement {
            Settlement::Settled { order, change } => {
                let subscription = change.into_subscription();
                self.record(
                    order.id,
                    OrderEventType::Paid,
                    json!({
                        "gateway_payment_id": verified.gateway_payment_id,
                        "subscription_id": subscription.id,
                        "end_date": subscription.end_date,
                    }),
                )
                .await?;
                info!(%order_id, subscription_id = %subscription.id, "order paid");
                Ok(CallbackOutcome {
                    order,
                    subscription: Some(subscription),
                    replayed: false,
                })
            }
            Settlement::Lost(winner) => self.replay(winner).await,
        }
    }

    /// Reports an already-terminal order. The replay audit entry is best
    /// effort.
    async fn replay(&self, order: Order) -> CommerceResult<CallbackOutcome> {
        let audit = self
            .record(
                order.id,
                OrderEventType::CallbackReplayed,
                json!({ "status": order.status.as_str() }),
            )
            .await;
        if let Err(err) = audit {
            warn!(order_id = %order.id, error = %err, "could not record callback replay");
        }
        let subscription = match order.status {
            OrderStatus::Paid => self.store.active_subscription(order.subscriber_id).await?,
            _ => None,
        };
        info!(order_id = %order.id, status = order.status.as_str(), "callback replayed");
        Ok(CallbackOutcome {
            order,
            subscription,
            replayed: true,
        })
    }

    /// Fails the order and audits the rejected proof. When another callback
    /// settled the order first, the winner is reported instead.
    async fn reject(
        &self,
        order: &Order,
        proof: &PaymentProof,
        reason: RejectionReason,
    ) -> CommerceResult<CallbackOutcome> {
        let update = TerminalUpdate {
            status: OrderStatus::Failed,
            failure_reason: Some(reason.as_str()),
            at: Utc::now(),
        };
        match self.store.transition_order(order.id, update).await? {
            Transition::Applied(failed) => {
                warn!(order_id = %failed.id, reason = reason.as_str(), "payment proof rejected");
                self.record(
                    failed.id,
                    OrderEventType::PaymentRejected,
                    json!({
                        "reason": reason.as_str(),
                        "gateway_payment_id": proof.gateway_payment_id,
                    }),
                )
                .await?;
                Err(CommerceError::PaymentRejected {
                    order_id: failed.id,
                    reason: reason.as_str().to_string(),
                })
            }
            Transition::Lost(winner) => {
                warn!(
                    order_id = %winner.id,
                    reason = reason.as_str(),
                    status = winner.status.as_str(),
                    "rejected proof arrived after the order settled"
                );
                self.replay(winner).await
            }
        }
    }

    pub async fn cancel(&self, order_id: Uuid) -> CommerceResult<Order> {
        let update = TerminalUpdate {
            status: OrderStatus::Cancelled,
            failure_reason: None,
            at: Utc::now(),
        };
        let transition = self
            .store
            .transition_order(order_id, update)
            .await
            .map_err(|err| match err {
                StoreError::MissingOrder(id) => CommerceError::OrderNotFound(id),
                other => other.into(),
            })?;
        match transition {
            Transition::Applied(order) => {
                self.record(order.id, OrderEventType::Cancelled, json!({}))
                    .await?;
                info!(%order_id, "order cancelled");
                Ok(order)
            }
            Transition::Lost(current) => Err(CommerceError::AlreadyTerminal {
                order_id,
                status: current.status,
            }),
        }
    }

    pub async fn view(&self, order_id: Uuid, now: DateTime<Utc>) -> CommerceResult<OrderView> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(CommerceError::OrderNotFound(order_id))?;
        Ok(OrderView {
            remaining_ms: self.clock.remaining_ms(&order, now),
            expired: self.clock.is_expired(&order, now),
            actions: self.clock.actions(&order, now),
            order,
        })
    }

    async fn record(
        &self,
        order_id: Uuid,
        event_type: OrderEventType,
        payload: serde_json::Value,
    ) -> CommerceResult<()> {
        self.store
            .append_order_event(&OrderEvent::new(order_id, event_type, payload))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commerce::gateway::{GatewayError, GatewayOrder};
    use crate::commerce::memory::MemoryCommerceStore;
    use crate::commerce::models::{FeatureLimits, Limit, PlanTier};
    use async_trait::async_trait;
    use std::time::Duration;

    struct AcceptingGateway;

    #[async_trait]
    impl PaymentGateway for AcceptingGateway {
        async fn create_order(&self, _: i64, _: &str) -> Result<GatewayOrder, GatewayError> {
            Ok(GatewayOrder {
                gateway_order_id: "order_test".into(),
            })
        }

        async fn verify_signature(&self, _: &str, _: &str, _: &str) -> Result<bool, GatewayError> {
            Ok(true)
        }
    }

    fn plan(active: bool, is_custom: bool) -> Plan {
        let now = Utc::now();
        Plan {
            id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            name: "Cafe Starter".into(),
            tier: PlanTier::Starter,
            price: 499,
            original_price: 999,
            currency: "INR".into(),
            billing_cycle: BillingCycle::Monthly,
            is_default: true,
            feature_limits: FeatureLimits {
                items: Limit::Count(50),
                scans: Limit::Count(1000),
            },
            features_list: vec![],
            is_custom,
            active,
            version: 1,
            superseded_by: if active { None } else { Some(Uuid::new_v4()) },
            created_by: "test".into(),
            updated_by: "test".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn manager(store: Arc<MemoryCommerceStore>) -> OrderLifecycleManager {
        let retry = GatewayRetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            attempt_timeout: Duration::from_millis(100),
        };
        OrderLifecycleManager::new(store, Arc::new(AcceptingGateway), retry, ExpiryClock::default())
    }

    #[tokio::test]
    async fn create_rejects_plans_that_are_not_purchasable() {
        let store = Arc::new(MemoryCommerceStore::new());
        let superseded = plan(false, false);
        let custom = plan(true, true);
        let monthly = plan(true, false);
        store.insert_plan(superseded.clone()).await;
        store.insert_plan(custom.clone()).await;
        store.insert_plan(monthly.clone()).await;
        let manager = manager(store);
        let subscriber = Uuid::new_v4();

        let err = manager
            .create(subscriber, superseded.id, BillingCycle::Monthly)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::PlanSuperseded { superseded_by: Some(next), .. } if Some(next) == superseded.superseded_by
        ));

        let err = manager
            .create(subscriber, custom.id, BillingCycle::Monthly)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::CustomPlanRestricted(_)));

        let err = manager
            .create(subscriber, monthly.id, BillingCycle::Yearly)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::BillingCycleMismatch { .. }));

        let err = manager
            .create(subscriber, Uuid::new_v4(), BillingCycle::Monthly)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::PlanNotFound(_)));
    }

    #[tokio::test]
    async fn view_reports_countdown_for_fresh_order() {
        let store = Arc::new(MemoryCommerceStore::new());
        let monthly = plan(true, false);
        store.insert_plan(monthly.clone()).await;
        let manager = manager(store);

        let order = manager
            .create(Uuid::new_v4(), monthly.id, BillingCycle::Monthly)
            .await
            .unwrap();
        let view = manager
            .view(order.id, order.created_at + chrono::Duration::minutes(14))
            .await
            .unwrap();
        assert_eq!(view.remaining_ms, 60_000);
        assert!(!view.expired);
        assert_eq!(view.actions, vec![OrderAction::PayNow]);
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_not_found() {
        let manager = manager(Arc::new(MemoryCommerceStore::new()));
        let err = manager.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CommerceError::OrderNotFound(_)));
    }
}
