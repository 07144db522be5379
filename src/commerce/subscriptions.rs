use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Order, Subscription, SubscriptionStatus};

/// key: commerce-subscription-change -> entitlement effect of a paid order
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionChange {
    /// A fresh subscription; a lapsed predecessor is closed as expired.
    Opened {
        subscription: Subscription,
        expired_prior: Option<Subscription>,
    },
    /// The live subscription is pushed out by one billing cycle.
    Extended { subscription: Subscription },
}

impl SubscriptionChange {
    pub fn subscription(&self) -> &Subscription {
        match self {
            SubscriptionChange::Opened { subscription, .. }
            | SubscriptionChange::Extended { subscription } => subscription,
        }
    }

    pub fn into_subscription(self) -> Subscription {
        match self {
            SubscriptionChange::Opened { subscription, .. }
            | SubscriptionChange::Extended { subscription } => subscription,
        }
    }
}

/// Decides how a paid order affects the subscriber's single active subscription.
pub fn apply_payment(
    prior: Option<&Subscription>,
    order: &Order,
    at: DateTime<Utc>,
) -> SubscriptionChange {
    match prior {
        Some(current)
            if current.status == SubscriptionStatus::Active && !current.is_lapsed(at) =>
        {
            let mut subscription = current.clone();
            subscription.plan_id = order.plan_id;
            subscription.end_date = order.billing_cycle.advance(current.end_date);
            subscription.source_order_id = order.id;
            subscription.updated_at = at;
            SubscriptionChange::Extended { subscription }
        }
        _ => {
            let expired_prior = prior
                .filter(|current| current.status == SubscriptionStatus::Active)
                .map(|current| {
                    let mut closed = current.clone();
                    closed.status = SubscriptionStatus::Expired;
                    closed.updated_at = at;
                    closed
                });
            SubscriptionChange::Opened {
                subscription: Subscription {
                    id: Uuid::new_v4(),
                    subscriber_id: order.subscriber_id,
                    plan_id: order.plan_id,
                    source_order_id: order.id,
                    start_date: at,
                    end_date: order.billing_cycle.advance(at),
                    status: SubscriptionStatus::Active,
                    created_at: at,
                    updated_at: at,
                },
                expired_prior,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commerce::models::{BillingCycle, OrderStatus};
    use chrono::{Duration, TimeZone};

    fn paid_order(subscriber_id: Uuid, at: DateTime<Utc>) -> Order {
        Order {
            id: Uuid::new_v4(),
            subscriber_id,
            plan_id: Uuid::new_v4(),
            amount: 1297,
            currency: "INR".into(),
            billing_cycle: BillingCycle::Monthly,
            status: OrderStatus::Paid,
            gateway_order_id: "order_gw".into(),
            gateway_payment_id: Some("pay_1".into()),
            gateway_signature: Some("sig".into()),
            failure_reason: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn active(subscriber_id: Uuid, start: DateTime<Utc>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            subscriber_id,
            plan_id: Uuid::new_v4(),
            source_order_id: Uuid::new_v4(),
            start_date: start,
            end_date: BillingCycle::Monthly.advance(start),
            status: SubscriptionStatus::Active,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn first_payment_opens_one_cycle() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let order = paid_order(Uuid::new_v4(), at);
        let change = apply_payment(None, &order, at);
        let SubscriptionChange::Opened {
            subscription,
            expired_prior,
        } = change
        else {
            panic!("expected a new subscription");
        };
        assert!(expired_prior.is_none());
        assert_eq!(subscription.start_date, at);
        assert_eq!(
            subscription.end_date,
            Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap()
        );
        assert_eq!(subscription.source_order_id, order.id);
    }

    #[test]
    fn live_subscription_is_extended_in_place() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let subscriber = Uuid::new_v4();
        let current = active(subscriber, start);
        let at = start + Duration::days(20);
        let order = paid_order(subscriber, at);

        let change = apply_payment(Some(&current), &order, at);
        let SubscriptionChange::Extended { subscription } = change else {
            panic!("expected an extension");
        };
        assert_eq!(subscription.id, current.id);
        assert_eq!(subscription.start_date, start);
        assert_eq!(
            subscription.end_date,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(subscription.plan_id, order.plan_id);
    }

    #[test]
    fn lapsed_subscription_is_expired_and_replaced() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let subscriber = Uuid::new_v4();
        let current = active(subscriber, start);
        let at = start + Duration::days(45);
        let order = paid_order(subscriber, at);

        let change = apply_payment(Some(&current), &order, at);
        let SubscriptionChange::Opened {
            subscription,
            expired_prior: Some(closed),
        } = change
        else {
            panic!("expected lapsed subscription to be replaced");
        };
        assert_eq!(closed.id, current.id);
        assert_eq!(closed.status, SubscriptionStatus::Expired);
        assert_ne!(subscription.id, current.id);
        assert_eq!(subscription.start_date, at);
    }
}
