use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::models::{RenewalEntry, UrgencyBucket};
use super::store::CommerceStore;
use crate::error::{CommerceError, CommerceResult};

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenewalReport {
    pub entries: Vec<RenewalEntry>,
    pub total_forecast_revenue: i64,
}

/// Whole days until `end_date`, rounded up so a partial day counts as one.
pub fn days_remaining(end_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (end_date - now).num_milliseconds() as f64;
    (millis / MS_PER_DAY).ceil() as i64
}

/// key: commerce-renewal-scanner -> subscriptions due within a window
#[derive(Clone)]
pub struct RenewalScanner {
    store: Arc<dyn CommerceStore>,
}

impl RenewalScanner {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    pub async fn scan(&self, window_days: i64, now: DateTime<Utc>) -> CommerceResult<RenewalReport> {
        if window_days < 0 {
            return Err(CommerceError::Validation {
                field: "window_days",
                message: "must not be negative".to_string(),
            });
        }

        let mut entries: Vec<RenewalEntry> = self
            .store
            .active_subscriptions_with_plans()
            .await?
            .into_iter()
            .filter_map(|(subscription, plan)| {
                let days = days_remaining(subscription.end_date, now);
                (0..=window_days).contains(&days).then(|| RenewalEntry {
                    subscription_id: subscription.id,
                    subscriber_id: subscription.subscriber_id,
                    plan_id: plan.id,
                    end_date: subscription.end_date,
                    days_remaining: days,
                    urgency_bucket: UrgencyBucket::for_days(days),
                    plan_price: plan.price,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.days_remaining
                .cmp(&b.days_remaining)
                .then_with(|| a.end_date.cmp(&b.end_date))
                .then_with(|| a.subscription_id.cmp(&b.subscription_id))
        });

        let total_forecast_revenue = entries.iter().map(|entry| entry.plan_price).sum();
        debug!(window_days, due = entries.len(), total_forecast_revenue, "renewal scan");
        Ok(RenewalReport {
            entries,
            total_forecast_revenue,
        })
    }
}
