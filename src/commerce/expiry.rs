use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::models::{Order, OrderStatus};

/// Payment actions a client may offer for an order.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    PayNow,
    /// Start a fresh order; the current one is left untouched.
    TryAgain,
}

/// key: commerce-expiry-clock -> pending order validity window
///
/// Owns no state beyond the configured window. An expired pending order is
/// never transitioned here; it simply stops offering `PayNow`.
#[derive(Clone, Copy, Debug)]
pub struct ExpiryClock {
    valid_for: Duration,
}

impl ExpiryClock {
    pub fn new(valid_for: Duration) -> Self {
        Self { valid_for }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }

    pub fn valid_for(&self) -> Duration {
        self.valid_for
    }

    pub fn remaining_ms(&self, order: &Order, now: DateTime<Utc>) -> i64 {
        let deadline = order.created_at + self.valid_for;
        (deadline - now).num_milliseconds().max(0)
    }

    pub fn is_expired(&self, order: &Order, now: DateTime<Utc>) -> bool {
        self.remaining_ms(order, now) == 0
    }

    pub fn actions(&self, order: &Order, now: DateTime<Utc>) -> Vec<OrderAction> {
        match order.status {
            OrderStatus::Pending if self.is_expired(order, now) => vec![OrderAction::TryAgain],
            OrderStatus::Pending => vec![OrderAction::PayNow],
            OrderStatus::Failed => vec![OrderAction::TryAgain],
            OrderStatus::Paid | OrderStatus::Cancelled => Vec::new(),
        }
    }
}

impl Default for ExpiryClock {
    fn default() -> Self {
        Self::new(Duration::minutes(15))
    }
}
