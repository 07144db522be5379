use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// key: commerce-category-model -> externally owned directory entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessCategory {
    pub id: Uuid,
    pub name: String,
    pub order: i32,
    pub is_active: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Professional,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [
        PlanTier::Starter,
        PlanTier::Professional,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Starter => "starter",
            PlanTier::Professional => "professional",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "starter" => Some(Self::Starter),
            "professional" => Some(Self::Professional),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanTier::Starter => "Starter",
            PlanTier::Professional => "Professional",
            PlanTier::Enterprise => "Enterprise",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "yearly" | "annual" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::Yearly => 12,
        }
    }

    /// Calendar-aware period end; saturates at `start` on overflow.
    pub fn advance(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .unwrap_or(start)
    }
}

/// A numeric ceiling or the literal `"unlimited"` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    Count(u32),
    Unlimited,
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Count(value) => serializer.serialize_u32(*value),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(value) => Ok(Limit::Count(value)),
            Raw::Text(text) if text == "unlimited" => Ok(Limit::Unlimited),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "unknown limit value `{text}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureLimits {
    pub items: Limit,
    pub scans: Limit,
}

/// key: commerce-plan-model -> soft-versioned catalog row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub tier: PlanTier,
    pub price: i64,
    pub original_price: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub is_default: bool,
    pub feature_limits: FeatureLimits,
    pub features_list: Vec<String>,
    pub is_custom: bool,
    pub active: bool,
    pub version: i32,
    pub superseded_by: Option<Uuid>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Only active, non-custom plans participate in regeneration.
    pub fn is_catalog_managed(&self) -> bool {
        self.active && !self.is_custom
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Transitions only ever leave `pending`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::Pending) && next.is_terminal()
    }
}

/// key: commerce-order-model -> checkout attempt, retained for audit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: OrderStatus,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Proof submitted by the gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentProof {
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// key: commerce-subscription-model -> entitlement materialized by a paid order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub source_order_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyBucket {
    Expired,
    Urgent,
    DueSoon,
    Fortnight,
    Upcoming,
}

impl UrgencyBucket {
    pub fn for_days(days_remaining: i64) -> Self {
        match days_remaining {
            d if d <= 0 => UrgencyBucket::Expired,
            d if d <= 3 => UrgencyBucket::Urgent,
            d if d <= 7 => UrgencyBucket::DueSoon,
            d if d <= 14 => UrgencyBucket::Fortnight,
            _ => UrgencyBucket::Upcoming,
        }
    }
}

/// Derived on demand by the renewal scanner; never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenewalEntry {
    pub subscription_id: Uuid,
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub end_date: DateTime<Utc>,
    pub days_remaining: i64,
    pub urgency_bucket: UrgencyBucket,
    pub plan_price: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
    Created,
    Paid,
    PaymentRejected,
    Cancelled,
    CallbackReplayed,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::Created => "created",
            OrderEventType::Paid => "paid",
            OrderEventType::PaymentRejected => "payment_rejected",
            OrderEventType::Cancelled => "cancelled",
            OrderEventType::CallbackReplayed => "callback_replayed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "paid" => Some(Self::Paid),
            "payment_rejected" => Some(Self::PaymentRejected),
            "cancelled" => Some(Self::Cancelled),
            "callback_replayed" => Some(Self::CallbackReplayed),
            _ => None,
        }
    }
}

/// key: commerce-order-audit-event
/// Appended for every order transition and every rejected payment proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: OrderEventType,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(order_id: Uuid, event_type: OrderEventType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            event_type,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn limit_serializes_count_or_unlimited() {
        let limits = FeatureLimits {
            items: Limit::Count(50),
            scans: Limit::Unlimited,
        };
        let value = serde_json::to_value(limits).unwrap();
        assert_eq!(value, json!({"items": 50, "scans": "unlimited"}));

        let parsed: FeatureLimits = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, limits);
        assert!(serde_json::from_value::<Limit>(json!("plenty")).is_err());
    }

    #[test]
    fn only_pending_orders_transition() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn billing_cycle_advances_by_calendar_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap();
        assert_eq!(
            BillingCycle::Monthly.advance(start),
            Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap()
        );
        assert_eq!(
            BillingCycle::Yearly.advance(start),
            Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn urgency_buckets_follow_thresholds() {
        assert_eq!(UrgencyBucket::for_days(0), UrgencyBucket::Expired);
        assert_eq!(UrgencyBucket::for_days(3), UrgencyBucket::Urgent);
        assert_eq!(UrgencyBucket::for_days(4), UrgencyBucket::DueSoon);
        assert_eq!(UrgencyBucket::for_days(7), UrgencyBucket::DueSoon);
        assert_eq!(UrgencyBucket::for_days(14), UrgencyBucket::Fortnight);
        assert_eq!(UrgencyBucket::for_days(15), UrgencyBucket::Upcoming);
    }
}
