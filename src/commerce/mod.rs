pub mod api;
pub mod catalog;
pub mod expiry;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod models;
pub mod orders;
pub mod postgres;
pub mod renewals;
pub mod store;
pub mod subscriptions;
pub mod verifier;

pub use api::{router as commerce_router, routes as commerce_routes, CommerceState, CreateOrderRequest};
pub use catalog::{classify, CatalogSummary, CategoryProfile, PlanCatalogGenerator};
pub use expiry::{ExpiryClock, OrderAction};
pub use gateway::{
    sign_payment, GatewayError, GatewayOrder, GatewayRetryPolicy, PaymentGateway, RazorpayGateway,
};
pub use identity::{IdentityResolver, SystemIdentity};
pub use memory::MemoryCommerceStore;
pub use models::{
    BillingCycle, BusinessCategory, FeatureLimits, Limit, Order, OrderEvent, OrderEventType,
    OrderStatus, PaymentProof, Plan, PlanTier, RenewalEntry, Subscription, SubscriptionStatus,
    UrgencyBucket,
};
pub use orders::{CallbackOutcome, OrderLifecycleManager, OrderView};
pub use postgres::PgCommerceStore;
pub use renewals::{RenewalReport, RenewalScanner};
pub use store::{CategoryDirectory, CommerceStore, StoreError};
pub use verifier::{PaymentVerifier, RejectionReason};
