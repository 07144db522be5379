use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{CatalogSummary, PlanCatalogGenerator};
use super::expiry::ExpiryClock;
use super::gateway::{GatewayRetryPolicy, PaymentGateway};
use super::identity::IdentityResolver;
use super::models::{BillingCycle, Order, PaymentProof, Plan};
use super::orders::{CallbackOutcome, OrderLifecycleManager, OrderView};
use super::renewals::{RenewalReport, RenewalScanner};
use super::store::{CategoryDirectory, CommerceStore};
use crate::error::CommerceResult;

/// Shared handles injected into every commerce handler.
#[derive(Clone)]
pub struct CommerceState {
    pub store: Arc<dyn CommerceStore>,
    pub directory: Arc<dyn CategoryDirectory>,
    pub identity: Arc<dyn IdentityResolver>,
    pub generator: PlanCatalogGenerator,
    pub orders: OrderLifecycleManager,
    pub renewals: RenewalScanner,
    pub default_window_days: i64,
}

impl CommerceState {
    /// Wires every commerce component over one backing store.
    pub fn assemble<S>(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        retry: GatewayRetryPolicy,
        clock: ExpiryClock,
        currency: &str,
        identity: Arc<dyn IdentityResolver>,
        default_window_days: i64,
    ) -> Self
    where
        S: CommerceStore + CategoryDirectory + 'static,
    {
        let shared: Arc<dyn CommerceStore> = store.clone();
        Self {
            generator: PlanCatalogGenerator::new(shared.clone(), currency),
            orders: OrderLifecycleManager::new(shared.clone(), gateway, retry, clock),
            renewals: RenewalScanner::new(shared.clone()),
            store: shared,
            directory: store,
            identity,
            default_window_days,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanQuery {
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegenerateRequest {
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewalQuery {
    pub window_days: Option<i64>,
}

pub fn routes() -> Router {
    Router::new()
        .route("/api/commerce/plans", get(list_plans))
        .route("/api/commerce/catalog/regenerate", post(regenerate_catalog))
        .route("/api/commerce/orders", post(create_order))
        .route("/api/commerce/orders/:id", get(order_view))
        .route("/api/commerce/orders/:id/callback", post(gateway_callback))
        .route("/api/commerce/orders/:id/cancel", post(cancel_order))
        .route("/api/commerce/renewals", get(renewals))
}

/// Commerce routes with their state attached.
pub fn router(state: CommerceState) -> Router {
    routes().layer(Extension(state))
}

async fn list_plans(
    Extension(state): Extension<CommerceState>,
    Query(params): Query<PlanQuery>,
) -> CommerceResult<Json<Vec<Plan>>> {
    let plans = state.store.active_plans(params.category_id).await?;
    Ok(Json(plans))
}

async fn regenerate_catalog(
    Extension(state): Extension<CommerceState>,
    body: Option<Json<RegenerateRequest>>,
) -> CommerceResult<Json<CatalogSummary>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let summary = state
        .generator
        .regenerate(
            state.directory.as_ref(),
            state.identity.as_ref(),
            request.actor_id.as_deref(),
        )
        .await?;
    Ok(Json(summary))
}

async fn create_order(
    Extension(state): Extension<CommerceState>,
    Json(payload): Json<CreateOrderRequest>,
) -> CommerceResult<(StatusCode, Json<Order>)> {
    let order = state
        .orders
        .create(payload.subscriber_id, payload.plan_id, payload.billing_cycle)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn order_view(
    Extension(state): Extension<CommerceState>,
    Path(id): Path<Uuid>,
) -> CommerceResult<Json<OrderView>> {
    Ok(Json(state.orders.view(id, Utc::now()).await?))
}

async fn gateway_callback(
    Extension(state): Extension<CommerceState>,
    Path(id): Path<Uuid>,
    Json(proof): Json<PaymentProof>,
) -> CommerceResult<Json<CallbackOutcome>> {
    Ok(Json(state.orders.on_gateway_callback(id, proof).await?))
}

async fn cancel_order(
    Extension(state): Extension<CommerceState>,
    Path(id): Path<Uuid>,
) -> CommerceResult<Json<Order>> {
    Ok(Json(state.orders.cancel(id).await?))
}

async fn renewals(
    Extension(state): Extension<CommerceState>,
    Query(params): Query<RenewalQuery>,
) -> CommerceResult<Json<RenewalReport>> {
    let window = params.window_days.unwrap_or(state.default_window_days);
    Ok(Json(state.renewals.scan(window, Utc::now()).await?))
}
