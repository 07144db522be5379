use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::commerce::gateway::GatewayError;
use crate::commerce::models::{BillingCycle, OrderStatus};
use crate::commerce::store::StoreError;

/// What a caller can do about a failure. Shown to users instead of internals.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    TryAgain,
    ContactSupport,
    FixInput,
}

#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("no active business categories to generate plans for")]
    NoCategories,
    #[error("plan {0} not found")]
    PlanNotFound(Uuid),
    #[error("plan {plan_id} was superseded by {superseded_by:?}")]
    PlanSuperseded {
        plan_id: Uuid,
        superseded_by: Option<Uuid>,
    },
    #[error("plan {0} is a custom plan and cannot be purchased directly")]
    CustomPlanRestricted(Uuid),
    #[error("plan bills {plan:?} but {requested:?} was requested")]
    BillingCycleMismatch {
        plan: BillingCycle,
        requested: BillingCycle,
    },
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("order {order_id} is already {}", .status.as_str())]
    AlreadyTerminal { order_id: Uuid, status: OrderStatus },
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(#[source] GatewayError),
    #[error("payment for order {order_id} rejected: {reason}")]
    PaymentRejected { order_id: Uuid, reason: String },
    #[error("catalog regeneration already in progress")]
    CatalogBusy,
    #[error("catalog regeneration left category {category_id} with {found} plans")]
    CatalogIncomplete { category_id: Uuid, found: usize },
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

impl From<StoreError> for CommerceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CatalogBusy => CommerceError::CatalogBusy,
            StoreError::CatalogIncomplete { category_id, found } => {
                CommerceError::CatalogIncomplete { category_id, found }
            }
            other => CommerceError::Persistence(other),
        }
    }
}

impl CommerceError {
    pub fn user_action(&self) -> UserAction {
        match self {
            CommerceError::Validation { .. }
            | CommerceError::PlanNotFound(_)
            | CommerceError::PlanSuperseded { .. }
            | CommerceError::CustomPlanRestricted(_)
            | CommerceError::BillingCycleMismatch { .. }
            | CommerceError::OrderNotFound(_)
            | CommerceError::NoCategories => UserAction::FixInput,
            CommerceError::AlreadyTerminal { .. }
            | CommerceError::CatalogBusy
            | CommerceError::PaymentRejected { .. }
            | CommerceError::GatewayUnavailable(_) => UserAction::TryAgain,
            CommerceError::CatalogIncomplete { .. }
            | CommerceError::Persistence(_) => UserAction::ContactSupport,
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            CommerceError::Validation { field, .. } => Some(*field),
            CommerceError::PlanNotFound(_)
            | CommerceError::PlanSuperseded { .. }
            | CommerceError::CustomPlanRestricted(_) => Some("plan_id"),
            CommerceError::BillingCycleMismatch { .. } => Some("billing_cycle"),
            CommerceError::OrderNotFound(_) => Some("order_id"),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CommerceError::Validation { .. }
            | CommerceError::CustomPlanRestricted(_)
            | CommerceError::BillingCycleMismatch { .. }
            | CommerceError::NoCategories => StatusCode::UNPROCESSABLE_ENTITY,
            CommerceError::PlanNotFound(_) | CommerceError::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CommerceError::PlanSuperseded { .. }
            | CommerceError::AlreadyTerminal { .. }
            | CommerceError::CatalogBusy => StatusCode::CONFLICT,
            CommerceError::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            CommerceError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            CommerceError::CatalogIncomplete { .. } | CommerceError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show outside the service.
    pub fn public_message(&self) -> String {
        match self {
            CommerceError::Persistence(_) | CommerceError::CatalogIncomplete { .. } => {
                "internal error, please contact support".to_string()
            }
            CommerceError::GatewayUnavailable(_) => {
                "payment gateway unavailable, please retry later".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    action: UserAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "commerce request failed");
        } else {
            tracing::debug!(error = %self, "commerce request rejected");
        }
        let body = ErrorBody {
            error: self.public_message(),
            action: self.user_action(),
            field: self.field(),
        };
        (status, Json(body)).into_response()
    }
}

pub type CommerceResult<T> = Result<T, CommerceError>;
