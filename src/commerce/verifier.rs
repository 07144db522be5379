use std::sync::Arc;

use serde::Serialize;

use super::gateway::{GatewayError, GatewayRetryPolicy, PaymentGateway};
use super::models::{Order, PaymentProof};
use super::store::CommerceStore;

/// Why a callback's payment proof was refused.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingPaymentId,
    MissingSignature,
    MissingGatewayOrder,
    PaymentProofReused,
    SignatureMismatch,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingPaymentId => "missing_payment_id",
            RejectionReason::MissingSignature => "missing_signature",
            RejectionReason::MissingGatewayOrder => "missing_gateway_order",
            RejectionReason::PaymentProofReused => "payment_proof_reused",
            RejectionReason::SignatureMismatch => "signature_mismatch",
        }
    }
}

#[derive(Debug)]
pub enum VerificationFailure {
    Rejected(RejectionReason),
    /// The check could not be completed; the order must stay pending.
    GatewayUnavailable(GatewayError),
    Store(super::store::StoreError),
}

/// key: commerce-payment-verifier -> callback proof validation
#[derive(Clone)]
pub struct PaymentVerifier {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn CommerceStore>,
    retry: GatewayRetryPolicy,
}

impl PaymentVerifier {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn CommerceStore>,
        retry: GatewayRetryPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            retry,
        }
    }

    /// Normalizes and validates `proof` against `order`.
    pub async fn verify(
        &self,
        order: &Order,
        proof: &PaymentProof,
    ) -> Result<PaymentProof, VerificationFailure> {
        let payment_id = proof.gateway_payment_id.trim();
        let signature = proof.gateway_signature.trim();
        if payment_id.is_empty() {
            return Err(VerificationFailure::Rejected(
                RejectionReason::MissingPaymentId,
            ));
        }
        if signature.is_empty() {
            return Err(VerificationFailure::Rejected(
                RejectionReason::MissingSignature,
            ));
        }
        if order.gateway_order_id.trim().is_empty() {
            return Err(VerificationFailure::Rejected(
                RejectionReason::MissingGatewayOrder,
            ));
        }

        let consumed = self
            .store
            .order_by_payment_id(payment_id)
            .await
            .map_err(VerificationFailure::Store)?;
        if consumed.is_some_and(|other| other.id != order.id) {
            return Err(VerificationFailure::Rejected(
                RejectionReason::PaymentProofReused,
            ));
        }

        let valid = self
            .retry
            .run("verify_signature", || {
                self.gateway
                    .verify_signature(&order.gateway_order_id, payment_id, signature)
            })
            .await
            .map_err(VerificationFailure::GatewayUnavailable)?;
        if !valid {
            return Err(VerificationFailure::Rejected(
                RejectionReason::SignatureMismatch,
            ));
        }

        Ok(PaymentProof {
            gateway_payment_id: payment_id.to_string(),
            gateway_signature: signature.to_string(),
        })
    }
}
