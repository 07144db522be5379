use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
}

/// key: commerce-gateway -> external payment provider seam
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: i64, currency: &str) -> Result<GatewayOrder, GatewayError>;

    async fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        gateway_signature: &str,
    ) -> Result<bool, GatewayError>;
}

/// Bounded exponential backoff with a per-attempt timeout.
#[derive(Debug, Clone)]
pub struct GatewayRetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub attempt_timeout: Duration,
}

impl Default for GatewayRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl GatewayRetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay_ms.max(0.0) as u64).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.attempt_timeout)),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(%label, attempt, ?delay, error = %err, "retrying gateway call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%label, attempts = attempt + 1, error = %err, "gateway call failed");
                    return Err(err);
                }
            }
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `"{order_id}|{payment_id}"`, the callback proof format.
pub fn sign_payment(key_secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key_secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// key: commerce-gateway-razorpay -> HTTP orders API + local signature check
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, amount: i64, currency: &str) -> Result<GatewayOrder, GatewayError> {
        // The orders API takes minor units.
        let payload = json!({
            "amount": amount * 100,
            "currency": currency,
            "payment_capture": 1,
        });
        let response = self
            .client
            .post(self.endpoint("v1/orders"))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GatewayError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("status {status}")));
        }

        let parsed: GatewayOrderResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        Ok(GatewayOrder {
            gateway_order_id: parsed.id,
        })
    }

    async fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        gateway_signature: &str,
    ) -> Result<bool, GatewayError> {
        let Ok(provided) = hex::decode(gateway_signature.trim()) else {
            return Ok(false);
        };
        let mut mac = HmacSha256::new_from_slice(self.key_secret.as_bytes())
            .expect("HMAC can use any key length");
        mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
        Ok(mac.verify_slice(&provided).is_ok())
    }
}
