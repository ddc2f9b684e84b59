//! Payment gateway seam.
//!
//! The engine only needs three things from a provider: open a checkout
//! session, refund a session, and tell us (via webhook) when a session was
//! paid or a refund was requested on the provider side.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub success_ref: String,
    pub cancel_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub session_id: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: SessionRequest) -> Result<PaymentSession, GatewayError>;

    async fn refund(&self, session_id: &str) -> Result<(), GatewayError>;
}

/// Amount in the currency's minor unit, the way card processors expect it.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

// ── Webhook events ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentSucceeded { session_id: String },
    RefundRequested { session_id: String },
    /// Anything else the provider sends. Acknowledged and dropped.
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: EnvelopeObject,
}

#[derive(Debug, Deserialize)]
struct EnvelopeObject {
    id: String,
}

pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_REFUND_REQUESTED: &str = "charge.refund.requested";

impl GatewayEvent {
    /// Parse a provider webhook body. Signature checks happen before this, outside the engine.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let env: Envelope = serde_json::from_slice(payload)?;
        Ok(match env.event_type.as_str() {
            EVENT_SESSION_COMPLETED => GatewayEvent::PaymentSucceeded {
                session_id: env.data.object.id,
            },
            EVENT_REFUND_REQUESTED => GatewayEvent::RefundRequested {
                session_id: env.data.object.id,
            },
            _ => GatewayEvent::Ignored {
                event_type: env.event_type,
            },
        })
    }
}

// ── Mock gateway ─────────────────────────────────────────────────

/// In-process gateway: hands out sequential session ids and records refunds.
/// Used for local runs and tests.
#[derive(Debug)]
pub struct MockPaymentGateway {
    base_url: String,
    next_session: AtomicU64,
    fail_sessions: AtomicBool,
    fail_refunds: AtomicBool,
    sessions: Mutex<Vec<SessionRequest>>,
    /// Session amounts as the card processor sees them.
    charges: Mutex<Vec<i64>>,
    refunds: Mutex<Vec<String>>,
}

impl MockPaymentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            next_session: AtomicU64::new(1),
            fail_sessions: AtomicBool::new(false),
            fail_refunds: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<SessionRequest> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn charges(&self) -> Vec<i64> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn refunds(&self) -> Vec<String> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("https://pay.invalid/checkout")
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_session(&self, request: SessionRequest) -> Result<PaymentSession, GatewayError> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("mock configured to fail".into()));
        }
        let minor = match minor_units(request.amount) {
            Some(m) if m > 0 => m,
            _ => return Err(GatewayError::Rejected("amount must be at least one minor unit".into())),
        };
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("cs_mock_{n:06}");
        let redirect_url = format!("{}/{session_id}", self.base_url);
        tracing::debug!("mock gateway opened {session_id} for {minor} minor units of {}", request.currency);
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(minor);
        }
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(request);
        }
        Ok(PaymentSession {
            session_id,
            redirect_url,
        })
    }

    async fn refund(&self, session_id: &str) -> Result<(), GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        tracing::debug!("mock gateway refunded {session_id}");
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push(session_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> SessionRequest {
        SessionRequest {
            amount,
            currency: "usd".into(),
            description: "Hotel booking".into(),
            success_ref: "https://front.invalid/payments/1/status".into(),
            cancel_ref: "https://front.invalid/payments/1/status".into(),
        }
    }

    #[tokio::test]
    async fn mock_sessions_are_unique() {
        let gw = MockPaymentGateway::default();
        let a = gw.create_session(request(dec!(100))).await.unwrap();
        let b = gw.create_session(request(dec!(100))).await.unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert!(a.redirect_url.ends_with(&a.session_id));
        assert_eq!(gw.sessions().len(), 2);
    }

    #[tokio::test]
    async fn mock_failure_modes() {
        let gw = MockPaymentGateway::default();
        gw.fail_sessions(true);
        assert!(matches!(
            gw.create_session(request(dec!(10))).await,
            Err(GatewayError::Unreachable(_))
        ));
        gw.fail_refunds(true);
        assert_eq!(gw.refund("cs_x").await, Err(GatewayError::Timeout));
        assert!(gw.refunds().is_empty());
    }

    #[tokio::test]
    async fn mock_rejects_zero_amount() {
        let gw = MockPaymentGateway::default();
        assert!(matches!(
            gw.create_session(request(Decimal::ZERO)).await,
            Err(GatewayError::Rejected(_))
        ));
        // Rounds to zero cents.
        assert!(matches!(
            gw.create_session(request(dec!(0.004))).await,
            Err(GatewayError::Rejected(_))
        ));
        assert!(gw.charges().is_empty());
    }

    #[tokio::test]
    async fn mock_charges_in_minor_units() {
        let gw = MockPaymentGateway::default();
        gw.create_session(request(dec!(412.50))).await.unwrap();
        gw.create_session(request(dec!(0.01))).await.unwrap();
        assert_eq!(gw.charges(), vec![41250, 1]);
    }

    #[test]
    fn minor_units_rounds_cents() {
        assert_eq!(minor_units(dec!(187.50)), Some(18750));
        assert_eq!(minor_units(dec!(0.005)), Some(0));
        assert_eq!(minor_units(dec!(12.345)), Some(1234));
    }

    #[test]
    fn parse_completed_session() {
        let body = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_123","amount_total":18750}}}"#;
        assert_eq!(
            GatewayEvent::from_json(body).unwrap(),
            GatewayEvent::PaymentSucceeded {
                session_id: "cs_123".into()
            }
        );
    }

    #[test]
    fn parse_refund_request() {
        let body = br#"{"type":"charge.refund.requested","data":{"object":{"id":"cs_9"}}}"#;
        assert_eq!(
            GatewayEvent::from_json(body).unwrap(),
            GatewayEvent::RefundRequested {
                session_id: "cs_9".into()
            }
        );
    }

    #[test]
    fn unknown_event_is_ignored() {
        let body = br#"{"type":"invoice.created","data":{"object":{"id":"in_1"}}}"#;
        assert!(matches!(
            GatewayEvent::from_json(body).unwrap(),
            GatewayEvent::Ignored { .. }
        ));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(GatewayEvent::from_json(b"{not json").is_err());
    }
}
