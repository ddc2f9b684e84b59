use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::BookingStatus;
use crate::payment::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Hotel,
    Booking,
    Guest,
    PaymentSession,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Entity::Room => "room",
            Entity::Hotel => "hotel",
            Entity::Booking => "booking",
            Entity::Guest => "guest",
            Entity::PaymentSession => "payment session",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    #[error("room {room_id} unavailable for {start}..={end}")]
    Unavailable {
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("access denied to {entity} {id}")]
    AccessDenied { entity: Entity, id: Ulid },

    #[error("booking {booking_id} is {status}: cannot {operation}")]
    InvalidTransition {
        booking_id: Ulid,
        status: BookingStatus,
        operation: &'static str,
    },

    #[error("booking {booking_id} hold expired")]
    HoldExpired { booking_id: Ulid },

    #[error("payment gateway failure: {0}")]
    UpstreamFailure(#[from] GatewayError),

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(entity: Entity, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Stable, machine-readable error class.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Unavailable { .. } => "unavailable",
            EngineError::AccessDenied { .. } => "access_denied",
            // An expired hold is a failed guard like any other wrong-state attempt.
            EngineError::InvalidTransition { .. } | EngineError::HoldExpired { .. } => {
                "invalid_transition"
            }
            EngineError::UpstreamFailure(_) => "upstream_failure",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        self.kind() == "invalid_transition"
    }
}
