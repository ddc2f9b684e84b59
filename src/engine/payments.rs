use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use ulid::Ulid;

use super::{Engine, EngineError, Entity};
use crate::model::*;
use crate::observability;
use crate::payment::GatewayEvent;

impl Engine {
    /// Booking behind a session reference, locked. A reference that was
    /// never issued, or was voided since, is `NotFound`.
    async fn lock_by_session(&self, session_id: &str) -> Result<OwnedMutexGuard<Booking>, EngineError> {
        let not_found = || EngineError::not_found(Entity::PaymentSession, session_id);
        let booking_id = self.sessions.get(session_id).map(|e| *e.value()).ok_or_else(not_found)?;
        let booking = self.lock_booking(booking_id).await?;
        if booking.payment_session_id.as_deref() != Some(session_id) {
            return Err(not_found());
        }
        Ok(booking)
    }

    /// The gateway reports a completed payment. Converts the booking's hold
    /// into a confirmation; duplicate deliveries are acknowledged unchanged.
    pub async fn confirm_payment(&self, session_id: &str) -> Result<BookingView, EngineError> {
        let mut booking = self.lock_by_session(session_id).await?;
        let booking_id = booking.id;
        match booking.status {
            BookingStatus::Confirmed => {
                info!("booking {booking_id}: duplicate payment confirmation for {session_id}");
                return Ok(BookingView::from_booking(&booking, false));
            }
            BookingStatus::Cancelled => {
                return Err(EngineError::InvalidTransition {
                    booking_id,
                    status: booking.status,
                    operation: "confirm payment",
                });
            }
            BookingStatus::Reserved | BookingStatus::GuestsAdded | BookingStatus::PaymentsPending => {}
        }

        if !booking.hold_released {
            let Some(mut range) = self
                .ledger
                .acquire(booking.room_id, booking.check_in, booking.check_out)
                .await
            else {
                return Err(EngineError::not_found(Entity::Room, booking.room_id));
            };
            self.commit(
                &Event::BookingConfirmed {
                    booking_id,
                    rehold: false,
                },
                Some(&mut *booking),
                Some(&mut range),
            )
            .await?;
            drop(range);
            return Ok(self.confirmed(&booking));
        }

        // The hold lapsed and its capacity went back. Take it again if it is
        // still there; otherwise the money goes back.
        match self
            .ledger
            .lock_range(booking.room_id, booking.check_in, booking.check_out, booking.rooms_count)
            .await
        {
            Ok(mut range) => {
                self.commit(
                    &Event::BookingConfirmed {
                        booking_id,
                        rehold: true,
                    },
                    Some(&mut *booking),
                    Some(&mut range),
                )
                .await?;
                drop(range);
                info!("booking {booking_id}: late payment, capacity re-acquired");
                Ok(self.confirmed(&booking))
            }
            Err(EngineError::Unavailable { room_id, start, end }) => {
                self.commit(
                    &Event::PaymentVoided {
                        booking_id,
                        session_id: session_id.to_string(),
                    },
                    Some(&mut *booking),
                    None,
                )
                .await?;
                drop(booking);
                metrics::counter!(observability::PAYMENTS_VOIDED_TOTAL).increment(1);

                if let Err(e) = self.gateway.refund(session_id).await {
                    metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "call" => "refund").increment(1);
                    error!("booking {booking_id}: late payment {session_id} voided but refund failed: {e}");
                    return Err(e.into());
                }
                warn!("booking {booking_id}: late payment {session_id} refunded, rooms sold out");
                Err(EngineError::Unavailable { room_id, start, end })
            }
            Err(e) => Err(e),
        }
    }

    fn confirmed(&self, booking: &Booking) -> BookingView {
        metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        self.announce(booking);
        info!("booking {} confirmed", booking.id);
        BookingView::from_booking(booking, false)
    }

    /// The customer asked the provider for their money back. A confirmed
    /// booking is cancelled and its rooms returned; the gateway already knows.
    pub async fn refund_requested(&self, session_id: &str) -> Result<BookingView, EngineError> {
        let mut booking = self.lock_by_session(session_id).await?;
        let booking_id = booking.id;
        match booking.status {
            BookingStatus::Confirmed => {}
            BookingStatus::Cancelled => return Ok(BookingView::from_booking(&booking, false)),
            status => {
                return Err(EngineError::InvalidTransition {
                    booking_id,
                    status,
                    operation: "refund",
                });
            }
        }

        let mut range = self
            .ledger
            .acquire(booking.room_id, booking.check_in, booking.check_out)
            .await;
        self.commit(
            &Event::BookingCancelled { booking_id },
            Some(&mut *booking),
            range.as_mut(),
        )
        .await?;
        drop(range);

        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        self.announce(&booking);
        info!("booking {booking_id} cancelled by provider-side refund of {session_id}");
        Ok(BookingView::from_booking(&booking, false))
    }

    /// Route a parsed webhook. `Ok(None)` for events the engine does not act on.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) -> Result<Option<BookingView>, EngineError> {
        match event {
            GatewayEvent::PaymentSucceeded { session_id } => self.confirm_payment(&session_id).await.map(Some),
            GatewayEvent::RefundRequested { session_id } => self.refund_requested(&session_id).await.map(Some),
            GatewayEvent::Ignored { event_type } => {
                tracing::debug!("ignoring gateway event {event_type}");
                Ok(None)
            }
        }
    }

    /// Booking id for a session reference, if one is live.
    pub fn booking_for_session(&self, session_id: &str) -> Option<Ulid> {
        self.sessions.get(session_id).map(|e| *e.value())
    }
}
