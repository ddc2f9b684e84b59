use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use super::{Engine, EngineError, Entity};
use crate::limits::{MAX_GUESTS_PER_BOOKING, MAX_ROOMS_PER_BOOKING, MAX_STAY_ROWS};
use crate::model::*;
use crate::observability;
use crate::payment::SessionRequest;
use crate::pricing;

fn check_owner(booking: &Booking, principal: &Principal) -> Result<(), EngineError> {
    if booking.user_id != principal.user_id {
        return Err(EngineError::AccessDenied {
            entity: Entity::Booking,
            id: booking.id,
        });
    }
    Ok(())
}

fn invalid(booking: &Booking, operation: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        booking_id: booking.id,
        status: booking.status,
        operation,
    }
}

fn can_initiate_payment(status: BookingStatus) -> bool {
    matches!(status, BookingStatus::Reserved | BookingStatus::GuestsAdded)
}

impl Engine {
    /// Hold `rooms_count` units of a room for every night in
    /// `check_in..=check_out`, price the stay, and open a RESERVED booking.
    pub async fn initiate(
        &self,
        principal: &Principal,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        rooms_count: u32,
    ) -> Result<BookingView, EngineError> {
        if check_out <= check_in {
            return Err(EngineError::InvalidRequest("check-out must be after check-in"));
        }
        if rooms_count == 0 {
            return Err(EngineError::InvalidRequest("at least one room is required"));
        }
        if rooms_count > MAX_ROOMS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many rooms in one booking"));
        }
        if (check_out - check_in).num_days() + 1 > MAX_STAY_ROWS {
            return Err(EngineError::LimitExceeded("stay is too long"));
        }
        let room = self.room(room_id)?;

        let mut range = match self
            .ledger
            .lock_range(room_id, check_in, check_out, rooms_count)
            .await
        {
            Ok(range) => range,
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_UNAVAILABLE_TOTAL).increment(1);
                return Err(e);
            }
        };

        let now = self.clock.now();
        let amount = pricing::price_stay(range.rows(), rooms_count, now.date_naive());
        let booking = Booking {
            id: Ulid::new(),
            hotel_id: room.hotel_id,
            room_id,
            user_id: principal.user_id,
            rooms_count,
            check_in,
            check_out,
            status: BookingStatus::Reserved,
            amount,
            payment_session_id: None,
            created_at: now,
            guest_ids: Vec::new(),
            hold_released: false,
            gateway_call_in_flight: false,
        };
        self.commit(
            &Event::BookingReserved {
                booking: booking.clone(),
            },
            None,
            Some(&mut range),
        )
        .await?;
        drop(range);

        metrics::counter!(observability::BOOKINGS_RESERVED_TOTAL).increment(1);
        info!(
            "booking {} reserved: room {room_id} x{rooms_count} {check_in}..={check_out} for {amount}",
            booking.id
        );
        Ok(BookingView::from_booking(&booking, false))
    }

    /// Give an expired hold's capacity back. Caller holds the booking lock.
    /// Returns whether anything was released.
    pub(super) async fn release_hold_locked(
        &self,
        booking: &mut Booking,
        path: &'static str,
    ) -> Result<bool, EngineError> {
        if !booking.holds_inventory() {
            return Ok(false);
        }
        let mut range = self
            .ledger
            .acquire(booking.room_id, booking.check_in, booking.check_out)
            .await;
        if range.is_none() {
            warn!("booking {}: room rows are gone, releasing without ledger update", booking.id);
        }
        self.commit(
            &Event::HoldReleased {
                booking_id: booking.id,
            },
            Some(&mut *booking),
            range.as_mut(),
        )
        .await?;
        metrics::counter!(observability::HOLDS_RELEASED_TOTAL, "path" => path).increment(1);
        info!(
            "booking {} hold expired, released {} rooms x {} rows ({path})",
            booking.id,
            booking.rooms_count,
            booking.row_count()
        );
        Ok(true)
    }

    /// Fail with `HoldExpired` (releasing the hold first) once the window has passed.
    async fn ensure_live(&self, booking: &mut Booking) -> Result<(), EngineError> {
        if !self.is_expired(booking) {
            return Ok(());
        }
        self.release_hold_locked(booking, "lazy").await?;
        Err(EngineError::HoldExpired {
            booking_id: booking.id,
        })
    }

    /// Attach the caller's guest profiles to a RESERVED booking.
    pub async fn add_guests(
        &self,
        principal: &Principal,
        booking_id: Ulid,
        guest_ids: &[Ulid],
    ) -> Result<BookingView, EngineError> {
        let mut booking = self.lock_booking(booking_id).await?;
        check_owner(&booking, principal)?;
        self.ensure_live(&mut booking).await?;
        if booking.status != BookingStatus::Reserved {
            return Err(invalid(&booking, "add guests"));
        }

        let mut unique: Vec<Ulid> = Vec::with_capacity(guest_ids.len());
        for id in guest_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        if unique.is_empty() {
            return Err(EngineError::InvalidRequest("at least one guest is required"));
        }
        if unique.len() > MAX_GUESTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many guests in one booking"));
        }
        for id in &unique {
            let owner = self
                .guests
                .get(id)
                .map(|g| g.owner_id)
                .ok_or_else(|| EngineError::not_found(Entity::Guest, id))?;
            if owner != principal.user_id {
                return Err(EngineError::AccessDenied {
                    entity: Entity::Guest,
                    id: *id,
                });
            }
        }

        self.commit(
            &Event::GuestsAttached {
                booking_id,
                guest_ids: unique,
            },
            Some(&mut *booking),
            None,
        )
        .await?;
        self.announce(&booking);
        info!("booking {booking_id}: {} guests attached", booking.guest_ids.len());
        Ok(BookingView::from_booking(&booking, false))
    }

    /// Open a payment session for the booking's stored total and move it to
    /// PAYMENTS_PENDING. The gateway is called with no lock held.
    pub async fn initiate_payment(
        &self,
        principal: &Principal,
        booking_id: Ulid,
    ) -> Result<PaymentRedirect, EngineError> {
        let request = {
            let mut booking = self.lock_booking(booking_id).await?;
            check_owner(&booking, principal)?;
            self.ensure_live(&mut booking).await?;
            if !can_initiate_payment(booking.status) {
                return Err(invalid(&booking, "initiate payment"));
            }
            if booking.gateway_call_in_flight {
                return Err(invalid(&booking, "initiate payment while another attempt is running"));
            }
            booking.gateway_call_in_flight = true;
            let status_ref = self.settings.payment_status_ref(booking_id);
            SessionRequest {
                amount: booking.amount,
                currency: self.settings.currency.clone(),
                description: format!("Hotel booking {booking_id}"),
                success_ref: status_ref.clone(),
                cancel_ref: status_ref,
            }
        };

        let outcome = self.gateway.create_session(request).await;

        let mut booking = self.lock_booking(booking_id).await?;
        booking.gateway_call_in_flight = false;
        let session = match outcome {
            Ok(session) => session,
            Err(e) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "call" => "create_session")
                    .increment(1);
                warn!("booking {booking_id}: payment session failed: {e}");
                return Err(e.into());
            }
        };
        // The in-flight flag kept other payment attempts out, but a
        // gateway-driven transition could still have moved the booking.
        if !can_initiate_payment(booking.status) {
            return Err(invalid(&booking, "initiate payment"));
        }
        if self.sessions.contains_key(&session.session_id) {
            return Err(crate::payment::GatewayError::Rejected(format!(
                "duplicate session reference {}",
                session.session_id
            ))
            .into());
        }

        self.commit(
            &Event::PaymentInitiated {
                booking_id,
                session_id: session.session_id.clone(),
            },
            Some(&mut *booking),
            None,
        )
        .await?;
        self.announce(&booking);
        info!("booking {booking_id}: payment session {} opened", session.session_id);
        Ok(PaymentRedirect {
            booking_id,
            session_id: session.session_id,
            url: session.redirect_url,
        })
    }

    /// Cancel a CONFIRMED booking: refund through the gateway, then return
    /// its rooms to the ledger.
    pub async fn cancel(&self, principal: &Principal, booking_id: Ulid) -> Result<BookingView, EngineError> {
        let session_id = {
            let mut booking = self.lock_booking(booking_id).await?;
            check_owner(&booking, principal)?;
            if booking.status != BookingStatus::Confirmed {
                return Err(invalid(&booking, "cancel"));
            }
            if booking.gateway_call_in_flight {
                return Err(invalid(&booking, "cancel while a refund is running"));
            }
            booking.gateway_call_in_flight = true;
            booking.payment_session_id.clone()
        };

        let refund = match &session_id {
            Some(session) => self.gateway.refund(session).await,
            None => {
                warn!("booking {booking_id}: confirmed without a payment session, nothing to refund");
                Ok(())
            }
        };

        let mut booking = self.lock_booking(booking_id).await?;
        booking.gateway_call_in_flight = false;
        if let Err(e) = refund {
            metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "call" => "refund").increment(1);
            warn!("booking {booking_id}: refund failed, booking stays confirmed: {e}");
            return Err(e.into());
        }
        if booking.status == BookingStatus::Cancelled {
            // A provider-side refund got there first.
            return Ok(BookingView::from_booking(&booking, false));
        }

        let mut range = self
            .ledger
            .acquire(booking.room_id, booking.check_in, booking.check_out)
            .await;
        if range.is_none() {
            warn!("booking {booking_id}: room rows are gone, cancelling without ledger update");
        }
        self.commit(
            &Event::BookingCancelled { booking_id },
            Some(&mut *booking),
            range.as_mut(),
        )
        .await?;
        drop(range);

        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        self.announce(&booking);
        info!(
            "booking {booking_id} cancelled and refunded, {} rows returned",
            booking.row_count()
        );
        Ok(BookingView::from_booking(&booking, false))
    }

    /// Current status, reclaiming an expired hold on the way.
    pub async fn status(&self, principal: &Principal, booking_id: Ulid) -> Result<BookingStatus, EngineError> {
        Ok(self.booking(principal, booking_id).await?.status)
    }

    pub async fn booking(&self, principal: &Principal, booking_id: Ulid) -> Result<BookingView, EngineError> {
        let mut booking = self.lock_booking(booking_id).await?;
        check_owner(&booking, principal)?;
        let expired = self.is_expired(&booking);
        if expired {
            self.release_hold_locked(&mut booking, "lazy").await?;
        }
        Ok(BookingView::from_booking(&booking, expired))
    }

    // ── Reclamation ──────────────────────────────────────

    /// Bookings whose hold window has passed and that still sit on capacity.
    /// Busy bookings are skipped; the next scan picks them up.
    pub fn collect_expired_holds(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Ulid> {
        let window = self.hold_window();
        let shared: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        shared
            .into_iter()
            .filter_map(|b| {
                let booking = b.try_lock().ok()?;
                (booking.holds_inventory() && crate::expiry::booking_expired(&booking, now, window))
                    .then_some(booking.id)
            })
            .collect()
    }

    /// Release one booking's hold if it has expired. Idempotent.
    pub async fn reclaim_expired_hold(&self, booking_id: Ulid) -> Result<bool, EngineError> {
        let mut booking = self.lock_booking(booking_id).await?;
        if !self.is_expired(&booking) {
            return Ok(false);
        }
        self.release_hold_locked(&mut booking, "reaper").await
    }
}
