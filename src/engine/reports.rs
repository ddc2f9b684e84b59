use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use ulid::Ulid;

use super::catalog::require_manager;
use super::{Engine, EngineError, Entity, SharedBooking};
use crate::model::*;

impl Engine {
    /// Hotel ownership comes from the rooms registered under it.
    fn check_hotel_owner(&self, principal: &Principal, hotel_id: Ulid) -> Result<(), EngineError> {
        require_manager(principal, Entity::Hotel, hotel_id)?;
        let owner = self
            .hotels
            .get(&hotel_id)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::not_found(Entity::Hotel, hotel_id))?;
        if owner != principal.user_id {
            return Err(EngineError::AccessDenied {
                entity: Entity::Hotel,
                id: hotel_id,
            });
        }
        Ok(())
    }

    /// Snapshot views of every booking matching `keep`, oldest first.
    async fn collect_views(&self, keep: impl Fn(&Booking) -> bool) -> Vec<BookingView> {
        let shared: Vec<SharedBooking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut views = Vec::new();
        for b in shared {
            let booking = b.lock().await;
            if keep(&booking) {
                views.push(BookingView::from_booking(&booking, self.is_expired(&booking)));
            }
        }
        views.sort_by_key(|v| v.id);
        views
    }

    pub async fn my_bookings(&self, principal: &Principal) -> Vec<BookingView> {
        let user_id = principal.user_id;
        self.collect_views(|b| b.user_id == user_id).await
    }

    pub async fn hotel_bookings(&self, principal: &Principal, hotel_id: Ulid) -> Result<Vec<BookingView>, EngineError> {
        self.check_hotel_owner(principal, hotel_id)?;
        Ok(self.collect_views(|b| b.hotel_id == hotel_id).await)
    }

    /// Confirmed bookings with check-in in `[from, to]`: count, revenue, average.
    pub async fn hotel_report(
        &self,
        principal: &Principal,
        hotel_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HotelReport, EngineError> {
        if to < from {
            return Err(EngineError::InvalidRequest("report end precedes start"));
        }
        self.check_hotel_owner(principal, hotel_id)?;
        let confirmed = self
            .collect_views(|b| {
                b.hotel_id == hotel_id
                    && b.status == BookingStatus::Confirmed
                    && (from..=to).contains(&b.check_in)
            })
            .await;

        let total_revenue: Decimal = confirmed.iter().map(|v| v.amount).sum();
        let count = confirmed.len() as u64;
        let avg_revenue = if count == 0 {
            Decimal::ZERO
        } else {
            (total_revenue / Decimal::from(count))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        };
        Ok(HotelReport {
            hotel_id,
            from,
            to,
            total_confirmed_bookings: count,
            total_revenue,
            avg_revenue,
        })
    }
}
