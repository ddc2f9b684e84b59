use chrono::{DateTime, Duration, Utc};

use crate::model::Booking;

/// Default hold window for unpaid bookings.
pub const DEFAULT_HOLD_WINDOW_MINUTES: u32 = 10;

pub fn hold_window(minutes: u32) -> Duration {
    Duration::minutes(i64::from(minutes))
}

/// A hold has expired once `now` is strictly past `created_at + window`.
pub fn has_expired(now: DateTime<Utc>, created_at: DateTime<Utc>, window: Duration) -> bool {
    now > created_at + window
}

/// Expiry only concerns bookings still sitting on a hold; confirmed and
/// cancelled bookings are never time-limited.
pub fn booking_expired(booking: &Booking, now: DateTime<Utc>, window: Duration) -> bool {
    booking.status.is_hold() && has_expired(now, booking.created_at, window)
}
