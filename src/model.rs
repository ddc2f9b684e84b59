use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ── Principal ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Guest,
    HotelManager,
    Admin,
}

/// Authenticated caller, as handed over by the identity provider. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Ulid,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(user_id: Ulid) -> Self {
        Self {
            user_id,
            roles: vec![Role::Guest],
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

// ── Inventory ────────────────────────────────────────────────────

/// One room-night of capacity. `held + confirmed <= total` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub total: u32,
    pub confirmed: u32,
    pub held: u32,
    #[serde(with = "decimal_str")]
    pub base_price: Decimal,
    #[serde(with = "decimal_str")]
    pub surge_factor: Decimal,
    pub closed: bool,
}

impl InventoryRow {
    pub fn new(room_id: Ulid, date: NaiveDate, total: u32, base_price: Decimal) -> Self {
        Self {
            room_id,
            date,
            total,
            confirmed: 0,
            held: 0,
            base_price,
            surge_factor: Decimal::ONE,
            closed: false,
        }
    }

    pub fn available(&self) -> u32 {
        self.total
            .saturating_sub(self.confirmed.saturating_add(self.held))
    }
}

/// Catalog input: what the catalog store knows about a bookable room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub owner_id: Ulid,
    #[serde(with = "decimal_str")]
    pub base_price: Decimal,
    pub total_count: u32,
}

/// A room whose inventory has been opened in this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub owner_id: Ulid,
    #[serde(with = "decimal_str")]
    pub base_price: Decimal,
    pub total: u32,
    pub first_date: NaiveDate,
    pub days: u32,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Reserved,
    GuestsAdded,
    PaymentsPending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that still sit on held (not yet confirmed) inventory.
    pub fn is_hold(self) -> bool {
        matches!(
            self,
            BookingStatus::Reserved | BookingStatus::GuestsAdded | BookingStatus::PaymentsPending
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Reserved => "RESERVED",
            BookingStatus::GuestsAdded => "GUESTS_ADDED",
            BookingStatus::PaymentsPending => "PAYMENTS_PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub rooms_count: u32,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: BookingStatus,
    #[serde(with = "decimal_str")]
    pub amount: Decimal,
    pub payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub guest_ids: Vec<Ulid>,
    /// Set once an expired hold has given its capacity back to the ledger.
    pub hold_released: bool,
    /// A gateway call for this booking is running outside the lock. Never persisted.
    #[serde(skip)]
    pub gateway_call_in_flight: bool,
}

impl Booking {
    /// Number of inventory rows the booking occupies (check-in through check-out, inclusive).
    pub fn row_count(&self) -> i64 {
        (self.check_out - self.check_in).num_days() + 1
    }

    /// True while the booking still holds capacity in the ledger.
    pub fn holds_inventory(&self) -> bool {
        self.status.is_hold() && !self.hold_released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Reusable guest profile owned by a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomOpened {
        room: RoomInfo,
    },
    RoomRemoved {
        room_id: Ulid,
    },
    InventoryAdjusted {
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        closed: Option<bool>,
        #[serde(with = "opt_decimal_str")]
        surge_factor: Option<Decimal>,
    },
    BookingReserved {
        booking: Booking,
    },
    GuestsAttached {
        booking_id: Ulid,
        guest_ids: Vec<Ulid>,
    },
    PaymentInitiated {
        booking_id: Ulid,
        session_id: String,
    },
    /// `rehold` means the hold had already been reclaimed and capacity was taken again.
    BookingConfirmed {
        booking_id: Ulid,
        rehold: bool,
    },
    /// Payment arrived after the hold lapsed and capacity was gone. Refunded and unlinked.
    PaymentVoided {
        booking_id: Ulid,
        session_id: String,
    },
    HoldReleased {
        booking_id: Ulid,
    },
    BookingCancelled {
        booking_id: Ulid,
    },
    GuestSaved {
        guest: Guest,
    },
    GuestRemoved {
        guest_id: Ulid,
    },
    // Snapshot records written by compaction. Applying them never touches counters
    // beyond what they carry.
    RoomRestored {
        room: RoomInfo,
    },
    /// A removed room id. Never opened again.
    RoomRetired {
        room_id: Ulid,
    },
    HotelRestored {
        hotel_id: Ulid,
        owner_id: Ulid,
    },
    RowRestored {
        row: InventoryRow,
    },
    BookingRestored {
        booking: Booking,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub rooms_count: u32,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: BookingStatus,
    #[serde(with = "decimal_str")]
    pub amount: Decimal,
    pub payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub guest_ids: Vec<Ulid>,
    pub expired: bool,
}

impl BookingView {
    pub fn from_booking(b: &Booking, expired: bool) -> Self {
        Self {
            id: b.id,
            hotel_id: b.hotel_id,
            room_id: b.room_id,
            user_id: b.user_id,
            rooms_count: b.rooms_count,
            check_in: b.check_in,
            check_out: b.check_out,
            status: b.status,
            amount: b.amount,
            payment_session_id: b.payment_session_id.clone(),
            created_at: b.created_at,
            guest_ids: b.guest_ids.clone(),
            expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRedirect {
    pub booking_id: Ulid,
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotelReport {
    pub hotel_id: Ulid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_confirmed_bookings: u64,
    #[serde(with = "decimal_str")]
    pub total_revenue: Decimal,
    #[serde(with = "decimal_str")]
    pub avg_revenue: Decimal,
}

/// Notification fanned out after a committed booking transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingUpdate {
    pub booking_id: Ulid,
    pub status: BookingStatus,
}

// bincode cannot drive rust_decimal's self-describing deserializer, so money
// travels as its canonical string everywhere.
pub mod decimal_str {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
        let raw = String::deserialize(d)?;
        Decimal::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

pub mod opt_decimal_str {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Decimal>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|r| Decimal::from_str(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_booking() -> Booking {
        Booking {
            id: Ulid::new(),
            hotel_id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            rooms_count: 2,
            check_in: date(2026, 11, 2),
            check_out: date(2026, 11, 5),
            status: BookingStatus::Reserved,
            amount: dec!(412.50),
            payment_session_id: None,
            created_at: Utc::now(),
            guest_ids: vec![],
            hold_released: false,
            gateway_call_in_flight: false,
        }
    }

    #[test]
    fn available_subtracts_held_and_confirmed() {
        let mut row = InventoryRow::new(Ulid::new(), date(2026, 11, 2), 10, dec!(100));
        row.held = 3;
        row.confirmed = 4;
        assert_eq!(row.available(), 3);
    }

    #[test]
    fn available_never_underflows() {
        let mut row = InventoryRow::new(Ulid::new(), date(2026, 11, 2), 2, dec!(100));
        row.held = 5;
        assert_eq!(row.available(), 0);
    }

    #[test]
    fn booking_row_count_includes_checkout_date() {
        let b = sample_booking();
        assert_eq!(b.row_count(), 4);
    }

    #[test]
    fn hold_statuses() {
        assert!(BookingStatus::Reserved.is_hold());
        assert!(BookingStatus::GuestsAdded.is_hold());
        assert!(BookingStatus::PaymentsPending.is_hold());
        assert!(!BookingStatus::Confirmed.is_hold());
        assert!(!BookingStatus::Cancelled.is_hold());
    }

    #[test]
    fn released_hold_no_longer_holds_inventory() {
        let mut b = sample_booking();
        assert!(b.holds_inventory());
        b.hold_released = true;
        assert!(!b.holds_inventory());
    }

    #[test]
    fn principal_roles() {
        let p = Principal::new(Ulid::new()).with_role(Role::HotelManager);
        assert!(p.has_role(Role::Guest));
        assert!(p.has_role(Role::HotelManager));
        assert!(!p.has_role(Role::Admin));
        let again = p.clone().with_role(Role::HotelManager);
        assert_eq!(again.roles.len(), 2);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingReserved {
            booking: sample_booking(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn in_flight_flag_is_not_persisted() {
        let mut booking = sample_booking();
        booking.gateway_call_in_flight = true;
        let bytes = bincode::serialize(&Event::BookingRestored { booking }).unwrap();
        let Event::BookingRestored { booking } = bincode::deserialize(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert!(!booking.gateway_call_in_flight);
    }

    #[test]
    fn optional_surge_survives_bincode() {
        let event = Event::InventoryAdjusted {
            room_id: Ulid::new(),
            start: date(2026, 12, 20),
            end: date(2026, 12, 31),
            closed: None,
            surge_factor: Some(dec!(1.35)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), event);
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&BookingStatus::PaymentsPending).unwrap();
        assert_eq!(json, "\"PAYMENTS_PENDING\"");
        assert_eq!(BookingStatus::GuestsAdded.to_string(), "GUESTS_ADDED");
    }
}
