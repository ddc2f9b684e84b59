//! Dynamic nightly pricing.
//!
//! A night's price is a fold of [`PIPELINE`] over the row's base price. Each
//! rule looks only at the row and the current date, and applies at most one
//! multiplier to whatever the previous rule produced.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::model::InventoryRow;

pub const OCCUPANCY_THRESHOLD: Decimal = dec!(0.8);
pub const OCCUPANCY_MULTIPLIER: Decimal = dec!(1.20);
pub const URGENCY_WINDOW_DAYS: i64 = 7;
pub const URGENCY_MULTIPLIER: Decimal = dec!(1.15);
pub const WEEKEND_MULTIPLIER: Decimal = dec!(1.25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingRule {
    Base,
    Surge,
    Occupancy,
    Urgency,
    Weekend,
}

/// Evaluation order. Changing it changes prices.
pub const PIPELINE: [PricingRule; 5] = [
    PricingRule::Base,
    PricingRule::Surge,
    PricingRule::Occupancy,
    PricingRule::Urgency,
    PricingRule::Weekend,
];

impl PricingRule {
    pub fn apply(self, price: Decimal, row: &InventoryRow, today: NaiveDate) -> Decimal {
        match self {
            PricingRule::Base => row.base_price,
            PricingRule::Surge if row.surge_factor > Decimal::ONE => price * row.surge_factor,
            PricingRule::Occupancy if high_occupancy(row) => price * OCCUPANCY_MULTIPLIER,
            PricingRule::Urgency if is_last_minute(row.date, today) => price * URGENCY_MULTIPLIER,
            PricingRule::Weekend if is_weekend(row.date) => price * WEEKEND_MULTIPLIER,
            _ => price,
        }
    }
}

fn high_occupancy(row: &InventoryRow) -> bool {
    if row.total == 0 {
        return false;
    }
    Decimal::from(row.confirmed) / Decimal::from(row.total) > OCCUPANCY_THRESHOLD
}

fn is_last_minute(date: NaiveDate, today: NaiveDate) -> bool {
    let days_away = (date - today).num_days();
    (0..=URGENCY_WINDOW_DAYS).contains(&days_away)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Final price of one room for one night.
pub fn price_night(row: &InventoryRow, today: NaiveDate) -> Decimal {
    PIPELINE
        .iter()
        .fold(Decimal::ZERO, |price, rule| rule.apply(price, row, today))
}

/// `rooms_count × Σ nightly price`, rounded to cents once at the end.
pub fn price_stay<'a, I>(rows: I, rooms_count: u32, today: NaiveDate) -> Decimal
where
    I: IntoIterator<Item = &'a InventoryRow>,
{
    let per_room: Decimal = rows.into_iter().map(|row| price_night(row, today)).sum();
    (per_room * Decimal::from(rooms_count))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
