//! Per-(room, date) capacity counters.
//!
//! Every row sits behind its own async mutex. A transition locks the whole
//! date range it touches, always in ascending date order, and keeps the
//! guards until it has committed. Concurrent lockers of overlapping ranges
//! therefore serialize, while disjoint ranges never contend.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::{Event, InventoryRow};

use super::EngineError;

pub type SharedRow = Arc<Mutex<InventoryRow>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub room_id: Ulid,
    pub date: NaiveDate,
}

impl RowKey {
    pub fn new(room_id: Ulid, date: NaiveDate) -> Self {
        Self { room_id, date }
    }
}

/// Exclusive ownership of consecutive rows of one room, in date order.
/// Dropping it ends the lock scope.
pub struct LockedRange {
    room_id: Ulid,
    guards: Vec<OwnedMutexGuard<InventoryRow>>,
}

impl LockedRange {
    pub fn room_id(&self) -> Ulid {
        self.room_id
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &InventoryRow> {
        self.guards.iter().map(|g| &**g)
    }

    pub fn snapshot(&self) -> Vec<InventoryRow> {
        self.rows().cloned().collect()
    }

    /// Take `count` units on every row. Capacity was validated when the range was locked.
    pub fn hold(&mut self, count: u32) {
        for row in self.guards.iter_mut() {
            row.held += count;
            debug_assert!(row.held + row.confirmed <= row.total, "overbooked {}", row.date);
        }
    }

    pub fn release(&mut self, count: u32) {
        for row in self.guards.iter_mut() {
            row.held = row.held.saturating_sub(count);
        }
    }

    pub fn confirm(&mut self, count: u32) {
        for row in self.guards.iter_mut() {
            row.held = row.held.saturating_sub(count);
            row.confirmed += count;
        }
    }

    pub fn revert_confirm(&mut self, count: u32) {
        for row in self.guards.iter_mut() {
            row.confirmed = row.confirmed.saturating_sub(count);
        }
    }

    pub fn adjust(&mut self, closed: Option<bool>, surge_factor: Option<Decimal>) {
        for row in self.guards.iter_mut() {
            if let Some(c) = closed {
                row.closed = c;
            }
            if let Some(s) = surge_factor {
                row.surge_factor = s;
            }
        }
    }
}

/// Apply the ledger side of a committed event. `rooms_count` comes from the booking.
pub(super) fn apply_to_rows(range: &mut LockedRange, rooms_count: u32, event: &Event) {
    match event {
        Event::BookingReserved { .. } => range.hold(rooms_count),
        Event::BookingConfirmed { rehold, .. } => {
            if *rehold {
                range.hold(rooms_count);
            }
            range.confirm(rooms_count);
        }
        Event::HoldReleased { .. } => range.release(rooms_count),
        Event::BookingCancelled { .. } => range.revert_confirm(rooms_count),
        Event::InventoryAdjusted {
            closed,
            surge_factor,
            ..
        } => range.adjust(*closed, *surge_factor),
        _ => {}
    }
}

fn dates(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

#[derive(Default)]
pub struct InventoryLedger {
    rows: DashMap<RowKey, SharedRow>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_row(&self, row: InventoryRow) {
        let key = RowKey::new(row.room_id, row.date);
        self.rows.insert(key, Arc::new(Mutex::new(row)));
    }

    pub fn get(&self, room_id: Ulid, date: NaiveDate) -> Option<SharedRow> {
        self.rows
            .get(&RowKey::new(room_id, date))
            .map(|e| e.value().clone())
    }

    pub fn remove_room(&self, room_id: Ulid) -> usize {
        let before = self.rows.len();
        self.rows.retain(|k, _| k.room_id != room_id);
        before - self.rows.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Every row of a room, date-ordered. Rows are not locked.
    pub fn room_rows(&self, room_id: Ulid) -> Vec<(NaiveDate, SharedRow)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|e| e.key().room_id == room_id)
            .map(|e| (e.key().date, e.value().clone()))
            .collect();
        rows.sort_by_key(|(d, _)| *d);
        rows
    }

    pub fn all_rows(&self) -> Vec<SharedRow> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rows.sort_by_key(|(k, _)| *k);
        rows.into_iter().map(|(_, r)| r).collect()
    }

    fn collect(&self, room_id: Ulid, start: NaiveDate, end: NaiveDate) -> Option<Vec<SharedRow>> {
        dates(start, end).map(|d| self.get(room_id, d)).collect()
    }

    async fn lock_all(room_id: Ulid, rows: Vec<SharedRow>) -> LockedRange {
        let mut guards = Vec::with_capacity(rows.len());
        for row in rows {
            guards.push(row.lock_owned().await);
        }
        LockedRange { room_id, guards }
    }

    /// Lock every row of `[start, end]` and validate that each can take
    /// `requested` more units. All-or-nothing: a single missing, closed or
    /// full night makes the whole range unavailable.
    pub async fn lock_range(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        requested: u32,
    ) -> Result<LockedRange, EngineError> {
        let unavailable = || EngineError::Unavailable {
            room_id,
            start,
            end,
        };
        let rows = self.collect(room_id, start, end).ok_or_else(unavailable)?;
        let range = Self::lock_all(room_id, rows).await;
        if range.rows().any(|r| r.closed || r.available() < requested) {
            return Err(unavailable());
        }
        Ok(range)
    }

    /// Lock every row of `[start, end]` without capacity checks. `None` if any row is gone.
    pub async fn acquire(&self, room_id: Ulid, start: NaiveDate, end: NaiveDate) -> Option<LockedRange> {
        let rows = self.collect(room_id, start, end)?;
        Some(Self::lock_all(room_id, rows).await)
    }

    /// Lock whichever rows of `[start, end]` exist.
    pub async fn acquire_existing(&self, room_id: Ulid, start: NaiveDate, end: NaiveDate) -> LockedRange {
        let rows = dates(start, end).filter_map(|d| self.get(room_id, d)).collect();
        Self::lock_all(room_id, rows).await
    }

    /// Non-blocking variant for replay, where nothing else can hold a row.
    pub fn try_acquire(&self, room_id: Ulid, start: NaiveDate, end: NaiveDate, existing_only: bool) -> Option<LockedRange> {
        let rows: Vec<SharedRow> = if existing_only {
            dates(start, end).filter_map(|d| self.get(room_id, d)).collect()
        } else {
            self.collect(room_id, start, end)?
        };
        let guards = rows
            .into_iter()
            .map(|r| r.try_lock_owned().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(LockedRange { room_id, guards })
    }
}
