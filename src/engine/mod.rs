mod booking;
mod catalog;
mod error;
mod guests;
mod ledger;
mod payments;
mod reports;

pub use error::{EngineError, Entity};
pub use ledger::{InventoryLedger, LockedRange, RowKey};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Days, NaiveDate};
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::expiry;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::payment::PaymentGateway;
use crate::wal::Wal;

pub type SharedBooking = Arc<Mutex<Booking>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are
/// written together and share one fsync. A non-append command ends the
/// batch and runs right after it, so ordering is preserved.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred: Option<WalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch: Vec<PendingAppend> = vec![(event, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut wal, batch);
            }
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file());
                if result.is_ok() {
                    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
                }
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let buffered = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let outcome = buffered.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let reply = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) ledger: InventoryLedger,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    /// Payment session reference → booking. One booking per reference.
    pub(super) sessions: DashMap<String, Ulid>,
    pub(super) guests: DashMap<Ulid, Guest>,
    pub(super) rooms: DashMap<Ulid, RoomInfo>,
    /// Removed room ids. Bookings may still point at them, so they stay retired.
    pub(super) retired_rooms: DashSet<Ulid>,
    /// Hotel → owner, fixed by the first room opened under it.
    pub(super) hotels: DashMap<Ulid, Ulid>,
    /// Serializes room open/remove.
    pub(super) catalog: Mutex<()>,
    /// Commits hold it shared; compaction takes it exclusively to snapshot.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: EngineSettings,
    pub notify: Arc<NotifyHub>,
}

/// Booking-record side of a committed event. Caller holds the booking lock.
fn apply_to_booking(booking: &mut Booking, event: &Event) {
    match event {
        Event::GuestsAttached { guest_ids, .. } => {
            booking.guest_ids = guest_ids.clone();
            booking.status = BookingStatus::GuestsAdded;
        }
        Event::PaymentInitiated { session_id, .. } => {
            booking.payment_session_id = Some(session_id.clone());
            booking.status = BookingStatus::PaymentsPending;
        }
        Event::BookingConfirmed { .. } => {
            booking.status = BookingStatus::Confirmed;
            booking.hold_released = false;
        }
        Event::PaymentVoided { .. } => booking.payment_session_id = None,
        Event::HoldReleased { .. } => booking.hold_released = true,
        Event::BookingCancelled { .. } => booking.status = BookingStatus::Cancelled,
        _ => {}
    }
}

/// Booking an event targets, when it targets an existing one.
fn event_booking_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::GuestsAttached { booking_id, .. }
        | Event::PaymentInitiated { booking_id, .. }
        | Event::BookingConfirmed { booking_id, .. }
        | Event::PaymentVoided { booking_id, .. }
        | Event::HoldReleased { booking_id }
        | Event::BookingCancelled { booking_id } => Some(*booking_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        settings: EngineSettings,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledger: InventoryLedger::new(),
            bookings: DashMap::new(),
            sessions: DashMap::new(),
            guests: DashMap::new(),
            rooms: DashMap::new(),
            retired_rooms: DashSet::new(),
            hotels: DashMap::new(),
            catalog: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal_tx,
            gateway,
            clock,
            settings,
            notify: Arc::new(NotifyHub::new()),
        };
        let replayed = events.len();
        engine.replay(&events)?;
        info!(
            "replayed {replayed} events: {} rooms, {} rows, {} bookings, {} guests",
            engine.rooms.len(),
            engine.ledger.row_count(),
            engine.bookings.len(),
            engine.guests.len()
        );
        Ok(engine)
    }

    // Nothing else can see the engine yet, so every try_lock succeeds. Never
    // block here: this runs inside the runtime.
    fn replay(&self, events: &[Event]) -> io::Result<()> {
        let contended = || io::Error::other("replay: unexpected lock contention");
        for event in events {
            let mut booking = match event_booking_id(event) {
                Some(id) => match self.bookings.get(&id).map(|e| e.value().clone()) {
                    Some(shared) => Some(shared.try_lock_owned().map_err(|_| contended())?),
                    None => {
                        tracing::warn!("replay: event for unknown booking {id}, skipped");
                        continue;
                    }
                },
                None => None,
            };
            let mut range = self.replay_range(event, booking.as_deref());
            self.apply(event, booking.as_deref_mut(), range.as_mut());
        }
        Ok(())
    }

    fn replay_range(&self, event: &Event, booking: Option<&Booking>) -> Option<LockedRange> {
        match event {
            Event::BookingReserved { booking: b } => {
                self.ledger.try_acquire(b.room_id, b.check_in, b.check_out, false)
            }
            Event::BookingConfirmed { .. } | Event::HoldReleased { .. } | Event::BookingCancelled { .. } => {
                booking.and_then(|b| self.ledger.try_acquire(b.room_id, b.check_in, b.check_out, false))
            }
            Event::InventoryAdjusted {
                room_id, start, end, ..
            } => self.ledger.try_acquire(*room_id, *start, *end, true),
            _ => None,
        }
    }

    /// Apply a durable event to memory. The caller holds every lock the
    /// event touches: the booking (if any) and its row range (if any).
    fn apply(&self, event: &Event, booking: Option<&mut Booking>, range: Option<&mut LockedRange>) {
        if let Some(range) = range {
            let rooms_count = match event {
                Event::BookingReserved { booking: reserved } => reserved.rooms_count,
                _ => booking.as_deref().map_or(0, |b| b.rooms_count),
            };
            ledger::apply_to_rows(range, rooms_count, event);
        }
        if let Some(booking) = booking {
            apply_to_booking(booking, event);
        }
        self.apply_to_indexes(event);
    }

    fn apply_to_indexes(&self, event: &Event) {
        match event {
            Event::RoomOpened { room } => {
                for offset in 0..room.days {
                    if let Some(date) = room.first_date.checked_add_days(Days::new(u64::from(offset))) {
                        self.ledger
                            .insert_row(InventoryRow::new(room.id, date, room.total, room.base_price));
                    }
                }
                self.hotels.entry(room.hotel_id).or_insert(room.owner_id);
                self.rooms.insert(room.id, room.clone());
            }
            Event::RoomRestored { room } => {
                self.hotels.entry(room.hotel_id).or_insert(room.owner_id);
                self.rooms.insert(room.id, room.clone());
            }
            Event::RoomRetired { room_id } => {
                self.retired_rooms.insert(*room_id);
            }
            Event::HotelRestored { hotel_id, owner_id } => {
                self.hotels.insert(*hotel_id, *owner_id);
            }
            Event::RowRestored { row } => self.ledger.insert_row(row.clone()),
            Event::RoomRemoved { room_id } => {
                self.rooms.remove(room_id);
                self.retired_rooms.insert(*room_id);
                self.ledger.remove_room(*room_id);
            }
            Event::BookingReserved { booking } | Event::BookingRestored { booking } => {
                if let Some(session) = &booking.payment_session_id {
                    self.sessions.insert(session.clone(), booking.id);
                }
                self.bookings
                    .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
            }
            Event::PaymentInitiated {
                booking_id,
                session_id,
            } => {
                self.sessions.insert(session_id.clone(), *booking_id);
            }
            Event::PaymentVoided { session_id, .. } => {
                self.sessions.remove(session_id);
            }
            Event::GuestSaved { guest } => {
                self.guests.insert(guest.id, guest.clone());
            }
            Event::GuestRemoved { guest_id } => {
                self.guests.remove(guest_id);
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Make an event durable, then apply it. If the append fails nothing is applied.
    pub(super) async fn commit(
        &self,
        event: &Event,
        booking: Option<&mut Booking>,
        range: Option<&mut LockedRange>,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.apply(event, booking, range);
        Ok(())
    }

    /// Fan out a booking's new status. Terminal bookings close their channel.
    pub(super) fn announce(&self, booking: &Booking) {
        self.notify.send(BookingUpdate {
            booking_id: booking.id,
            status: booking.status,
        });
        if booking.status == BookingStatus::Cancelled {
            self.notify.remove(&booking.id);
        }
    }

    // ── Shared lookups ───────────────────────────────────

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub(super) fn hold_window(&self) -> chrono::Duration {
        expiry::hold_window(self.settings.hold_window_minutes)
    }

    pub(super) fn is_expired(&self, booking: &Booking) -> bool {
        expiry::booking_expired(booking, self.clock.now(), self.hold_window())
    }

    pub(super) async fn lock_booking(&self, id: Ulid) -> Result<OwnedMutexGuard<Booking>, EngineError> {
        let shared = self
            .bookings
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Booking, id))?;
        Ok(shared.lock_owned().await)
    }

    pub(super) fn room(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        self.rooms
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Room, id))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current state of one inventory row.
    pub async fn inventory_row(&self, room_id: Ulid, date: NaiveDate) -> Option<InventoryRow> {
        let shared = self.ledger.get(room_id, date)?;
        let row = shared.lock().await;
        Some(row.clone())
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL as a snapshot of current state. Returns `false` when a
    /// row or booking was busy and the round was skipped.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .hotels
            .iter()
            .map(|e| Event::HotelRestored {
                hotel_id: *e.key(),
                owner_id: *e.value(),
            })
            .collect();
        events.extend(self.retired_rooms.iter().map(|id| Event::RoomRetired { room_id: *id }));
        events.extend(self.rooms.iter().map(|e| Event::RoomRestored {
            room: e.value().clone(),
        }));

        for shared in self.ledger.all_rows() {
            let Ok(row) = shared.try_lock() else {
                debug!("compaction skipped: inventory row busy");
                return Ok(false);
            };
            events.push(Event::RowRestored { row: row.clone() });
        }

        events.extend(self.guests.iter().map(|e| Event::GuestSaved {
            guest: e.value().clone(),
        }));

        let bookings: Vec<SharedBooking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for shared in bookings {
            let Ok(booking) = shared.try_lock() else {
                debug!("compaction skipped: booking busy");
                return Ok(false);
            };
            events.push(Event::BookingRestored {
                booking: booking.clone(),
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))
    }
}
