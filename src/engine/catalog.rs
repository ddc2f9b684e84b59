use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use super::{Engine, EngineError, Entity};
use crate::limits::{MAX_INVENTORY_DAYS, MAX_ROOM_CAPACITY};
use crate::model::*;

/// Catalog and reporting calls are for hotel managers only.
pub(super) fn require_manager(principal: &Principal, entity: Entity, id: Ulid) -> Result<(), EngineError> {
    if !principal.has_role(Role::HotelManager) {
        return Err(EngineError::AccessDenied { entity, id });
    }
    Ok(())
}

fn check_room_owner(room: &RoomInfo, principal: &Principal) -> Result<(), EngineError> {
    require_manager(principal, Entity::Room, room.id)?;
    if room.owner_id != principal.user_id {
        return Err(EngineError::AccessDenied {
            entity: Entity::Room,
            id: room.id,
        });
    }
    Ok(())
}

impl Engine {
    /// Register a catalog room and generate `days` inventory rows from `first_date`.
    pub async fn open_room(
        &self,
        principal: &Principal,
        spec: RoomSpec,
        first_date: NaiveDate,
        days: u32,
    ) -> Result<RoomInfo, EngineError> {
        require_manager(principal, Entity::Hotel, spec.hotel_id)?;
        if spec.owner_id != principal.user_id {
            return Err(EngineError::AccessDenied {
                entity: Entity::Hotel,
                id: spec.hotel_id,
            });
        }
        if days == 0 {
            return Err(EngineError::InvalidRequest("inventory must cover at least one day"));
        }
        if days > MAX_INVENTORY_DAYS {
            return Err(EngineError::LimitExceeded("inventory horizon is too long"));
        }
        if spec.total_count > MAX_ROOM_CAPACITY {
            return Err(EngineError::LimitExceeded("room count is too large"));
        }
        if spec.base_price <= Decimal::ZERO {
            return Err(EngineError::InvalidRequest("base price must be positive"));
        }

        let _catalog = self.catalog.lock().await;
        if self.rooms.contains_key(&spec.room_id) {
            return Err(EngineError::InvalidRequest("room inventory is already open"));
        }
        if self.retired_rooms.contains(&spec.room_id) {
            return Err(EngineError::InvalidRequest("room id was removed and cannot be reopened"));
        }
        let hotel_owner = self.hotels.get(&spec.hotel_id).map(|e| *e.value());
        if hotel_owner.is_some_and(|owner| owner != principal.user_id) {
            return Err(EngineError::AccessDenied {
                entity: Entity::Hotel,
                id: spec.hotel_id,
            });
        }
        let room = RoomInfo {
            id: spec.room_id,
            hotel_id: spec.hotel_id,
            owner_id: spec.owner_id,
            base_price: spec.base_price,
            total: spec.total_count,
            first_date,
            days,
        };
        self.commit(&Event::RoomOpened { room: room.clone() }, None, None)
            .await?;
        info!(
            "room {} opened: {} units x {days} days from {first_date}",
            room.id, room.total
        );
        Ok(room)
    }

    /// Delete a room and every one of its inventory rows. Bookings stay.
    pub async fn remove_room(&self, principal: &Principal, room_id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let room = self.room(room_id)?;
        check_room_owner(&room, principal)?;
        self.commit(&Event::RoomRemoved { room_id }, None, None).await?;
        info!("room {room_id} removed");
        Ok(())
    }

    /// Close/reopen nights or set their surge factor across `[start, end]`.
    /// Returns how many existing rows were updated.
    pub async fn adjust_inventory(
        &self,
        principal: &Principal,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        closed: Option<bool>,
        surge_factor: Option<Decimal>,
    ) -> Result<usize, EngineError> {
        if end < start {
            return Err(EngineError::InvalidRequest("end date precedes start date"));
        }
        if (end - start).num_days() >= i64::from(MAX_INVENTORY_DAYS) {
            return Err(EngineError::LimitExceeded("adjustment range is too long"));
        }
        if closed.is_none() && surge_factor.is_none() {
            return Err(EngineError::InvalidRequest("nothing to update"));
        }
        if surge_factor.is_some_and(|s| s <= Decimal::ZERO) {
            return Err(EngineError::InvalidRequest("surge factor must be positive"));
        }
        let room = self.room(room_id)?;
        check_room_owner(&room, principal)?;

        let mut range = self.ledger.acquire_existing(room_id, start, end).await;
        if range.is_empty() {
            return Ok(0);
        }
        self.commit(
            &Event::InventoryAdjusted {
                room_id,
                start,
                end,
                closed,
                surge_factor,
            },
            None,
            Some(&mut range),
        )
        .await?;
        info!("room {room_id}: adjusted {} rows in {start}..={end}", range.len());
        Ok(range.len())
    }

    /// Every inventory row of a room, in date order.
    pub async fn room_inventory(&self, principal: &Principal, room_id: Ulid) -> Result<Vec<InventoryRow>, EngineError> {
        let room = self.room(room_id)?;
        check_room_owner(&room, principal)?;
        let mut rows = Vec::new();
        for (_, shared) in self.ledger.room_rows(room_id) {
            rows.push(shared.lock().await.clone());
        }
        Ok(rows)
    }

    /// Rooms of a hotel whose inventory is open here.
    pub fn hotel_rooms(&self, hotel_id: Ulid) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .filter(|e| e.value().hotel_id == hotel_id)
            .map(|e| e.value().clone())
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }
}
