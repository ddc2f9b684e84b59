use tracing::debug;
use ulid::Ulid;

use super::{Engine, EngineError, Entity};
use crate::limits::{MAX_GUEST_AGE, MAX_NAME_LEN};
use crate::model::{Event, Gender, Guest, Principal};

fn clean_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidRequest("guest name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name is too long"));
    }
    Ok(name.to_string())
}

fn check_age(age: Option<u32>) -> Result<(), EngineError> {
    match age {
        Some(a) if a > MAX_GUEST_AGE => Err(EngineError::InvalidRequest("guest age out of range")),
        _ => Ok(()),
    }
}

impl Engine {
    fn owned_guest(&self, principal: &Principal, guest_id: Ulid) -> Result<Guest, EngineError> {
        let guest = self
            .guests
            .get(&guest_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Guest, guest_id))?;
        if guest.owner_id != principal.user_id {
            return Err(EngineError::AccessDenied {
                entity: Entity::Guest,
                id: guest_id,
            });
        }
        Ok(guest)
    }

    pub async fn add_guest(
        &self,
        principal: &Principal,
        name: &str,
        gender: Option<Gender>,
        age: Option<u32>,
    ) -> Result<Guest, EngineError> {
        check_age(age)?;
        let guest = Guest {
            id: Ulid::new(),
            owner_id: principal.user_id,
            name: clean_name(name)?,
            gender,
            age,
        };
        self.commit(&Event::GuestSaved { guest: guest.clone() }, None, None)
            .await?;
        debug!("guest {} added for {}", guest.id, principal.user_id);
        Ok(guest)
    }

    /// Partial update: `None` leaves a field as it is.
    pub async fn update_guest(
        &self,
        principal: &Principal,
        guest_id: Ulid,
        name: Option<&str>,
        gender: Option<Gender>,
        age: Option<u32>,
    ) -> Result<Guest, EngineError> {
        let mut guest = self.owned_guest(principal, guest_id)?;
        if let Some(name) = name {
            guest.name = clean_name(name)?;
        }
        if gender.is_some() {
            guest.gender = gender;
        }
        if age.is_some() {
            check_age(age)?;
            guest.age = age;
        }
        self.commit(&Event::GuestSaved { guest: guest.clone() }, None, None)
            .await?;
        Ok(guest)
    }

    pub async fn remove_guest(&self, principal: &Principal, guest_id: Ulid) -> Result<(), EngineError> {
        self.owned_guest(principal, guest_id)?;
        self.commit(&Event::GuestRemoved { guest_id }, None, None).await?;
        debug!("guest {guest_id} removed");
        Ok(())
    }

    pub fn list_guests(&self, principal: &Principal) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self
            .guests
            .iter()
            .filter(|e| e.value().owner_id == principal.user_id)
            .map(|e| e.value().clone())
            .collect();
        guests.sort_by_key(|g| g.id);
        guests
    }
}
