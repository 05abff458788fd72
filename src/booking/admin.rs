use crate::forms::FormErrors;
use crate::model::*;

use super::{BookingError, BookingService, validate_guest};
use crate::store::StoreError;

impl BookingService {
    pub async fn rooms(&self) -> Result<Vec<Room>, BookingError> {
        Ok(self.call("list_rooms", self.store.list_rooms()).await?)
    }

    pub async fn room(&self, id: RoomId) -> Result<Room, BookingError> {
        self.call("get_room", self.store.get_room(id))
            .await?
            .ok_or(BookingError::NotFound { what: "room", id })
    }

    /// Reservations ordered by arrival date, room snapshot attached.
    pub async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, BookingError> {
        Ok(self
            .call("list_reservations", self.store.list_reservations(filter))
            .await?)
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.call("get_reservation", self.store.get_reservation(id))
            .await?
            .ok_or(BookingError::NotFound {
                what: "reservation",
                id,
            })
    }

    /// Replace the guest's name and contact fields. Dates and room are fixed.
    pub async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), BookingError> {
        let errors = validate_guest(&guest);
        if !errors.is_empty() {
            return Err(BookingError::Validation { errors, request: None });
        }
        let guest = GuestDetails {
            first_name: guest.first_name.trim().to_string(),
            last_name: guest.last_name.trim().to_string(),
            email: guest.email.trim().to_string(),
            phone: guest.phone.trim().to_string(),
        };
        self.call("update_guest", self.store.update_guest(id, guest)).await?;
        tracing::info!(reservation_id = id, "guest details updated");
        Ok(())
    }

    pub async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), BookingError> {
        self.call("set_processed", self.store.set_processed(id, processed))
            .await?;
        tracing::info!(reservation_id = id, processed, "reservation processed flag set");
        Ok(())
    }

    /// Delete a reservation together with its restriction.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), BookingError> {
        let room_id = self.reservation(id).await?.room_id;
        let _lock = self.call("lock_room", self.store.lock_room(room_id)).await?;
        self.call("delete_reservation", self.store.delete_reservation(id))
            .await?;
        tracing::info!(reservation_id = id, room_id, "reservation deleted");
        Ok(())
    }

    /// Block `date` for `room_id` as owner time. A day that already carries a
    /// restriction is a conflict.
    pub async fn add_block(&self, room_id: RoomId, date: chrono::NaiveDate) -> Result<RestrictionId, BookingError> {
        let Some(block) = NewRestriction::owner_block(room_id, date) else {
            let mut errors = FormErrors::default();
            errors.add("date", "There is no following day to block");
            return Err(BookingError::Validation { errors, request: None });
        };
        if self.call("get_room", self.store.get_room(room_id)).await?.is_none() {
            return Err(BookingError::NotFound { what: "room", id: room_id });
        }
        let _lock = self.call("lock_room", self.store.lock_room(room_id)).await?;
        if !self.availability.is_room_available(room_id, block.span).await? {
            return Err(BookingError::Conflict {
                room_id,
                span: block.span,
            });
        }
        let id = match self.call("insert_restriction", self.store.insert_restriction(block)).await {
            Ok(id) => id,
            Err(StoreError::Overlap { .. }) => {
                return Err(BookingError::Conflict {
                    room_id,
                    span: block.span,
                });
            }
            Err(e) => return Err(e.into()),
        };
        metrics::counter!(crate::observability::BLOCK_CHANGES_TOTAL, "action" => "add").increment(1);
        tracing::info!(room_id, %date, restriction_id = id, "owner block added");
        Ok(id)
    }

    /// Remove an owner block. Reservation restrictions are not blocks and
    /// report `NotFound`; they go away with their reservation.
    pub async fn remove_block(&self, restriction_id: RestrictionId) -> Result<(), BookingError> {
        let not_found = BookingError::NotFound {
            what: "block",
            id: restriction_id,
        };
        let Some(restriction) = self
            .call("get_restriction", self.store.get_restriction(restriction_id))
            .await?
        else {
            return Err(not_found);
        };
        if restriction.kind != RestrictionKind::OwnerBlock {
            return Err(not_found);
        }
        match self
            .call("delete_restriction", self.store.delete_restriction(restriction_id))
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => return Err(not_found),
            Err(e) => return Err(e.into()),
        }
        metrics::counter!(crate::observability::BLOCK_CHANGES_TOTAL, "action" => "remove").increment(1);
        tracing::info!(room_id = restriction.room_id, restriction_id, "owner block removed");
        Ok(())
    }
}
