//! The guest-facing booking sequence: search dates, choose a room, fill in
//! details, see the summary. Each step reads and writes the session draft, so
//! the whole sequence can be driven without HTTP.

use std::sync::Arc;

use thiserror::Error;

use crate::booking::{BookingError, BookingService, ReservationRequest};
use crate::forms::FormErrors;
use crate::model::*;
use crate::session::{Draft, SessionError, SessionId, SessionStore, Summary};

pub const NO_AVAILABILITY: &str = "No availability";
pub const RESERVATION_SAVED: &str = "Reservation saved";
pub const NO_SUMMARY: &str = "Can't get reservation from session";

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A later step was reached without searching first.
    #[error("no reservation in progress")]
    NoDraft,

    #[error("no room chosen for the reservation in progress")]
    NoRoomChosen,

    #[error("no completed reservation to show")]
    NoSummary,
}

#[derive(Clone)]
pub struct BookingFlow {
    bookings: BookingService,
    sessions: Arc<SessionStore>,
}

impl BookingFlow {
    pub fn new(bookings: BookingService, sessions: Arc<SessionStore>) -> Self {
        Self { bookings, sessions }
    }

    /// Rooms free for `span`. With none free the session gets a one-shot
    /// error and the result is empty; otherwise a fresh draft is started.
    pub async fn search(&self, session: SessionId, span: DateSpan) -> Result<Vec<Room>, FlowError> {
        if span.is_empty() {
            let mut errors = FormErrors::default();
            errors.add("end_date", "Departure must be after arrival");
            return Err(BookingError::Validation { errors, request: None }.into());
        }
        let rooms = self
            .bookings
            .availability()
            .available_rooms(span)
            .await
            .map_err(BookingError::from)?;
        if rooms.is_empty() {
            self.sessions.put_error(session, NO_AVAILABILITY)?;
            return Ok(rooms);
        }
        self.sessions.put_draft(session, &Draft::new(span))?;
        tracing::debug!(%span, rooms = rooms.len(), "availability search");
        Ok(rooms)
    }

    /// Pick one of the rooms offered by the last search.
    pub async fn choose_room(&self, session: SessionId, room_id: RoomId) -> Result<Draft, FlowError> {
        let mut draft = self.sessions.draft(session)?.ok_or(FlowError::NoDraft)?;
        self.bookings.room(room_id).await?;
        draft.room_id = Some(room_id);
        self.sessions.put_draft(session, &draft)?;
        Ok(draft)
    }

    /// Start a draft straight from a room page, skipping the search.
    pub async fn book_room(&self, session: SessionId, room_id: RoomId, span: DateSpan) -> Result<Draft, FlowError> {
        self.bookings.room(room_id).await?;
        let draft = Draft {
            room_id: Some(room_id),
            ..Draft::new(span)
        };
        self.sessions.put_draft(session, &draft)?;
        Ok(draft)
    }

    /// The draft and its room, for rendering the details form.
    pub async fn draft(&self, session: SessionId) -> Result<(Draft, Room), FlowError> {
        let draft = self.sessions.draft(session)?.ok_or(FlowError::NoDraft)?;
        let room_id = draft.room_id.ok_or(FlowError::NoRoomChosen)?;
        let room = self.bookings.room(room_id).await?;
        Ok((draft, room))
    }

    /// Commit the draft with the guest's details.
    ///
    /// On success the draft is replaced by a summary. Bad input keeps the
    /// draft for re-display; a conflict leaves a one-shot error and drops it
    /// so the guest starts a new search.
    pub async fn confirm(&self, session: SessionId, guest: GuestDetails) -> Result<Summary, FlowError> {
        let draft = self.sessions.draft(session)?.ok_or(FlowError::NoDraft)?;
        let room_id = draft.room_id.ok_or(FlowError::NoRoomChosen)?;
        let request = ReservationRequest {
            first_name: guest.first_name,
            last_name: guest.last_name,
            email: guest.email,
            phone: guest.phone,
            room_id,
            start_date: draft.start_date,
            end_date: draft.end_date,
        };

        match self.bookings.commit(request).await {
            Ok(reservation) => {
                let summary = Summary::from(&reservation);
                self.sessions.take_draft(session)?;
                self.sessions.put_summary(session, &summary)?;
                self.sessions.flash(session, RESERVATION_SAVED)?;
                Ok(summary)
            }
            Err(e @ BookingError::Conflict { .. }) => {
                self.sessions.take_draft(session)?;
                self.sessions.put_error(session, e.user_message())?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The just-committed reservation, shown once.
    pub fn summary(&self, session: SessionId) -> Result<Summary, FlowError> {
        match self.sessions.pop_summary(session)? {
            Some(summary) => Ok(summary),
            None => {
                tracing::warn!("summary requested with nothing in the session");
                self.sessions.put_error(session, NO_SUMMARY)?;
                Err(FlowError::NoSummary)
            }
        }
    }
}
