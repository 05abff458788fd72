//! Reservation commit workflow and the admin operations that share its
//! data model.
//!
//! A commit runs `Received → Validated → AvailabilityConfirmed → Persisted →
//! NotificationQueued → Done`. The availability re-check and both inserts
//! happen under the room's advisory lock, so two overlapping requests for one
//! room can never both commit; the store's own overlap check is the backstop.

mod admin;
mod calendar;

pub use calendar::{BlockChanges, DayState, MonthCalendar, month_span};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::availability::AvailabilityEngine;
use crate::forms::{Form, FormErrors};
use crate::limits::*;
use crate::mail::{MailData, Mailer};
use crate::model::*;
use crate::store::{BookingStore, StoreError, bounded};

/// Typed booking input. Parsing raw form text into this is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ReservationRequest {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.start_date, self.end_date)
    }

    pub fn guest(&self) -> GuestDetails {
        GuestDetails {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    AvailabilityConfirmed,
    Persisted,
    NotificationQueued,
    Done,
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Bad input; nothing was written. `request` echoes a booking request
    /// back so the form can be re-shown as submitted.
    #[error("invalid input: {errors}")]
    Validation {
        errors: FormErrors,
        request: Option<Box<ReservationRequest>>,
    },

    #[error("room {room_id} is not available for {span}")]
    Conflict { room_id: RoomId, span: DateSpan },

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u64 },

    #[error("storage failure: {0}")]
    Storage(StoreError),

    /// A reservation row exists without its restriction and could not be
    /// rolled back. Needs manual reconciliation.
    #[error("reservation {reservation_id} persisted without its restriction")]
    Inconsistent { reservation_id: ReservationId },
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { what, id } => BookingError::NotFound { what, id },
            other => BookingError::Storage(other),
        }
    }
}

impl BookingError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation { .. } => "validation",
            BookingError::Conflict { .. } => "conflict",
            BookingError::NotFound { .. } => "not_found",
            BookingError::Storage(_) => "storage",
            BookingError::Inconsistent { .. } => "inconsistent",
        }
    }

    /// What an end user may be shown. Storage details never leak.
    pub fn user_message(&self) -> &'static str {
        match self {
            BookingError::Validation { .. } => "Please correct the errors in the form",
            BookingError::Conflict { .. } => "Sorry, the room is no longer available for those dates",
            BookingError::NotFound { .. } => "The requested item could not be found",
            BookingError::Storage(_) | BookingError::Inconsistent { .. } => {
                "Something went wrong, please try again later"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub store_timeout: Duration,
    pub mail_from: String,
    pub owner_email: String,
    /// Template file wrapped around guest confirmations, if any.
    pub mail_template: Option<String>,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(3),
            mail_from: "bookings@localhost".into(),
            owner_email: "owner@localhost".into(),
            mail_template: None,
        }
    }
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    availability: AvailabilityEngine,
    mailer: Mailer,
    settings: BookingSettings,
}

impl BookingService {
    pub fn new(store: Arc<dyn BookingStore>, mailer: Mailer, settings: BookingSettings) -> Self {
        let availability = AvailabilityEngine::new(store.clone(), settings.store_timeout);
        Self {
            store,
            availability,
            mailer,
            settings,
        }
    }

    pub fn availability(&self) -> &AvailabilityEngine {
        &self.availability
    }

    /// Validate, re-check availability, persist the reservation and its
    /// restriction, then queue the guest and owner mails.
    pub async fn commit(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.run_commit(request).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::COMMITS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::COMMIT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_commit(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        let room_id = request.room_id;
        let span = request.span();
        stage(Stage::Received, room_id, span);

        let room = self.validate(&request).await?;
        stage(Stage::Validated, room_id, span);

        let guest = request.guest();
        let reservation_id = {
            let _lock = self.call("lock_room", self.store.lock_room(room_id)).await?;

            if !self.availability.is_room_available(room_id, span).await? {
                tracing::warn!(room_id, %span, "room no longer available");
                return Err(BookingError::Conflict { room_id, span });
            }
            stage(Stage::AvailabilityConfirmed, room_id, span);

            let store = self.store.clone();
            let new = NewReservation {
                guest: guest.clone(),
                room_id,
                span,
            };
            let reservation_id = match self
                .detached("insert_reservation", async move { store.insert_reservation(new).await })
                .await
            {
                Write::Done(result) => result?,
                Write::Late(task) => {
                    tokio::spawn(roll_back_late_reservation(self.store.clone(), task, room_id, span));
                    return Err(BookingError::Storage(StoreError::Timeout {
                        op: "insert_reservation",
                    }));
                }
            };

            let store = self.store.clone();
            let restriction = NewRestriction::for_reservation(room_id, span, reservation_id);
            let failure = match self
                .detached("insert_restriction", async move { store.insert_restriction(restriction).await })
                .await
            {
                Write::Done(Ok(_)) => None,
                Write::Done(Err(e)) => Some(e),
                // The rollback below removes a restriction that already landed,
                // and one landing later is refused for its missing reservation.
                Write::Late(_) => Some(StoreError::Timeout {
                    op: "insert_restriction",
                }),
            };
            if let Some(e) = failure {
                return Err(self.compensate(reservation_id, room_id, span, e).await);
            }
            reservation_id
        };
        stage(Stage::Persisted, room_id, span);
        tracing::info!(reservation_id, room_id, %span, "reservation committed");

        let now = Utc::now();
        let reservation = Reservation {
            id: reservation_id,
            first_name: guest.first_name,
            last_name: guest.last_name,
            email: guest.email,
            phone: guest.phone,
            start_date: span.start,
            end_date: span.end,
            room_id,
            processed: false,
            created_at: now,
            updated_at: now,
            room: Some(room),
        };

        self.queue_notifications(&reservation);
        stage(Stage::NotificationQueued, room_id, span);
        stage(Stage::Done, room_id, span);
        Ok(reservation)
    }

    /// Field rules plus the room lookup. Returns the room on success.
    async fn validate(&self, request: &ReservationRequest) -> Result<Room, BookingError> {
        let mut errors = validate_request(request);
        let room = self.call("get_room", self.store.get_room(request.room_id)).await?;
        if room.is_none() {
            errors.add("room_id", "Please choose a room");
        }
        match room {
            Some(room) if errors.is_empty() => Ok(room),
            _ => {
                tracing::debug!(room_id = request.room_id, "booking rejected: {errors}");
                Err(BookingError::Validation {
                    errors,
                    request: Some(Box::new(request.clone())),
                })
            }
        }
    }

    /// Undo a reservation whose restriction insert failed.
    async fn compensate(
        &self,
        reservation_id: ReservationId,
        room_id: RoomId,
        span: DateSpan,
        cause: StoreError,
    ) -> BookingError {
        match self
            .call("delete_reservation", self.store.delete_reservation(reservation_id))
            .await
        {
            Ok(()) => match cause {
                StoreError::Overlap { existing, .. } => {
                    tracing::warn!(room_id, %span, existing, "restriction insert lost to an overlap, reservation rolled back");
                    BookingError::Conflict { room_id, span }
                }
                other => {
                    tracing::error!(room_id, %span, "restriction insert failed, reservation rolled back: {other}");
                    BookingError::Storage(other)
                }
            },
            Err(e) => {
                metrics::counter!(crate::observability::INCONSISTENCIES_TOTAL).increment(1);
                tracing::error!(
                    reservation_id,
                    room_id,
                    %span,
                    "reservation persisted without restriction; rollback failed: {e} (after: {cause})"
                );
                BookingError::Inconsistent { reservation_id }
            }
        }
    }

    fn queue_notifications(&self, reservation: &Reservation) {
        let room_name = reservation.room.as_ref().map(|r| r.name.as_str()).unwrap_or("your room");
        let guest_mail = MailData {
            to: reservation.email.clone(),
            from: self.settings.mail_from.clone(),
            subject: "Reservation Confirmation".into(),
            content: format!(
                "<strong>Reservation Confirmation</strong><br>Dear {}:<br>This is to confirm your reservation of the {} from {} to {}.",
                reservation.first_name, room_name, reservation.start_date, reservation.end_date
            ),
            template: self.settings.mail_template.clone(),
        };
        let owner_mail = MailData {
            to: self.settings.owner_email.clone(),
            from: self.settings.mail_from.clone(),
            subject: "Reservation Notification".into(),
            content: format!(
                "<strong>Reservation Notification</strong><br>A reservation has been made for the {} from {} to {}.",
                room_name, reservation.start_date, reservation.end_date
            ),
            template: None,
        };
        for msg in [guest_mail, owner_mail] {
            if let Err(e) = self.mailer.send(msg) {
                tracing::warn!(reservation_id = reservation.id, "could not queue mail: {e}");
            }
        }
    }

    /// One store call under the configured timeout. Failures other than the
    /// expected domain outcomes are logged with the operation name.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = bounded(op, self.settings.store_timeout, fut).await;
        if let Err(e) = &result {
            log_store_failure(op, e);
        }
        result
    }

    /// A store write on its own task. Timing out stops the wait but not the
    /// write, which is handed back so the caller can undo it once it lands.
    async fn detached<T, F>(&self, op: &'static str, fut: F) -> Write<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let mut task = tokio::spawn(fut);
        match tokio::time::timeout(self.settings.store_timeout, &mut task).await {
            Ok(joined) => {
                let result = joined.unwrap_or_else(|e| Err(StoreError::TaskFailed(e.to_string())));
                if let Err(e) = &result {
                    log_store_failure(op, e);
                }
                Write::Done(result)
            }
            Err(_) => {
                metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
                tracing::error!(op, "store write timed out, still running");
                Write::Late(task)
            }
        }
    }
}

enum Write<T> {
    Done(Result<T, StoreError>),
    Late(JoinHandle<Result<T, StoreError>>),
}

fn log_store_failure(op: &'static str, e: &StoreError) {
    if matches!(
        e,
        StoreError::Timeout { .. } | StoreError::Wal(_) | StoreError::LimitExceeded(_) | StoreError::TaskFailed(_)
    ) {
        tracing::error!(op, "store call failed: {e}");
    }
}

/// Wait out a reservation insert that outlived its timeout and delete the
/// row once it lands, so no reservation stands without its restriction.
async fn roll_back_late_reservation(
    store: Arc<dyn BookingStore>,
    task: JoinHandle<Result<ReservationId, StoreError>>,
    room_id: RoomId,
    span: DateSpan,
) {
    let Ok(Ok(reservation_id)) = task.await else {
        return;
    };
    match store.delete_reservation(reservation_id).await {
        Ok(()) => tracing::warn!(reservation_id, room_id, %span, "late reservation insert rolled back"),
        Err(e) => {
            metrics::counter!(crate::observability::INCONSISTENCIES_TOTAL).increment(1);
            tracing::error!(
                reservation_id,
                room_id,
                %span,
                "late reservation persisted without restriction; rollback failed: {e}"
            );
        }
    }
}

fn stage(stage: Stage, room_id: RoomId, span: DateSpan) {
    tracing::debug!(?stage, room_id, %span, "booking stage");
}

/// Name and contact rules shared by booking and the admin guest edit.
fn guest_form(guest: &GuestDetails) -> Form {
    let mut form = Form::new([
        ("first_name", guest.first_name.as_str()),
        ("last_name", guest.last_name.as_str()),
        ("email", guest.email.as_str()),
        ("phone", guest.phone.as_str()),
    ]);
    form.required(&["first_name", "last_name", "email"])
        .min_length("first_name", 3)
        .is_email("email")
        .max_length("first_name", MAX_NAME_LEN)
        .max_length("last_name", MAX_NAME_LEN)
        .max_length("email", MAX_EMAIL_LEN)
        .max_length("phone", MAX_PHONE_LEN);
    form
}

/// Every field rule of a booking request except the room lookup.
pub fn validate_request(request: &ReservationRequest) -> FormErrors {
    let mut form = guest_form(&request.guest());
    let span = request.span();
    form.check(!span.is_empty(), "end_date", "Departure must be after arrival");
    form.check(
        span.nights() <= MAX_STAY_NIGHTS,
        "end_date",
        "Stays are limited to one year",
    );
    form.into_errors()
}

pub fn validate_guest(guest: &GuestDetails) -> FormErrors {
    guest_form(guest).into_errors()
}
