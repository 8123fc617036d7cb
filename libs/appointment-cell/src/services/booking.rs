use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use event_bus_cell::{EventEnvelope, EventPublisher, LogicalClock, PublishError};
use shared_config::AppConfig;
use slot_lock_cell::{DistributedLockManager, DEFAULT_LEASE};

use crate::error::{BookingError, ConflictReason};
use crate::models::{
    Appointment, AppointmentEventType, AppointmentFilter, AppointmentStatus, AvailableSlots,
    BookingOutcome, CreateAppointmentRequest, SlotKey, UpdateAppointmentRequest,
};
use crate::services::availability::SlotGrid;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::repository::AppointmentRepository;

/// Lease length and the bookable grid.
#[derive(Debug, Clone)]
pub struct BookingRules {
    pub lease: Duration,
    pub grid: SlotGrid,
}

impl BookingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lease: Duration::from_secs(config.booking_lock_lease_seconds),
            grid: SlotGrid::new(
                config.clinic_opening_time,
                config.clinic_closing_time,
                config.slot_duration_minutes,
            ),
        }
    }
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            grid: SlotGrid::default(),
        }
    }
}

/// The only writer of appointment records.
///
/// Creation runs under a per-slot lease; transitions rely on the repository's
/// version check instead. Every committed change is announced on one topic,
/// keyed by appointment id, after the write. A failed announcement does not
/// undo the write and is returned alongside the record.
pub struct SlotBookingCoordinator {
    locks: DistributedLockManager,
    repository: Arc<dyn AppointmentRepository>,
    publisher: Arc<dyn EventPublisher>,
    lifecycle: AppointmentLifecycleService,
    clock: LogicalClock,
    rules: BookingRules,
    topic: String,
}

impl SlotBookingCoordinator {
    pub fn new(
        locks: DistributedLockManager,
        repository: Arc<dyn AppointmentRepository>,
        publisher: Arc<dyn EventPublisher>,
        rules: BookingRules,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            locks,
            repository,
            publisher,
            lifecycle: AppointmentLifecycleService::new(),
            clock: LogicalClock::new(),
            rules,
            topic: topic.into(),
        }
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    #[instrument(skip(self, request), fields(doctor_id = ?request.doctor_id, date = ?request.appointment_date))]
    pub async fn create(&self, request: CreateAppointmentRequest) -> Result<BookingOutcome, BookingError> {
        let draft = self.build_appointment(request)?;
        let slot = draft.slot();
        let lock_key = slot.lock_key();

        let Some(lease) = self.locks.try_lease(&lock_key, self.rules.lease).await? else {
            info!("Slot {} is being booked by another request", lock_key);
            return Err(BookingError::Conflict(ConflictReason::SlotBeingBooked));
        };

        let inserted = self.insert_if_free(&slot, draft).await;
        lease.release().await;
        let appointment = inserted?;

        info!(
            "Appointment {} booked for doctor {} on {} at {}",
            appointment.id, appointment.doctor_id, appointment.appointment_date, appointment.start_time
        );

        let publish_error = self.announce(AppointmentEventType::Created, &appointment).await;
        Ok(BookingOutcome {
            appointment,
            publish_error,
        })
    }

    async fn insert_if_free(&self, slot: &SlotKey, draft: Appointment) -> Result<Appointment, BookingError> {
        if let Some(existing) = self.repository.find_conflicting(slot).await? {
            info!("Slot {} already taken by appointment {}", slot.lock_key(), existing.id);
            return Err(BookingError::Conflict(ConflictReason::SlotAlreadyBooked));
        }

        Ok(self.repository.insert(draft).await?)
    }

    fn build_appointment(&self, request: CreateAppointmentRequest) -> Result<Appointment, BookingError> {
        let mut missing = Vec::new();
        if request.doctor_id.is_none() {
            missing.push("doctor_id");
        }
        if request.patient_id.is_none() {
            missing.push("patient_id");
        }
        if request.appointment_date.is_none() {
            missing.push("appointment_date");
        }
        if request.start_time.is_none() {
            missing.push("start_time");
        }
        if request.end_time.is_none() {
            missing.push("end_time");
        }
        if request.appointment_type.is_none() {
            missing.push("appointment_type");
        }

        let (
            Some(doctor_id),
            Some(patient_id),
            Some(appointment_date),
            Some(start_time),
            Some(end_time),
            Some(appointment_type),
        ) = (
            request.doctor_id,
            request.patient_id,
            request.appointment_date,
            request.start_time,
            request.end_time,
            request.appointment_type,
        )
        else {
            return Err(BookingError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        };

        if end_time <= start_time {
            return Err(BookingError::Validation(
                "end_time must be after start_time".to_string(),
            ));
        }

        let grid = &self.rules.grid;
        if !grid.contains(start_time) {
            return Err(BookingError::Validation(format!(
                "start_time {} is not a bookable slot ({}-minute slots from {} to {})",
                start_time.format("%H:%M:%S"),
                grid.slot_minutes,
                grid.opening.format("%H:%M"),
                grid.closing.format("%H:%M")
            )));
        }

        let now = Utc::now();
        Ok(Appointment {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id,
            appointment_date,
            start_time,
            end_time,
            appointment_type,
            status: AppointmentStatus::Scheduled,
            reason: request.reason,
            notes: request.notes,
            cancellation_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn confirm(&self, id: Uuid) -> Result<BookingOutcome, BookingError> {
        self.transition(id, AppointmentStatus::Confirmed, AppointmentEventType::Confirmed, None)
            .await
    }

    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<BookingOutcome, BookingError> {
        self.transition(id, AppointmentStatus::Cancelled, AppointmentEventType::Cancelled, reason)
            .await
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, id: Uuid) -> Result<BookingOutcome, BookingError> {
        self.transition(id, AppointmentStatus::Completed, AppointmentEventType::Completed, None)
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        target: AppointmentStatus,
        event_type: AppointmentEventType,
        cancellation_reason: Option<String>,
    ) -> Result<BookingOutcome, BookingError> {
        let current = self.get(id).await?;
        self.lifecycle.validate_status_transition(current.status, target)?;

        let mut next = current;
        next.status = target;
        next.updated_at = Utc::now();
        if target == AppointmentStatus::Cancelled {
            next.cancellation_reason = cancellation_reason;
        }

        let appointment = self.repository.save(next).await.map_err(|e| {
            debug!("Transition of {} to {} lost: {}", id, target, e);
            BookingError::from(e)
        })?;
        info!("Appointment {} is now {}", appointment.id, appointment.status);

        let publish_error = self.announce(event_type, &appointment).await;
        Ok(BookingOutcome {
            appointment,
            publish_error,
        })
    }

    /// Edits free-text fields only. Status and slot are never touched here.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: UpdateAppointmentRequest) -> Result<BookingOutcome, BookingError> {
        if patch.is_empty() {
            return Err(BookingError::Validation("No fields to update".to_string()));
        }

        let mut next = self.get(id).await?;
        if let Some(reason) = patch.reason {
            next.reason = Some(reason);
        }
        if let Some(notes) = patch.notes {
            next.notes = Some(notes);
        }
        next.updated_at = Utc::now();

        let appointment = self.repository.save(next).await?;
        debug!("Appointment {} updated", appointment.id);

        let publish_error = self.announce(AppointmentEventType::Updated, &appointment).await;
        Ok(BookingOutcome {
            appointment,
            publish_error,
        })
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, id: Uuid) -> Result<Appointment, BookingError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    pub async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, BookingError> {
        Ok(self.repository.list(filter).await?)
    }

    /// Advisory snapshot of free grid slots; takes no lock.
    #[instrument(skip(self))]
    pub async fn available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<AvailableSlots, BookingError> {
        let booked = self.repository.find_active_for_day(doctor_id, date).await?;
        let slots = self.rules.grid.free_slots(&booked);

        debug!("{} free slots for doctor {} on {}", slots.len(), doctor_id, date);
        Ok(AvailableSlots {
            doctor_id,
            date,
            slots,
        })
    }

    // ==========================================================================
    // EVENTS
    // ==========================================================================

    async fn announce(&self, event_type: AppointmentEventType, appointment: &Appointment) -> Option<PublishError> {
        let result = match serde_json::to_value(appointment) {
            Ok(payload) => {
                let event = EventEnvelope::new(
                    self.topic.as_str(),
                    appointment.id.to_string(),
                    event_type.as_str(),
                    payload,
                    &self.clock,
                );
                self.publisher.publish(&self.topic, &event).await
            }
            Err(e) => Err(PublishError::from(e)),
        };

        match result {
            Ok(()) => {
                debug!("Published {} for appointment {}", event_type, appointment.id);
                None
            }
            Err(e) => {
                error!(
                    "Appointment {} committed but {} was not published: {}",
                    appointment.id, event_type, e
                );
                Some(e)
            }
        }
    }
}
