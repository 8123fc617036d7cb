#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentFilter, AppointmentType, CreateAppointmentRequest, SlotKey,
};
use appointment_cell::services::repository::{AppointmentRepository, InMemoryAppointmentRepository};
use appointment_cell::{BookingRules, RepositoryError, SlotBookingCoordinator};
use event_bus_cell::InMemoryEventBus;
use slot_lock_cell::{DistributedLockManager, InMemoryLockStore};

pub const TOPIC: &str = "appointment-events";

/// Delegates to the in-memory repository while counting every call.
#[derive(Default)]
pub struct CountingRepository {
    inner: InMemoryAppointmentRepository,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingRepository {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record_call(&self) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentRepository for CountingRepository {
    async fn find_conflicting(&self, slot: &SlotKey) -> Result<Option<Appointment>, RepositoryError> {
        self.record_call()?;
        self.inner.find_conflicting(slot).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        self.record_call()?;
        self.inner.insert(appointment).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
        self.record_call()?;
        self.inner.find_by_id(id).await
    }

    async fn save(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        self.record_call()?;
        self.inner.save(appointment).await
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepositoryError> {
        self.record_call()?;
        self.inner.list(filter).await
    }

    async fn find_active_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        self.record_call()?;
        self.inner.find_active_for_day(doctor_id, date).await
    }
}

pub struct Harness {
    pub coordinator: Arc<SlotBookingCoordinator>,
    pub repository: Arc<CountingRepository>,
    pub lock_store: Arc<InMemoryLockStore>,
    pub locks: DistributedLockManager,
    pub bus: Arc<InMemoryEventBus>,
}

pub fn harness() -> Harness {
    let repository = Arc::new(CountingRepository::default());
    let lock_store = Arc::new(InMemoryLockStore::new());
    let locks = DistributedLockManager::new(lock_store.clone());
    let bus = Arc::new(InMemoryEventBus::new());

    let coordinator = Arc::new(SlotBookingCoordinator::new(
        locks.clone(),
        repository.clone(),
        bus.clone(),
        BookingRules::default(),
        TOPIC,
    ));

    Harness {
        coordinator,
        repository,
        lock_store,
        locks,
        bus,
    }
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

pub fn time(raw: &str) -> chrono::NaiveTime {
    appointment_cell::models::parse_time_of_day(raw).unwrap()
}

pub fn booking_request(doctor_id: Uuid, start: &str, end: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        doctor_id: Some(doctor_id),
        patient_id: Some(Uuid::new_v4()),
        appointment_date: Some(date()),
        start_time: Some(time(start)),
        end_time: Some(time(end)),
        appointment_type: Some(AppointmentType::InPerson),
        reason: Some("Annual check-up".to_string()),
        notes: None,
    }
}
