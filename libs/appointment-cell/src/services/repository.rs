use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::RepositoryError;
use crate::models::{Appointment, AppointmentFilter, SlotKey};

/// Durable storage for appointment records.
///
/// Records are never deleted. `save` is a compare-and-swap on `version`.
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Active (scheduled or confirmed) appointment occupying `slot`, if any.
    async fn find_conflicting(&self, slot: &SlotKey) -> Result<Option<Appointment>, RepositoryError>;

    /// Stores a new record. Fails with `UniqueViolation` if an active record
    /// already holds the same slot.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, RepositoryError>;

    /// Writes `appointment` only if the stored version still equals
    /// `appointment.version`; the stored copy gets the next version.
    async fn save(&self, appointment: Appointment) -> Result<Appointment, RepositoryError>;

    /// Matching records ordered by date then start time.
    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepositoryError>;

    async fn find_active_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError>;
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

/// Process-local repository for development and tests.
#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    records: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_by_slot(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| {
        (a.appointment_date, a.start_time, a.created_at).cmp(&(b.appointment_date, b.start_time, b.created_at))
    });
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn find_conflicting(&self, slot: &SlotKey) -> Result<Option<Appointment>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|a| a.holds_slot() && a.slot() == *slot)
            .cloned())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let mut records = self.records.write().await;

        let slot = appointment.slot();
        if appointment.holds_slot() && records.values().any(|a| a.holds_slot() && a.slot() == slot) {
            return Err(RepositoryError::UniqueViolation);
        }
        if records.contains_key(&appointment.id) {
            return Err(RepositoryError::Backend(format!("duplicate id {}", appointment.id)));
        }

        records.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn save(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let mut records = self.records.write().await;

        let mismatch = RepositoryError::VersionMismatch {
            id: appointment.id,
            expected: appointment.version,
        };
        let Some(stored) = records.get_mut(&appointment.id) else {
            return Err(mismatch);
        };
        if stored.version != appointment.version {
            return Err(mismatch);
        }

        let mut next = appointment;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepositoryError> {
        let mut matching: Vec<Appointment> = self
            .records
            .read()
            .await
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        sort_by_slot(&mut matching);
        Ok(matching)
    }

    async fn find_active_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let mut active: Vec<Appointment> = self
            .records
            .read()
            .await
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.appointment_date == date && a.holds_slot())
            .cloned()
            .collect();
        sort_by_slot(&mut active);
        Ok(active)
    }
}

// ==============================================================================
// SUPABASE (POSTGREST)
// ==============================================================================

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const ACTIVE_STATUSES: &str = "in.(scheduled,confirmed)";
const RETURN_REPRESENTATION: (&str, &str) = ("prefer", "return=representation");

/// Repository over the `appointments` table. Slot uniqueness on insert is
/// backed by a partial unique index on active rows; PostgREST reports a
/// violation as HTTP 409.
pub struct SupabaseAppointmentRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: String) -> Result<Vec<Appointment>, RepositoryError> {
        let path = format!("{}?{}", APPOINTMENTS_PATH, query);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows)
    }
}

#[async_trait]
impl AppointmentRepository for SupabaseAppointmentRepository {
    async fn find_conflicting(&self, slot: &SlotKey) -> Result<Option<Appointment>, RepositoryError> {
        let query = format!(
            "doctor_id=eq.{}&appointment_date=eq.{}&start_time=eq.{}&status={}&limit=1",
            slot.doctor_id,
            slot.appointment_date,
            slot.start_time.format("%H:%M:%S"),
            ACTIVE_STATUSES
        );
        Ok(self.select(query).await?.into_iter().next())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let body = serde_json::to_value(&appointment)?;
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::POST, APPOINTMENTS_PATH, Some(body), &[RETURN_REPRESENTATION])
            .await?;

        debug!("Inserted appointment {}", appointment.id);
        rows.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::Backend("insert returned no rows".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
        Ok(self.select(format!("id=eq.{}", id)).await?.into_iter().next())
    }

    async fn save(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let path = format!(
            "{}?id=eq.{}&version=eq.{}",
            APPOINTMENTS_PATH, appointment.id, appointment.version
        );
        let body = json!({
            "status": appointment.status,
            "reason": appointment.reason,
            "notes": appointment.notes,
            "cancellation_reason": appointment.cancellation_reason,
            "version": appointment.version + 1,
            "updated_at": Utc::now(),
        });

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(body), &[RETURN_REPRESENTATION])
            .await?;

        // Zero rows means the version filter no longer matched.
        rows.into_iter().next().ok_or(RepositoryError::VersionMismatch {
            id: appointment.id,
            expected: appointment.version,
        })
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepositoryError> {
        let mut params = Vec::new();
        if let Some(patient_id) = filter.patient_id {
            params.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = filter.doctor_id {
            params.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = filter.status {
            params.push(format!("status=eq.{}", status));
        }
        if let Some(date) = filter.date {
            params.push(format!("appointment_date=eq.{}", date));
        }
        params.push("order=appointment_date.asc,start_time.asc".to_string());

        self.select(params.join("&")).await
    }

    async fn find_active_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let query = format!(
            "doctor_id=eq.{}&appointment_date=eq.{}&status={}&order=start_time.asc",
            doctor_id, date, ACTIVE_STATUSES
        );
        self.select(query).await
    }
}
