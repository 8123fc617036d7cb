use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use event_bus_cell::PublishError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Bumped on every write; `save` only succeeds against the version it read.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> SlotKey {
        SlotKey {
            doctor_id: self.doctor_id,
            appointment_date: self.appointment_date,
            start_time: self.start_time,
        }
    }

    /// Whether this record counts against slot uniqueness.
    pub fn holds_slot(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Scheduled and confirmed appointments occupy their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentType {
    #[serde(alias = "in_person")]
    InPerson,
    #[serde(alias = "telemedicine", alias = "video")]
    Teleconsultation,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InPerson => write!(f, "in-person"),
            AppointmentType::Teleconsultation => write!(f, "teleconsultation"),
        }
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

/// A bookable unit: one doctor, one date, one start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
}

impl SlotKey {
    pub fn lock_key(&self) -> String {
        format!(
            "appointment:lock:{}:{}:{}",
            self.doctor_id,
            self.appointment_date.format("%Y-%m-%d"),
            self.start_time.format("%H:%M:%S")
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AvailableSlots {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_times")]
    pub slots: Vec<NaiveTime>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Fields are optional here so that missing ones surface as a validation
/// error naming them rather than as a generic deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    pub end_time: Option<NaiveTime>,
    pub appointment_type: Option<AppointmentType>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Only free-text fields may be edited; status and slot changes go through
/// the dedicated operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAppointmentRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn is_empty(&self) -> bool {
        self.reason.is_none() && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self.date.map_or(true, |date| appointment.appointment_date == date)
    }
}

// ==============================================================================
// OUTCOMES AND EVENTS
// ==============================================================================

/// Result of a committed write. The record is durable regardless of
/// `publish_error`; a populated error means consumers never saw the change.
#[derive(Debug)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub publish_error: Option<PublishError>,
}

impl BookingOutcome {
    pub fn event_published(&self) -> bool {
        self.publish_error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentEventType {
    Created,
    Updated,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentEventType::Created => "appointment.created",
            AppointmentEventType::Updated => "appointment.updated",
            AppointmentEventType::Confirmed => "appointment.confirmed",
            AppointmentEventType::Cancelled => "appointment.cancelled",
            AppointmentEventType::Completed => "appointment.completed",
        }
    }
}

impl fmt::Display for AppointmentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// TIME FORMATS
// ==============================================================================

/// Accepts `HH:MM` as well as `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn deserialize_optional_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_time_of_day(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {}", raw))),
    }
}

fn serialize_times<S>(times: &[NaiveTime], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(times.iter().map(|t| t.format("%H:%M").to_string()))
}
