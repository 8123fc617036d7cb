use thiserror::Error;
use uuid::Uuid;

use shared_database::SupabaseError;
use shared_models::error::AppError;
use slot_lock_cell::LockError;

use crate::models::AppointmentStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Another request holds the slot lease right now.
    SlotBeingBooked,
    /// An active appointment already occupies the slot.
    SlotAlreadyBooked,
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// The record changed between read and write.
    ConcurrentModification,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::SlotBeingBooked => write!(f, "slot currently being booked"),
            ConflictReason::SlotAlreadyBooked => write!(f, "slot already booked"),
            ConflictReason::IllegalTransition { from, to } => {
                write!(f, "cannot transition from {} to {}", from, to)
            }
            ConflictReason::ConcurrentModification => {
                write!(f, "appointment was modified concurrently")
            }
        }
    }
}

/// Outcome kinds surfaced to callers of the booking coordinator.
#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    /// Lock store, repository or broker unreachable. Safe to retry the whole call.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BookingError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::Conflict(_))
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("An active appointment already occupies this slot")]
    UniqueViolation,

    #[error("Appointment {id} is no longer at version {expected}")]
    VersionMismatch { id: Uuid, expected: u64 },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SupabaseError> for RepositoryError {
    fn from(e: SupabaseError) -> Self {
        if e.status() == Some(reqwest::StatusCode::CONFLICT) {
            return RepositoryError::UniqueViolation;
        }
        RepositoryError::Backend(e.to_string())
    }
}

impl From<RepositoryError> for BookingError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::UniqueViolation => BookingError::Conflict(ConflictReason::SlotAlreadyBooked),
            RepositoryError::VersionMismatch { .. } => {
                BookingError::Conflict(ConflictReason::ConcurrentModification)
            }
            RepositoryError::Backend(msg) => BookingError::Infrastructure(format!("repository: {}", msg)),
            RepositoryError::Serialization(e) => BookingError::Infrastructure(format!("repository: {}", e)),
        }
    }
}

impl From<LockError> for BookingError {
    fn from(e: LockError) -> Self {
        match e {
            // A bad lease is a configuration mistake, still fatal to the call.
            LockError::InvalidLease(lease) => {
                BookingError::Infrastructure(format!("lock store: invalid lease {:?}", lease))
            }
            other => BookingError::Infrastructure(format!("lock store: {}", other)),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::Conflict(
                reason @ (ConflictReason::SlotBeingBooked | ConflictReason::SlotAlreadyBooked),
            ) => AppError::Conflict(format!(
                "Slot currently unavailable, choose another ({})",
                reason
            )),
            BookingError::Conflict(reason) => AppError::Conflict(format!(
                "Appointment cannot be changed from its current state ({})",
                reason
            )),
            BookingError::NotFound(id) => AppError::NotFound(format!("Appointment {} not found", id)),
            BookingError::Infrastructure(msg) => {
                AppError::ServiceUnavailable(format!("Temporary failure, please retry: {}", msg))
            }
        }
    }
}
