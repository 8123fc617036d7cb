pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{BookingError, ConflictReason, RepositoryError};
pub use router::appointment_routes;
pub use services::availability::SlotGrid;
pub use services::booking::{BookingRules, SlotBookingCoordinator};
pub use services::lifecycle::AppointmentLifecycleService;
pub use services::repository::{
    AppointmentRepository, InMemoryAppointmentRepository, SupabaseAppointmentRepository,
};
