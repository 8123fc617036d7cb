use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AppointmentFilter, BookingOutcome, CancelAppointmentRequest, CreateAppointmentRequest,
    UpdateAppointmentRequest,
};
use crate::services::booking::SlotBookingCoordinator;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

/// Committed writes always report `success`; `event_published` tells the
/// caller whether downstream consumers were notified.
fn outcome_body(outcome: BookingOutcome, message: &str) -> Json<Value> {
    let event_published = outcome.event_published();
    Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "event_published": event_published,
        "publish_error": outcome.publish_error.map(|e| e.to_string()),
        "message": message,
    }))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(request) = payload?;
    let outcome = coordinator.create(request).await?;
    Ok((StatusCode::CREATED, outcome_body(outcome, "Appointment booked successfully")))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<Value>, AppError> {
    let appointments = coordinator.list(&filter).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = coordinator.get(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<UpdateAppointmentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload?;
    let outcome = coordinator.update(appointment_id, request).await?;
    Ok(outcome_body(outcome, "Appointment updated successfully"))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Option<Json<CancelAppointmentRequest>>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    // The body is optional; a request without one cancels with no reason.
    let reason = payload?.and_then(|Json(request)| request.reason);
    let outcome = coordinator.cancel(appointment_id, reason).await?;
    Ok(outcome_body(outcome, "Appointment cancelled successfully"))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let outcome = coordinator.confirm(appointment_id).await?;
    Ok(outcome_body(outcome, "Appointment confirmed"))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let outcome = coordinator.complete(appointment_id).await?;
    Ok(outcome_body(outcome, "Appointment completed"))
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(coordinator): State<Arc<SlotBookingCoordinator>>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let available = coordinator.available_slots(query.doctor_id, query.date).await?;
    Ok(Json(json!(available)))
}
