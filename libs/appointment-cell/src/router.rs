use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::booking::SlotBookingCoordinator;

pub fn appointment_routes(coordinator: Arc<SlotBookingCoordinator>) -> Router {
    Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/slots/available", get(handlers::get_available_slots))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).patch(handlers::update_appointment),
        )
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .with_state(coordinator)
}
