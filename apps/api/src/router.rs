use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, SlotBookingCoordinator};

pub fn create_router(coordinator: Arc<SlotBookingCoordinator>) -> Router {
    Router::new()
        .route("/", get(|| async { "Slot booking API is running!" }))
        .nest("/appointments", appointment_routes(coordinator))
}
