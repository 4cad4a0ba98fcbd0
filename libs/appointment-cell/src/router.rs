// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use availability_cell::{AvailabilityService, SchedulingRules, SlotService};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{AppointmentLifecycleService, AppointmentQueryService, BookingService, NotificationFanout};
use crate::store::{AccountDirectory, AppointmentStore};

/// Services shared by every scheduling handler.
#[derive(Clone)]
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService<dyn AppointmentStore>>,
    pub slots: Arc<SlotService<dyn AppointmentStore>>,
    pub booking: Arc<BookingService>,
    pub lifecycle: Arc<AppointmentLifecycleService>,
    pub queries: Arc<AppointmentQueryService>,
}

impl SchedulingState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn AppointmentStore>,
        accounts: Arc<dyn AccountDirectory>,
        fanout: NotificationFanout,
    ) -> Self {
        let rules = SchedulingRules::from_config(&config);
        let booking = BookingService::new(Arc::clone(&store), accounts, fanout, rules.clone());

        Self {
            availability: Arc::new(AvailabilityService::new(Arc::clone(&store), rules.clone())),
            slots: booking.slots(),
            lifecycle: booking.lifecycle(),
            queries: Arc::new(AppointmentQueryService::new(store, rules)),
            booking: Arc::new(booking),
            config,
        }
    }
}

pub fn scheduling_routes(state: SchedulingState) -> Router {
    // Every scheduling operation requires an authenticated clinic actor
    let protected_routes = Router::new()
        // Availability templates
        .route("/doctors/{doctor_id}/availability", get(handlers::get_template))
        .route("/doctors/{doctor_id}/availability/rules", put(handlers::set_weekly_rules))
        .route("/doctors/{doctor_id}/availability/exceptions", post(handlers::add_exception))
        .route("/doctors/{doctor_id}/availability/slot-duration", put(handlers::set_slot_duration))
        .route("/doctors/{doctor_id}/availability/preview", get(handlers::preview_availability))

        // Materialized slots
        .route("/doctors/{doctor_id}/slots", get(handlers::list_slots).post(handlers::create_slot))
        .route("/doctors/{doctor_id}/slots/materialize", post(handlers::materialize_slots))
        .route("/slots/{slot_id}", get(handlers::get_slot))
        .route("/slots/{slot_id}/withdraw", post(handlers::withdraw_slot))

        // Booking and lifecycle
        .route("/appointments", get(handlers::list_my_appointments).post(handlers::book_interval))
        .route("/appointments/book-slot", post(handlers::book_slot))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/status", patch(handlers::update_status))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))

        // Listings
        .route("/doctors/{doctor_id}/appointments", get(handlers::get_doctor_appointments))
        .route("/patients/{patient_id}/appointments", get(handlers::get_patient_appointments))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
