pub mod auth;
pub mod parcel;
pub mod payment;
pub mod rider;
pub mod token;
pub mod user;

use axum::{routing, Router};

use crate::app::AppState;

pub const LIVENESS_MESSAGE: &str = "Profast Delivery service is running";

pub async fn liveness() -> &'static str {
    LIVENESS_MESSAGE
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", routing::get(liveness))
        .route("/users", routing::post(user::sign_in))
        .route("/users/search", routing::get(user::search))
        .route(
            "/users/:id/role",
            routing::get(user::role).patch(user::update_role),
        )
        .route("/parcels", routing::get(parcel::index))
        .route(
            "/parcels/:id",
            routing::get(parcel::show).delete(parcel::delete),
        )
        .route("/add-parcel", routing::post(parcel::create))
        .route(
            "/parcels/status/:tracking_id",
            routing::patch(parcel::update_status),
        )
        .route(
            "/parcels/:id/assign-rider",
            routing::patch(parcel::assign_rider),
        )
        .route(
            "/rider/assigned-parcel",
            routing::get(parcel::assigned_to_rider),
        )
        .route(
            "/payments",
            routing::get(payment::index).post(payment::create),
        )
        .route(
            "/create-payment-intent",
            routing::post(payment::create_intent),
        )
        .route("/add-riders", routing::post(rider::apply))
        .route("/riders/pending", routing::get(rider::pending))
        .route("/riders/active", routing::get(rider::active))
        .route("/riders/available", routing::get(rider::available))
        .route("/rider/:id/status", routing::patch(rider::update_status))
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
