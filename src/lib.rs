pub mod analytics;
pub mod auth;
pub mod channels;
pub mod config;
pub mod files;
pub mod kb;
pub mod notifications;
pub mod routines;
pub mod seed;
pub mod shared;
pub mod shifts;
pub mod tickets;

use axum::Router;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::shared::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(auth::configure_auth_routes())
        .merge(tickets::configure_tickets_routes())
        .merge(tickets::public::configure_public_routes())
        .merge(analytics::configure_analytics_routes())
        .merge(routines::configure_routines_routes())
        .merge(kb::configure_kb_routes())
        .merge(shifts::configure_shifts_routes())
        .merge(notifications::configure_notifications_routes())
        .merge(channels::configure_channels_routes())
        .merge(files::configure_files_routes())
        .nest_service("/uploads", ServeDir::new(&state.config.uploads.dir))
        .layer(CookieManagerLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
