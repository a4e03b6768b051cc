//! Anonymous quick-report entry point. Walk-up reporters (freelancers,
//! guests without accounts) file urgent issues from a kiosk form; the
//! report lands in the same queue as authenticated tickets.

use axum::{
    extract::{ConnectInfo, State},
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{
    validate_category, Location, User, UserRole, TICKET_CATEGORIES,
};
use crate::shared::schema::users;
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"))
}

#[derive(Debug, Deserialize)]
pub struct QuickReportRequest {
    pub reporter_name: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub category: String,
    pub subject: String,
    pub description: String,
    pub urgency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuickReportResponse {
    pub ticket_id: Uuid,
    pub ticket_number: i64,
}

/// Field checks for the kiosk form. All failures are reported at once so
/// the reporter fixes the form in one pass.
fn validate_report(req: &QuickReportRequest) -> Vec<String> {
    let mut errors = Vec::new();
    if req.reporter_name.trim().chars().count() < 2 {
        errors.push("name must be at least 2 characters".to_string());
    }
    if !email_regex().is_match(req.email.trim()) {
        errors.push("email address is not valid".to_string());
    }
    let digits = req.phone.chars().filter(char::is_ascii_digit).count();
    if !(10..=15).contains(&digits) {
        errors.push("phone must contain 10 to 15 digits".to_string());
    }
    if req.subject.trim().chars().count() < 5 {
        errors.push("subject must be at least 5 characters".to_string());
    }
    if req.description.trim().chars().count() < 10 {
        errors.push("description must be at least 10 characters".to_string());
    }
    if req.location.parse::<Location>().is_err() {
        errors.push(format!("unrecognized location: {}", req.location));
    }
    if let Err(e) = validate_category(&req.category) {
        errors.push(e);
    }
    errors
}

/// Finds the guest account for this email or creates one. Guests are
/// CONSUMER users that cannot log in (random password).
fn upsert_guest(conn: &mut PgConnection, email: &str, name: &str) -> Result<User, AppError> {
    let email = email.trim().to_lowercase();
    if let Some(existing) = users::table
        .filter(users::email.eq(&email))
        .first::<User>(conn)
        .optional()?
    {
        return Ok(existing);
    }

    let now = chrono::Utc::now();
    let guest = User {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&Uuid::new_v4().to_string()),
        full_name: name.trim().to_string(),
        role: UserRole::Consumer,
        avatar_url: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(users::table)
        .values(&guest)
        .execute(conn)?;
    Ok(guest)
}

pub async fn quick_report(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<QuickReportRequest>,
) -> AppResult<Json<QuickReportResponse>> {
    let errors = validate_report(&req);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors.join("; ")));
    }

    if !state.report_limiter.check(&addr.ip().to_string()).await {
        return Err(AppError::Validation(
            "too many reports from this address, try again later".to_string(),
        ));
    }

    // Contact details ride along in the description since guests have no
    // reachable account.
    let description = format!(
        "{}\n\nReported by: {} ({}, {})",
        req.description.trim(),
        req.reporter_name.trim(),
        req.email.trim(),
        req.phone.trim()
    );
    let location: Location = req.location.parse().map_err(AppError::Validation)?;
    let priority = super::map_urgency(req.urgency.as_deref());

    let ticket = with_conn(&state.conn, move |conn| {
        let guest = upsert_guest(conn, &req.email, &req.reporter_name)?;
        super::insert_ticket(
            conn,
            guest.id,
            location,
            priority,
            req.category,
            req.subject.trim().to_string(),
            description,
            None,
        )
    })
    .await?;

    super::notify_new_ticket(&state, &ticket, "Quick Report");
    log::info!(
        "quick report #{} filed from {} ({})",
        ticket.ticket_number,
        addr.ip(),
        ticket.priority
    );
    Ok(Json(QuickReportResponse {
        ticket_id: ticket.id,
        ticket_number: ticket.ticket_number,
    }))
}

/// Form metadata for the kiosk page.
pub async fn report_options() -> Json<serde_json::Value> {
    let locations: Vec<&str> = [
        Location::Studio1,
        Location::Studio2,
        Location::Mcr,
        Location::EditingRoom,
        Location::Office,
        Location::ObVan,
    ]
    .iter()
    .map(Location::as_str)
    .collect();
    Json(serde_json::json!({
        "locations": locations,
        "categories": TICKET_CATEGORIES,
    }))
}

pub fn configure_public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/public/report", post(quick_report))
        .route("/api/public/report/options", get(report_options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> QuickReportRequest {
        QuickReportRequest {
            reporter_name: "Budi Santoso".to_string(),
            email: "budi@example.com".to_string(),
            phone: "081234567890".to_string(),
            location: "STUDIO_1".to_string(),
            category: "AUDIO".to_string(),
            subject: "Mic channel 2 dead".to_string(),
            description: "No signal on channel 2 since rehearsal".to_string(),
            urgency: Some("ON_AIR_EMERGENCY".to_string()),
        }
    }

    #[test]
    fn valid_report_passes() {
        assert!(validate_report(&valid_request()).is_empty());
    }

    #[test]
    fn all_field_errors_reported_at_once() {
        let req = QuickReportRequest {
            reporter_name: "B".to_string(),
            email: "not-an-email".to_string(),
            phone: "123".to_string(),
            location: "ROOFTOP".to_string(),
            category: "CATERING".to_string(),
            subject: "hi".to_string(),
            description: "short".to_string(),
            urgency: None,
        };
        let errors = validate_report(&req);
        assert_eq!(errors.len(), 7);
    }

    #[test]
    fn phone_accepts_formatting_characters() {
        let mut req = valid_request();
        req.phone = "+62 812-3456-7890".to_string();
        assert!(validate_report(&req).is_empty());
    }
}
