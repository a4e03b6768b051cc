//! Shift rota. Wall-clock inputs (forms and CSV imports) are interpreted
//! in the reporting timezone and stored as UTC.

use axum::{
    extract::{Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Shift, UserRole};
use crate::shared::schema::{shifts, users};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

/// datetime-local form inputs.
const FORM_LAYOUT: &str = "%Y-%m-%dT%H:%M";
/// CSV exports from the old spreadsheet rota.
const CSV_LAYOUT: &str = "%Y-%m-%d %H:%M";

fn parse_local(value: &str, layout: &str, tz: FixedOffset) -> Result<DateTime<Utc>, AppError> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), layout)
        .map_err(|_| AppError::Validation(format!("unparseable time: {value}")))?;
    naive
        .and_local_timezone(tz)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation(format!("unparseable time: {value}")))
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), AppError> {
    if end <= start {
        Err(AppError::Validation(
            "shift must end after it starts".to_string(),
        ))
    } else {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateShiftRequest {
    pub user_id: Uuid,
    pub label: String,
    /// Local wall-clock, `YYYY-MM-DDTHH:MM`.
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct ShiftView {
    #[serde(flatten)]
    pub shift: Shift,
    pub user_name: String,
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<String>,
}

pub async fn create_shift(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateShiftRequest>,
) -> AppResult<Json<Shift>> {
    actor.require(UserRole::Manager)?;
    let tz = state.config.report_tz();
    let start = parse_local(&req.start_time, FORM_LAYOUT, tz)?;
    let end = parse_local(&req.end_time, FORM_LAYOUT, tz)?;
    check_window(start, end)?;
    if req.label.trim().is_empty() {
        return Err(AppError::Validation("label is required".to_string()));
    }

    let shift = Shift {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        start_time: start,
        end_time: end,
        label: req.label.trim().to_string(),
    };
    let shift = with_conn(&state.conn, move |conn| {
        let known: i64 = users::table
            .filter(users::id.eq(req.user_id))
            .filter(users::role.eq(UserRole::Staff))
            .count()
            .get_result(conn)?;
        if known == 0 {
            return Err(AppError::Validation(
                "shifts can only be assigned to staff".to_string(),
            ));
        }
        diesel::insert_into(shifts::table)
            .values(&shift)
            .execute(conn)?;
        Ok(shift)
    })
    .await?;
    Ok(Json(shift))
}

/// Shifts touching the next seven days, soonest first.
pub async fn upcoming_shifts(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<ShiftView>>> {
    actor.require(UserRole::Manager)?;
    let views = with_conn(&state.conn, move |conn| {
        let now = Utc::now();
        let horizon = now + chrono::Duration::days(7);
        let rows: Vec<(Shift, String)> = shifts::table
            .inner_join(users::table)
            .filter(shifts::end_time.gt(now))
            .filter(shifts::start_time.lt(horizon))
            .select((shifts::all_columns, users::full_name))
            .order(shifts::start_time.asc())
            .load(conn)?;
        Ok(rows
            .into_iter()
            .map(|(shift, user_name)| ShiftView { shift, user_name })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(views))
}

/// Who is on shift right now.
pub async fn active_shifts(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<ShiftView>>> {
    actor.require(UserRole::Staff)?;
    let views = with_conn(&state.conn, move |conn| {
        let now = Utc::now();
        let rows: Vec<(Shift, String)> = shifts::table
            .inner_join(users::table)
            .filter(shifts::start_time.le(now))
            .filter(shifts::end_time.gt(now))
            .select((shifts::all_columns, users::full_name))
            .order(shifts::end_time.asc())
            .load(conn)?;
        Ok(rows
            .into_iter()
            .map(|(shift, user_name)| ShiftView { shift, user_name })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(views))
}

pub async fn delete_shift(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require(UserRole::Manager)?;
    with_conn(&state.conn, move |conn| {
        let deleted = diesel::delete(shifts::table.find(id)).execute(conn)?;
        if deleted == 0 {
            return Err(AppError::NotFound("shift not found".to_string()));
        }
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// One CSV row: `email,label,start,end` with `YYYY-MM-DD HH:MM` times.
#[derive(Debug, Deserialize)]
struct CsvRow {
    email: String,
    label: String,
    start: String,
    end: String,
}

fn import_rows(
    conn: &mut PgConnection,
    data: &[u8],
    tz: FixedOffset,
) -> Result<ImportReport, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut imported = 0usize;
    let mut errors = Vec::new();
    for (line, record) in reader.deserialize::<CsvRow>().enumerate() {
        let row_no = line + 2;
        let row = match record {
            Ok(r) => r,
            Err(e) => {
                errors.push(format!("row {row_no}: {e}"));
                continue;
            }
        };

        let outcome = (|| -> Result<(), AppError> {
            let start = parse_local(&row.start, CSV_LAYOUT, tz)?;
            let end = parse_local(&row.end, CSV_LAYOUT, tz)?;
            check_window(start, end)?;

            let user_id: Uuid = users::table
                .filter(users::email.eq(row.email.to_lowercase()))
                .filter(users::role.eq(UserRole::Staff))
                .select(users::id)
                .first(conn)
                .map_err(|_| {
                    AppError::Validation(format!("no staff account for {}", row.email))
                })?;

            let shift = Shift {
                id: Uuid::new_v4(),
                user_id,
                start_time: start,
                end_time: end,
                label: row.label.clone(),
            };
            diesel::insert_into(shifts::table)
                .values(&shift)
                .execute(conn)?;
            Ok(())
        })();

        match outcome {
            Ok(()) => imported += 1,
            Err(e) => errors.push(format!("row {row_no}: {e}")),
        }
    }

    Ok(ImportReport { imported, errors })
}

/// Bulk rota import. Bad rows are reported, good rows still land.
pub async fn import_csv(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    mut multipart: Multipart,
) -> AppResult<Json<ImportReport>> {
    actor.require(UserRole::Manager)?;

    let mut data: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("bad upload: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("bad upload: {e}")))?;
            data = Some(bytes.to_vec());
        }
    }
    let data = data.ok_or_else(|| AppError::Validation("missing 'file' field".to_string()))?;

    let tz = state.config.report_tz();
    let report = with_conn(&state.conn, move |conn| import_rows(conn, &data, tz)).await?;
    log::info!(
        "shift import: {} row(s) imported, {} error(s)",
        report.imported,
        report.errors.len()
    );
    Ok(Json(report))
}

pub fn configure_shifts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/shifts", get(upcoming_shifts).post(create_shift))
        .route("/api/shifts/active", get(active_shifts))
        .route("/api/shifts/import", post(import_csv))
        .route("/api/shifts/:id", delete(delete_shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn form_layout_parses_in_report_tz() {
        let t = parse_local("2025-06-02T07:00", FORM_LAYOUT, tz()).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn csv_layout_parses() {
        assert!(parse_local("2025-06-02 07:00", CSV_LAYOUT, tz()).is_ok());
        assert!(parse_local("02/06/2025 07:00", CSV_LAYOUT, tz()).is_err());
    }

    #[test]
    fn inverted_window_rejected() {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).unwrap();
        assert!(check_window(start, end).is_err());
        assert!(check_window(end, start).is_ok());
        assert!(check_window(start, start).is_err());
    }
}
