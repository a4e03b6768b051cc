//! Manager-facing KPI aggregation. Row loading happens here; all math
//! lives in `compute` so the figures are reproducible from plain sets.

pub mod compute;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Ticket, TicketActivity, TicketStatus, UserRole};
use crate::shared::schema::{knowledge_articles, ticket_activities, tickets, users};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

use compute::{CategoryCount, DayBucket, KpiSummary, StaffStat};

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub summary: KpiSummary,
    pub daily: Vec<DayBucket>,
    pub categories: Vec<CategoryCount>,
    pub staff: Vec<StaffStat>,
}

fn day_start_utc(day: NaiveDate, tz: FixedOffset) -> Result<DateTime<Utc>, AppError> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::Validation("invalid date".to_string()))?;
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation("invalid date".to_string()))
}

/// Reporting window in the configured timezone. Defaults to the last 30
/// calendar days including today.
fn resolve_period(
    query: &PeriodQuery,
    tz: FixedOffset,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let to = query.to.unwrap_or(today);
    let from = query.from.unwrap_or(to - Duration::days(29));
    if from > to {
        return Err(AppError::Validation(
            "period start is after period end".to_string(),
        ));
    }
    Ok((from, to))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<PeriodQuery>,
) -> AppResult<Json<DashboardResponse>> {
    actor.require(UserRole::Manager)?;

    let tz = state.config.report_tz();
    let (from, to) = resolve_period(&query, tz)?;
    let start = day_start_utc(from, tz)?;
    let end = day_start_utc(to + Duration::days(1), tz)?;

    let response = with_conn(&state.conn, move |conn| {
        // Tickets created in the window, plus older ones resolved in it so
        // the resolved series and staff figures cover the boundary.
        let rows: Vec<Ticket> = tickets::table
            .filter(tickets::created_at.lt(end))
            .filter(
                tickets::created_at
                    .ge(start)
                    .or(tickets::resolved_at.ge(start)),
            )
            .load(conn)?;

        let ticket_ids: Vec<Uuid> = rows.iter().map(|t| t.id).collect();
        let activities: Vec<TicketActivity> = ticket_activities::table
            .filter(ticket_activities::ticket_id.eq_any(&ticket_ids))
            .load(conn)?;

        let staff: Vec<(Uuid, String)> = users::table
            .filter(users::role.eq(UserRole::Staff))
            .filter(users::is_active.eq(true))
            .select((users::id, users::full_name))
            .order(users::full_name.asc())
            .load(conn)?;

        // Summary and category figures only cover tickets created in the
        // window; the wider set feeds the resolved side of the series and
        // the staff table.
        let windowed = compute::created_in_window(&rows, start, end);
        Ok(DashboardResponse {
            from,
            to,
            summary: compute::summarize(&windowed),
            daily: compute::daily_series(&rows, from, to, tz),
            categories: compute::category_breakdown(&windowed),
            staff: compute::staff_stats(&rows, &activities, &staff),
        })
    })
    .await?;

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct StaffContribution {
    pub user_id: Uuid,
    pub full_name: String,
    pub articles_written: i64,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub summary: KpiSummary,
    /// Last seven calendar days including today.
    pub daily: Vec<DayBucket>,
    pub article_count: i64,
    pub verified_article_count: i64,
    pub pending_candidates: i64,
    pub contributions: Vec<StaffContribution>,
}

/// At-a-glance manager report: the last week of traffic plus knowledge
/// base health.
pub async fn overview(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<OverviewResponse>> {
    actor.require(UserRole::Manager)?;

    let tz = state.config.report_tz();
    let to = Utc::now().with_timezone(&tz).date_naive();
    let from = to - Duration::days(6);
    let start = day_start_utc(from, tz)?;
    let end = day_start_utc(to + Duration::days(1), tz)?;

    let response = with_conn(&state.conn, move |conn| {
        let rows: Vec<Ticket> = tickets::table
            .filter(tickets::created_at.lt(end))
            .filter(
                tickets::created_at
                    .ge(start)
                    .or(tickets::resolved_at.ge(start)),
            )
            .load(conn)?;

        let article_count: i64 = knowledge_articles::table.count().get_result(conn)?;
        let verified_article_count: i64 = knowledge_articles::table
            .filter(knowledge_articles::is_verified.eq(true))
            .count()
            .get_result(conn)?;
        let pending_candidates: i64 = tickets::table
            .filter(tickets::status.eq(TicketStatus::Resolved))
            .filter(tickets::is_converted_to_article.eq(false))
            .filter(tickets::solution.is_not_null())
            .count()
            .get_result(conn)?;

        let contributions: Vec<StaffContribution> = users::table
            .left_join(knowledge_articles::table)
            .filter(users::role.eq(UserRole::Staff))
            .filter(users::is_active.eq(true))
            .group_by((users::id, users::full_name))
            .select((
                users::id,
                users::full_name,
                diesel::dsl::count(knowledge_articles::id.nullable()),
            ))
            .order(users::full_name.asc())
            .load::<(Uuid, String, i64)>(conn)?
            .into_iter()
            .map(|(user_id, full_name, articles_written)| StaffContribution {
                user_id,
                full_name,
                articles_written,
            })
            .collect();

        let windowed = compute::created_in_window(&rows, start, end);
        Ok(OverviewResponse {
            summary: compute::summarize(&windowed),
            daily: compute::daily_series(&rows, from, to, tz),
            article_count,
            verified_article_count,
            pending_candidates,
            contributions,
        })
    })
    .await?;

    Ok(Json(response))
}

pub fn configure_analytics_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/analytics/dashboard", get(dashboard))
        .route("/api/analytics/overview", get(overview))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_period_is_thirty_days() {
        let tz = FixedOffset::east_opt(7 * 3600).unwrap();
        let (from, to) = resolve_period(&PeriodQuery { from: None, to: None }, tz).unwrap();
        assert_eq!(to - from, Duration::days(29));
    }

    #[test]
    fn inverted_period_rejected() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let q = PeriodQuery {
            from: NaiveDate::from_ymd_opt(2025, 6, 10),
            to: NaiveDate::from_ymd_opt(2025, 6, 1),
        };
        assert!(resolve_period(&q, tz).is_err());
    }

    #[test]
    fn day_start_respects_offset() {
        let tz = FixedOffset::east_opt(7 * 3600).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let start = day_start_utc(day, tz).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap());
    }
}
