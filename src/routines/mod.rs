//! Routine checklists: templates on a cron cadence, generated instances
//! assigned to whoever is on shift when the schedule fires.

pub mod checklist;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{RoutineInstance, RoutineStatus, RoutineTemplate, UserRole};
use crate::shared::schema::{routine_instances, routine_templates, shifts, users};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

/// Accepts the classic five-field form by prepending a seconds field.
pub fn parse_cron(expr: &str) -> Result<Schedule, AppError> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| AppError::Validation(format!("invalid cron schedule: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub title: String,
    pub cron_schedule: String,
    pub deadline_minutes: i32,
    pub checklist_items: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: RoutineInstance,
    pub template_title: String,
    pub checklist_items: serde_json::Value,
    pub assignee_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleItemRequest {
    pub item: String,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateTemplateRequest>,
) -> AppResult<Json<RoutineTemplate>> {
    actor.require(UserRole::Manager)?;
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if req.deadline_minutes <= 0 {
        return Err(AppError::Validation(
            "deadline must be a positive number of minutes".to_string(),
        ));
    }
    parse_cron(&req.cron_schedule)?;
    let items = checklist::items_from_template(&req.checklist_items)?;

    let template = RoutineTemplate {
        id: Uuid::new_v4(),
        title: req.title.trim().to_string(),
        cron_schedule: req.cron_schedule.trim().to_string(),
        deadline_minutes: req.deadline_minutes,
        checklist_items: serde_json::json!(items),
        created_by: actor.id,
        is_active: true,
    };
    let template = with_conn(&state.conn, move |conn| {
        diesel::insert_into(routine_templates::table)
            .values(&template)
            .execute(conn)?;
        Ok(template)
    })
    .await?;

    log::info!("routine template '{}' created", template.title);
    Ok(Json(template))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<RoutineTemplate>>> {
    actor.require(UserRole::Manager)?;
    let rows = with_conn(&state.conn, move |conn| {
        Ok(routine_templates::table
            .order(routine_templates::title.asc())
            .load(conn)?)
    })
    .await?;
    Ok(Json(rows))
}

pub async fn set_template_active(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> AppResult<Json<RoutineTemplate>> {
    actor.require(UserRole::Manager)?;
    let template = with_conn(&state.conn, move |conn| {
        let updated = diesel::update(routine_templates::table.find(id))
            .set(routine_templates::is_active.eq(req.is_active))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::NotFound("routine template not found".to_string()));
        }
        Ok(routine_templates::table.find(id).first(conn)?)
    })
    .await?;
    Ok(Json(template))
}

fn attach_templates(
    conn: &mut PgConnection,
    rows: Vec<(RoutineInstance, String)>,
) -> Result<Vec<InstanceView>, AppError> {
    let template_ids: Vec<Uuid> = rows.iter().map(|(i, _)| i.template_id).collect();
    let templates: Vec<RoutineTemplate> = routine_templates::table
        .filter(routine_templates::id.eq_any(&template_ids))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(instance, assignee_name)| {
            let template = templates.iter().find(|t| t.id == instance.template_id);
            InstanceView {
                template_title: template
                    .map(|t| t.title.clone())
                    .unwrap_or_else(|| "Unknown routine".to_string()),
                checklist_items: template
                    .map(|t| t.checklist_items.clone())
                    .unwrap_or_else(|| serde_json::json!([])),
                instance,
                assignee_name,
            }
        })
        .collect())
}

/// Pending routines assigned to the calling staff member, soonest due
/// first.
pub async fn my_instances(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<InstanceView>>> {
    actor.require(UserRole::Staff)?;
    let assignee = actor.id;
    let full_name = actor.full_name.clone();
    let views = with_conn(&state.conn, move |conn| {
        let rows: Vec<RoutineInstance> = routine_instances::table
            .filter(routine_instances::assigned_user_id.eq(assignee))
            .filter(routine_instances::status.eq(RoutineStatus::Pending))
            .order(routine_instances::due_at.asc())
            .load(conn)?;
        let rows = rows.into_iter().map(|i| (i, full_name.clone())).collect();
        attach_templates(conn, rows)
    })
    .await?;
    Ok(Json(views))
}

pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<InstanceQuery>,
) -> AppResult<Json<Vec<InstanceView>>> {
    actor.require(UserRole::Manager)?;
    let views = with_conn(&state.conn, move |conn| {
        let mut q = routine_instances::table
            .inner_join(users::table)
            .select((routine_instances::all_columns, users::full_name))
            .order(routine_instances::due_at.desc())
            .limit(100)
            .into_boxed();
        if let Some(status) = query.status {
            let status: RoutineStatus = status.parse().map_err(AppError::Validation)?;
            q = q.filter(routine_instances::status.eq(status));
        }
        let rows: Vec<(RoutineInstance, String)> = q.load(conn)?;
        attach_templates(conn, rows)
    })
    .await?;
    Ok(Json(views))
}

/// Toggles one checklist item on an instance the caller is assigned to.
/// Completion is sticky: once every item has been checked and the
/// instance is stamped COMPLETED, unchecking does not reopen it.
pub async fn toggle_item(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleItemRequest>,
) -> AppResult<Json<RoutineInstance>> {
    actor.require(UserRole::Staff)?;
    let actor_id = actor.id;
    let instance = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let instance: RoutineInstance = routine_instances::table
                .find(id)
                .first(conn)
                .map_err(|_| AppError::NotFound("routine instance not found".to_string()))?;
            if instance.assigned_user_id != actor_id {
                return Err(AppError::Forbidden(
                    "routine is assigned to someone else".to_string(),
                ));
            }

            let template: RoutineTemplate = routine_templates::table
                .find(instance.template_id)
                .first(conn)?;
            let items = checklist::items_from_template(&template.checklist_items)?;
            let outcome = checklist::toggle(&instance.checklist_state, &items, &req.item, req.done)?;

            let update = checklist::completion_after_toggle(
                instance.status,
                instance.completed_at,
                outcome.all_done,
            );
            diesel::update(routine_instances::table.find(id))
                .set((
                    routine_instances::checklist_state.eq(&outcome.state),
                    routine_instances::status.eq(update.status),
                ))
                .execute(conn)?;
            if update.stamp_completed {
                // Guarded: the completion time never moves once set.
                diesel::update(
                    routine_instances::table
                        .find(id)
                        .filter(routine_instances::completed_at.is_null()),
                )
                .set(routine_instances::completed_at.eq(Utc::now()))
                .execute(conn)?;
            }

            Ok(routine_instances::table.find(id).first(conn)?)
        })
    })
    .await?;
    Ok(Json(instance))
}

/// Runs the 60s scheduler loop. Each pass fires templates whose cron
/// schedule triggered inside the last window and creates one instance per
/// staff member currently on shift.
pub fn spawn_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = generate_due_instances(&state).await {
                log::error!("routine scheduler pass failed: {e}");
            }
        }
    });
}

async fn generate_due_instances(state: &Arc<AppState>) -> Result<(), AppError> {
    let tz = state.config.report_tz();
    let now = Utc::now();
    let created = with_conn(&state.conn, move |conn| {
        let templates: Vec<RoutineTemplate> = routine_templates::table
            .filter(routine_templates::is_active.eq(true))
            .load(conn)?;

        let mut created = 0usize;
        for template in templates {
            let schedule = match parse_cron(&template.cron_schedule) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("routine '{}' has a bad schedule: {e}", template.title);
                    continue;
                }
            };
            let local_now = now.with_timezone(&tz);
            let window_start = local_now - Duration::seconds(59);
            let fire = match schedule.after(&window_start).next() {
                Some(f) if f <= local_now => f.with_timezone(&Utc),
                _ => continue,
            };

            created += instantiate_template(conn, &template, fire)?;
        }
        Ok(created)
    })
    .await?;

    if created > 0 {
        log::info!("routine scheduler generated {created} instance(s)");
    }
    Ok(())
}

/// Creates instances for every staff member on shift at the fire time.
/// A staff member with a PENDING instance of this template is skipped so
/// overlapping fires never stack up.
fn instantiate_template(
    conn: &mut PgConnection,
    template: &RoutineTemplate,
    fire: DateTime<Utc>,
) -> Result<usize, AppError> {
    let on_shift: Vec<Uuid> = shifts::table
        .inner_join(users::table)
        .filter(shifts::start_time.le(fire))
        .filter(shifts::end_time.gt(fire))
        .filter(users::role.eq(UserRole::Staff))
        .filter(users::is_active.eq(true))
        .select(users::id)
        .distinct()
        .load(conn)?;
    if on_shift.is_empty() {
        log::warn!(
            "routine '{}' fired with nobody on shift, skipping",
            template.title
        );
        return Ok(0);
    }

    let items = checklist::items_from_template(&template.checklist_items)?;
    let due_at = fire + Duration::minutes(template.deadline_minutes as i64);

    let mut created = 0usize;
    for user_id in on_shift {
        let pending: i64 = routine_instances::table
            .filter(routine_instances::template_id.eq(template.id))
            .filter(routine_instances::assigned_user_id.eq(user_id))
            .filter(routine_instances::status.eq(RoutineStatus::Pending))
            .count()
            .get_result(conn)?;
        if pending > 0 {
            continue;
        }

        let instance = RoutineInstance {
            id: Uuid::new_v4(),
            template_id: template.id,
            assigned_user_id: user_id,
            checklist_state: checklist::initial_state(&items),
            generated_at: fire,
            due_at,
            completed_at: None,
            status: RoutineStatus::Pending,
        };
        diesel::insert_into(routine_instances::table)
            .values(&instance)
            .execute(conn)?;
        created += 1;
    }
    Ok(created)
}

pub fn configure_routines_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/routines/templates",
            get(list_templates).post(create_template),
        )
        .route("/api/routines/templates/:id/active", post(set_template_active))
        .route("/api/routines/mine", get(my_instances))
        .route("/api/routines/instances", get(list_instances))
        .route("/api/routines/instances/:id/toggle", post(toggle_item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_accepted() {
        assert!(parse_cron("0 7 * * *").is_ok());
        assert!(parse_cron("*/15 * * * *").is_ok());
    }

    #[test]
    fn six_field_cron_passes_through() {
        assert!(parse_cron("0 0 7 * * *").is_ok());
    }

    #[test]
    fn garbage_cron_rejected() {
        assert!(parse_cron("every morning").is_err());
        assert!(parse_cron("99 * * * *").is_err());
    }
}
