pub mod lifecycle;
pub mod public;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::channels;
use crate::notifications::Audience;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{
    validate_category, ActivityKind, Location, NewTicket, Ticket, TicketActivity,
    TicketPriority, TicketStatus, User, UserRole,
};
use crate::shared::schema::{ticket_activities, tickets, users};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

/// One entry of a ticket's chat/audit timeline, shaped for clients and for
/// the real-time channel payload.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    pub actor_id: Uuid,
    pub actor_name: String,
    pub actor_avatar: Option<String>,
    pub kind: ActivityKind,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub time: String,
}

impl ActivityView {
    fn new(
        actor_id: Uuid,
        actor_name: String,
        actor_avatar: Option<String>,
        kind: ActivityKind,
        note: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id,
            actor_name,
            actor_avatar,
            kind,
            note,
            created_at,
            time: created_at.format("%d %b %H:%M").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub requester_name: String,
    pub requester_avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketDetail {
    pub ticket: TicketView,
    pub timeline: Vec<ActivityView>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub location: String,
    pub category: String,
    pub subject: String,
    pub description: String,
    /// "ON_AIR_EMERGENCY" maps to URGENT_ON_AIR, "PRE_PRODUCTION" to HIGH.
    pub urgency: Option<String>,
    pub proof_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub solution: String,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub open_tickets: i64,
    pub urgent_tickets: i64,
}

pub fn map_urgency(urgency: Option<&str>) -> TicketPriority {
    match urgency {
        Some("ON_AIR_EMERGENCY") => TicketPriority::UrgentOnAir,
        Some("PRE_PRODUCTION") => TicketPriority::High,
        _ => TicketPriority::Normal,
    }
}

fn load_ticket(conn: &mut PgConnection, id: Uuid) -> Result<Ticket, AppError> {
    tickets::table
        .find(id)
        .first(conn)
        .map_err(|_| AppError::NotFound("ticket not found".to_string()))
}

/// Urgent tickets first, oldest first within a band.
fn queue_order() -> diesel::expression::SqlLiteral<Integer> {
    sql::<Integer>("CASE WHEN priority = 'URGENT_ON_AIR' THEN 1 ELSE 2 END")
}

fn attach_requesters(
    conn: &mut PgConnection,
    rows: Vec<Ticket>,
) -> Result<Vec<TicketView>, AppError> {
    let requester_ids: Vec<Uuid> = rows.iter().map(|t| t.requester_id).collect();
    let requesters: Vec<User> = users::table
        .filter(users::id.eq_any(&requester_ids))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|ticket| {
            let requester = requesters.iter().find(|u| u.id == ticket.requester_id);
            TicketView {
                requester_name: requester
                    .map(|u| u.full_name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                requester_avatar: requester.and_then(|u| u.avatar_url.clone()),
                ticket,
            }
        })
        .collect())
}

/// Inserts a ticket for the given requester. The sequential ticket number
/// comes from the database's identity column, so concurrent creates each
/// get a distinct one. Shared by the authenticated and anonymous entry
/// points.
pub fn insert_ticket(
    conn: &mut PgConnection,
    requester_id: Uuid,
    location: Location,
    priority: TicketPriority,
    category: String,
    subject: String,
    description: String,
    proof_image_url: Option<String>,
) -> Result<Ticket, AppError> {
    let new_ticket = NewTicket {
        id: Uuid::new_v4(),
        location,
        priority,
        category,
        subject,
        description,
        solution: None,
        proof_image_url,
        requester_id,
        status: TicketStatus::Open,
        created_at: Utc::now(),
        first_response_at: None,
        resolved_at: None,
        closed_at: None,
        is_handover: false,
        is_converted_to_article: false,
    };
    let ticket = diesel::insert_into(tickets::table)
        .values(&new_ticket)
        .returning(tickets::all_columns)
        .get_result(conn)?;
    Ok(ticket)
}

/// Staff broadcast fired after ticket creation; urgent tickets get a
/// distinct alert title.
pub fn notify_new_ticket(state: &AppState, ticket: &Ticket, source: &str) {
    let link = format!("/staff/tickets/{}", ticket.id);
    if ticket.priority == TicketPriority::UrgentOnAir {
        state.notifier.notify(
            Audience::AllStaff,
            format!("URGENT {}: {}", source, ticket.location),
            format!("{} (ON AIR ISSUE)", ticket.subject),
            link,
        );
    } else {
        state.notifier.notify(
            Audience::AllStaff,
            format!("{}: {}", source, ticket.location),
            ticket.subject.clone(),
            link,
        );
    }
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateTicketRequest>,
) -> AppResult<Json<Ticket>> {
    let location: Location = req
        .location
        .parse()
        .map_err(AppError::Validation)?;
    validate_category(&req.category).map_err(AppError::Validation)?;
    if req.subject.trim().is_empty() {
        return Err(AppError::Validation("subject is required".to_string()));
    }

    let priority = map_urgency(req.urgency.as_deref());
    let requester_id = actor.id;
    let ticket = with_conn(&state.conn, move |conn| {
        insert_ticket(
            conn,
            requester_id,
            location,
            priority,
            req.category,
            req.subject,
            req.description,
            req.proof_image_url,
        )
    })
    .await?;

    notify_new_ticket(&state, &ticket, "New Ticket");
    log::info!(
        "ticket #{} created by {} ({})",
        ticket.ticket_number,
        actor.full_name,
        ticket.priority
    );
    Ok(Json(ticket))
}

/// Staff queue: everything still in flight, urgent first, oldest first.
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<TicketView>>> {
    actor.require(UserRole::Staff)?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let views = with_conn(&state.conn, move |conn| {
        let mut q = tickets::table
            .filter(tickets::status.eq_any(vec![
                TicketStatus::Open,
                TicketStatus::InProgress,
                TicketStatus::Handover,
            ]))
            .into_boxed();

        if let Some(status) = query.status {
            let status: TicketStatus = status.parse().map_err(AppError::Validation)?;
            q = tickets::table.filter(tickets::status.eq(status)).into_boxed();
        }
        if let Some(priority) = query.priority {
            let priority: TicketPriority = priority.parse().map_err(AppError::Validation)?;
            q = q.filter(tickets::priority.eq(priority));
        }

        let rows: Vec<Ticket> = q
            .order(queue_order())
            .then_order_by(tickets::created_at.asc())
            .limit(limit)
            .offset(offset)
            .load(conn)?;
        attach_requesters(conn, rows)
    })
    .await?;

    Ok(Json(views))
}

/// Requester's own recent tickets.
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<Ticket>>> {
    let requester_id = actor.id;
    let rows = with_conn(&state.conn, move |conn| {
        Ok(tickets::table
            .filter(tickets::requester_id.eq(requester_id))
            .order(tickets::created_at.desc())
            .limit(20)
            .load(conn)?)
    })
    .await?;
    Ok(Json(rows))
}

/// Unresolved URGENT_ON_AIR tickets, newest first.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<TicketView>>> {
    actor.require(UserRole::Staff)?;
    let views = with_conn(&state.conn, move |conn| {
        let rows: Vec<Ticket> = tickets::table
            .filter(tickets::priority.eq(TicketPriority::UrgentOnAir))
            .filter(tickets::status.ne(TicketStatus::Resolved))
            .order(tickets::created_at.desc())
            .load(conn)?;
        attach_requesters(conn, rows)
    })
    .await?;
    Ok(Json(views))
}

/// Tickets this staff member resolved, via their RESOLVE activities.
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<TicketView>>> {
    actor.require(UserRole::Staff)?;
    let staff_id = actor.id;
    let views = with_conn(&state.conn, move |conn| {
        let ticket_ids: Vec<Uuid> = ticket_activities::table
            .filter(ticket_activities::actor_id.eq(staff_id))
            .filter(ticket_activities::kind.eq(ActivityKind::Resolve))
            .select(ticket_activities::ticket_id)
            .load(conn)?;
        let rows: Vec<Ticket> = tickets::table
            .filter(tickets::id.eq_any(ticket_ids))
            .order(tickets::resolved_at.desc())
            .load(conn)?;
        attach_requesters(conn, rows)
    })
    .await?;
    Ok(Json(views))
}

pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<QueueStats>> {
    actor.require(UserRole::Staff)?;
    let stats = with_conn(&state.conn, move |conn| {
        let open_tickets: i64 = tickets::table
            .filter(tickets::status.eq_any(vec![TicketStatus::Open, TicketStatus::InProgress]))
            .count()
            .get_result(conn)?;
        let urgent_tickets: i64 = tickets::table
            .filter(tickets::priority.eq(TicketPriority::UrgentOnAir))
            .filter(tickets::status.ne(TicketStatus::Resolved))
            .count()
            .get_result(conn)?;
        Ok(QueueStats {
            open_tickets,
            urgent_tickets,
        })
    })
    .await?;
    Ok(Json(stats))
}

/// Full ticket detail with the chat/audit timeline. The synthetic CREATED
/// entry (the ticket's own description) always heads the timeline.
pub async fn ticket_detail(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TicketDetail>> {
    let actor_id = actor.id;
    let actor_role = actor.role;
    let detail = with_conn(&state.conn, move |conn| {
        let ticket = load_ticket(conn, id)?;
        if actor_role == UserRole::Consumer && ticket.requester_id != actor_id {
            return Err(AppError::Forbidden(
                "not the requester of this ticket".to_string(),
            ));
        }

        let mut views = attach_requesters(conn, vec![ticket])?;
        let view = views.remove(0);

        let mut timeline = vec![ActivityView::new(
            view.ticket.requester_id,
            view.requester_name.clone(),
            view.requester_avatar.clone(),
            ActivityKind::Created,
            view.ticket.description.clone(),
            view.ticket.created_at,
        )];

        let rows: Vec<(TicketActivity, User)> = ticket_activities::table
            .inner_join(users::table)
            .filter(ticket_activities::ticket_id.eq(id))
            .order(ticket_activities::created_at.asc())
            .load(conn)?;
        timeline.extend(rows.into_iter().map(|(act, actor)| {
            ActivityView::new(
                act.actor_id,
                actor.full_name,
                actor.avatar_url,
                act.kind,
                act.note,
                act.created_at,
            )
        }));

        Ok(TicketDetail {
            ticket: view,
            timeline,
        })
    })
    .await?;
    Ok(Json(detail))
}

/// Appends a REPLY activity. For staff the write and any OPEN/HANDOVER →
/// IN_PROGRESS transition (plus the guarded first-response stamp) commit in
/// one transaction; chat fan-out happens after commit and is best-effort.
pub async fn reply_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> AppResult<Json<ActivityView>> {
    if req.message.trim().is_empty() {
        return Err(AppError::Validation("message is required".to_string()));
    }

    let actor_id = actor.id;
    let actor_role = actor.role;
    let message = req.message;
    let activity = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let ticket = load_ticket(conn, id)?;
            if actor_role == UserRole::Consumer && ticket.requester_id != actor_id {
                return Err(AppError::Forbidden(
                    "not the requester of this ticket".to_string(),
                ));
            }

            let now = Utc::now();
            let activity = TicketActivity {
                id: Uuid::new_v4(),
                ticket_id: id,
                actor_id,
                kind: ActivityKind::Reply,
                note: message.clone(),
                previous_value: None,
                new_value: None,
                created_at: now,
            };
            diesel::insert_into(ticket_activities::table)
                .values(&activity)
                .execute(conn)?;

            if actor_role == UserRole::Staff {
                let next = lifecycle::status_after_staff_reply(ticket.status);
                if next != ticket.status {
                    diesel::update(tickets::table.find(id))
                        .set(tickets::status.eq(next))
                        .execute(conn)?;
                }
                if lifecycle::counts_as_first_response(ticket.status) {
                    // Guarded: first_response_at is written at most once.
                    diesel::update(
                        tickets::table
                            .find(id)
                            .filter(tickets::first_response_at.is_null()),
                    )
                    .set(tickets::first_response_at.eq(now))
                    .execute(conn)?;
                }
            }

            Ok(activity)
        })
    })
    .await?;

    let view = ActivityView::new(
        activity.actor_id,
        actor.full_name,
        actor.avatar_url,
        activity.kind,
        activity.note,
        activity.created_at,
    );
    channels::publish_activity(&state.cache, id, &view).await;
    Ok(Json(view))
}

pub async fn handover_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<NoteRequest>,
) -> AppResult<Json<Ticket>> {
    actor.require(UserRole::Staff)?;
    let actor_id = actor.id;
    let ticket = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let ticket = load_ticket(conn, id)?;
            lifecycle::guard_transition(ticket.status, TicketStatus::Handover)?;

            let now = Utc::now();
            let activity = TicketActivity {
                id: Uuid::new_v4(),
                ticket_id: id,
                actor_id,
                kind: ActivityKind::Handover,
                note: req.note,
                previous_value: Some(ticket.status.to_string()),
                new_value: Some(TicketStatus::Handover.to_string()),
                created_at: now,
            };
            diesel::insert_into(ticket_activities::table)
                .values(&activity)
                .execute(conn)?;

            diesel::update(tickets::table.find(id))
                .set((
                    tickets::status.eq(TicketStatus::Handover),
                    tickets::is_handover.eq(true),
                ))
                .execute(conn)?;
            if lifecycle::counts_as_first_response(ticket.status) {
                diesel::update(
                    tickets::table
                        .find(id)
                        .filter(tickets::first_response_at.is_null()),
                )
                .set(tickets::first_response_at.eq(now))
                .execute(conn)?;
            }

            load_ticket(conn, id)
        })
    })
    .await?;

    log::info!("ticket {} handed over by {}", id, actor.full_name);
    Ok(Json(ticket))
}

pub async fn resolve_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> AppResult<Json<Ticket>> {
    actor.require(UserRole::Staff)?;
    lifecycle::validate_solution(&req.solution)?;

    let actor_id = actor.id;
    let solution = req.solution;
    let ticket = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let ticket = load_ticket(conn, id)?;
            lifecycle::guard_transition(ticket.status, TicketStatus::Resolved)?;

            let now = Utc::now();
            let activity = TicketActivity {
                id: Uuid::new_v4(),
                ticket_id: id,
                actor_id,
                kind: ActivityKind::Resolve,
                note: format!("Ticket resolved. Solution: {solution}"),
                previous_value: Some(ticket.status.to_string()),
                new_value: Some(TicketStatus::Resolved.to_string()),
                created_at: now,
            };
            diesel::insert_into(ticket_activities::table)
                .values(&activity)
                .execute(conn)?;

            diesel::update(tickets::table.find(id))
                .set((
                    tickets::status.eq(TicketStatus::Resolved),
                    tickets::solution.eq(&solution),
                ))
                .execute(conn)?;
            // Guarded stamps so concurrent duplicate transitions cannot
            // shift SLA timestamps once set.
            diesel::update(
                tickets::table
                    .find(id)
                    .filter(tickets::resolved_at.is_null()),
            )
            .set(tickets::resolved_at.eq(now))
            .execute(conn)?;
            if lifecycle::counts_as_first_response(ticket.status) {
                diesel::update(
                    tickets::table
                        .find(id)
                        .filter(tickets::first_response_at.is_null()),
                )
                .set(tickets::first_response_at.eq(now))
                .execute(conn)?;
            }

            load_ticket(conn, id)
        })
    })
    .await?;

    log::info!("ticket {} resolved by {}", id, actor.full_name);
    Ok(Json(ticket))
}

/// Administrative close, manager only.
pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Ticket>> {
    actor.require(UserRole::Manager)?;
    let actor_id = actor.id;
    let ticket = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let ticket = load_ticket(conn, id)?;
            lifecycle::guard_transition(ticket.status, TicketStatus::Closed)?;

            let now = Utc::now();
            let activity = TicketActivity {
                id: Uuid::new_v4(),
                ticket_id: id,
                actor_id,
                kind: ActivityKind::StatusChange,
                note: "Ticket closed".to_string(),
                previous_value: Some(ticket.status.to_string()),
                new_value: Some(TicketStatus::Closed.to_string()),
                created_at: now,
            };
            diesel::insert_into(ticket_activities::table)
                .values(&activity)
                .execute(conn)?;

            diesel::update(tickets::table.find(id))
                .set(tickets::status.eq(TicketStatus::Closed))
                .execute(conn)?;
            diesel::update(tickets::table.find(id).filter(tickets::closed_at.is_null()))
                .set(tickets::closed_at.eq(now))
                .execute(conn)?;

            load_ticket(conn, id)
        })
    })
    .await?;
    Ok(Json(ticket))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_queue).post(create_ticket))
        .route("/api/tickets/mine", get(list_mine))
        .route("/api/tickets/alerts", get(list_alerts))
        .route("/api/tickets/history", get(list_history))
        .route("/api/tickets/stats", get(queue_stats))
        .route("/api/tickets/:id", get(ticket_detail))
        .route("/api/tickets/:id/reply", post(reply_ticket))
        .route("/api/tickets/:id/handover", post(handover_ticket))
        .route("/api/tickets/:id/resolve", post(resolve_ticket))
        .route("/api/tickets/:id/close", post(close_ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_mapping() {
        assert_eq!(
            map_urgency(Some("ON_AIR_EMERGENCY")),
            TicketPriority::UrgentOnAir
        );
        assert_eq!(map_urgency(Some("PRE_PRODUCTION")), TicketPriority::High);
        assert_eq!(map_urgency(Some("whenever")), TicketPriority::Normal);
        assert_eq!(map_urgency(None), TicketPriority::Normal);
    }
}
