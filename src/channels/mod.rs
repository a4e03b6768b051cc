//! Live ticket chat fan-out over Redis pub/sub. Each ticket gets its own
//! channel; writers publish the activity as JSON and connected clients
//! receive it as server-sent events. Delivery is best-effort: missing a
//! message only means the client refetches the timeline.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use diesel::prelude::*;
use futures::{Stream, StreamExt};
use redis::{AsyncCommands, Client as RedisClient};
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::UserRole;
use crate::shared::schema::tickets;
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;
use crate::tickets::ActivityView;

fn chat_channel(ticket_id: Uuid) -> String {
    format!("chat:{ticket_id}")
}

/// Publishes a timeline entry to the ticket's channel. Failures are
/// logged and swallowed; the activity is already committed.
pub async fn publish_activity(
    cache: &Option<Arc<RedisClient>>,
    ticket_id: Uuid,
    view: &ActivityView,
) {
    let Some(client) = cache else {
        return;
    };
    let payload = match serde_json::to_string(view) {
        Ok(p) => p,
        Err(e) => {
            log::error!("unserializable activity for ticket {ticket_id}: {e}");
            return;
        }
    };
    let result = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(chat_channel(ticket_id), payload).await
    }
    .await;
    if let Err(e) = result {
        log::warn!("chat publish for ticket {ticket_id} failed: {e}");
    }
}

/// SSE subscription to a ticket's chat channel. Staff may watch any
/// ticket; consumers only their own.
pub async fn stream_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let actor_id = actor.id;
    let actor_role = actor.role;
    with_conn(&state.conn, move |conn| {
        let requester_id: Uuid = tickets::table
            .find(id)
            .select(tickets::requester_id)
            .first(conn)
            .map_err(|_| AppError::NotFound("ticket not found".to_string()))?;
        if actor_role == UserRole::Consumer && requester_id != actor_id {
            return Err(AppError::Forbidden(
                "not the requester of this ticket".to_string(),
            ));
        }
        Ok(())
    })
    .await?;

    let client = state
        .cache
        .as_ref()
        .ok_or_else(|| AppError::External("live chat is not configured".to_string()))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| AppError::External(format!("chat broker unavailable: {e}")))?;
    pubsub
        .subscribe(chat_channel(id))
        .await
        .map_err(|e| AppError::External(format!("chat broker unavailable: {e}")))?;

    let stream = pubsub.into_on_message().filter_map(|msg| async move {
        let payload: String = msg.get_payload().ok()?;
        Some(Ok(Event::default().event("activity").data(payload)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn configure_channels_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/tickets/:id/stream", get(stream_ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_per_ticket() {
        let id = Uuid::nil();
        assert_eq!(
            chat_channel(id),
            "chat:00000000-0000-0000-0000-000000000000"
        );
    }
}
