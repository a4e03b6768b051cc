//! Browser push delivery. Producers enqueue onto a bounded channel and
//! never block; a single dispatcher task fans each job out to the stored
//! subscriptions. The push service is an external sink, so every failure
//! is logged and dropped rather than surfaced to the request path.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{PushSubscription, UserRole};
use crate::shared::schema::{push_subscriptions, users};
use crate::shared::state::AppState;
use crate::shared::utils::{with_conn, DbPool};

/// Queue depth before producers start dropping notifications.
const QUEUE_CAPACITY: usize = 256;
/// Concurrent deliveries per job.
const DELIVERY_FANOUT: usize = 8;
const PUSH_TTL_SECS: u32 = 60;

#[derive(Debug, Clone)]
pub enum Audience {
    AllStaff,
    User(Uuid),
}

#[derive(Debug)]
struct Job {
    audience: Audience,
    title: String,
    body: String,
    link: String,
}

/// Cheap cloneable handle held in app state.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Job>,
}

impl Notifier {
    /// Starts the dispatcher task and returns the producer handle.
    pub fn spawn(pool: DbPool) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(dispatch_loop(pool, rx));
        Self { tx }
    }

    /// A disconnected handle for contexts with no dispatcher, such as
    /// tests. Everything sent through it is dropped.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Non-blocking enqueue. When the queue is full the notification is
    /// dropped with a warning; ticket flow never waits on push delivery.
    pub fn notify(
        &self,
        audience: Audience,
        title: impl Into<String>,
        body: impl Into<String>,
        link: impl Into<String>,
    ) {
        let job = Job {
            audience,
            title: title.into(),
            body: body.into(),
            link: link.into(),
        };
        if let Err(e) = self.tx.try_send(job) {
            log::warn!("notification queue full, dropping: {e}");
        }
    }
}

async fn dispatch_loop(pool: DbPool, mut rx: mpsc::Receiver<Job>) {
    let client = reqwest::Client::new();
    while let Some(job) = rx.recv().await {
        if let Err(e) = deliver(&pool, &client, job).await {
            log::error!("push delivery failed: {e}");
        }
    }
}

fn load_targets(
    conn: &mut PgConnection,
    audience: &Audience,
) -> Result<Vec<PushSubscription>, AppError> {
    match audience {
        Audience::AllStaff => Ok(push_subscriptions::table
            .inner_join(users::table)
            .filter(users::role.eq(UserRole::Staff))
            .filter(users::is_active.eq(true))
            .select(push_subscriptions::all_columns)
            .load(conn)?),
        Audience::User(id) => Ok(push_subscriptions::table
            .filter(push_subscriptions::user_id.eq(*id))
            .load(conn)?),
    }
}

async fn deliver(pool: &DbPool, client: &reqwest::Client, job: Job) -> Result<(), AppError> {
    let audience = job.audience.clone();
    let targets = with_conn(pool, move |conn| load_targets(conn, &audience)).await?;
    if targets.is_empty() {
        return Ok(());
    }

    let payload = serde_json::json!({
        "title": job.title,
        "body": job.body,
        "link": job.link,
    });

    let dead: Vec<Uuid> = stream::iter(targets)
        .map(|sub| {
            let client = client.clone();
            let payload = payload.clone();
            async move {
                let result = client
                    .post(&sub.endpoint)
                    .header("TTL", PUSH_TTL_SECS)
                    .json(&payload)
                    .send()
                    .await;
                match result {
                    Ok(resp)
                        if resp.status() == StatusCode::NOT_FOUND
                            || resp.status() == StatusCode::GONE =>
                    {
                        Some(sub.id)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        log::warn!("push endpoint unreachable: {e}");
                        None
                    }
                }
            }
        })
        .buffer_unordered(DELIVERY_FANOUT)
        .filter_map(|dead_id| async move { dead_id })
        .collect()
        .await;

    // Endpoints the push service reports gone are pruned.
    if !dead.is_empty() {
        let count = dead.len();
        with_conn(pool, move |conn| {
            diesel::delete(push_subscriptions::table.filter(push_subscriptions::id.eq_any(dead)))
                .execute(conn)?;
            Ok(())
        })
        .await?;
        log::info!("pruned {count} dead push subscription(s)");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

/// Registers (or refreshes) a browser subscription. The endpoint URL is
/// the identity; re-subscribing replaces the stored keys.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<SubscribeRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if req.endpoint.trim().is_empty() {
        return Err(AppError::Validation("endpoint is required".to_string()));
    }
    let user_id = actor.id;
    with_conn(&state.conn, move |conn| {
        diesel::delete(
            push_subscriptions::table.filter(push_subscriptions::endpoint.eq(&req.endpoint)),
        )
        .execute(conn)?;
        let sub = PushSubscription {
            id: Uuid::new_v4(),
            user_id,
            endpoint: req.endpoint,
            p256dh: req.p256dh,
            auth: req.auth,
        };
        diesel::insert_into(push_subscriptions::table)
            .values(&sub)
            .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<serde_json::Value>> {
    let user_id = actor.id;
    with_conn(&state.conn, move |conn| {
        diesel::delete(
            push_subscriptions::table.filter(push_subscriptions::user_id.eq(user_id)),
        )
        .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Application-server key the browser needs to subscribe.
pub async fn vapid_public_key(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "public_key": state.config.push.vapid_public_key,
    }))
}

pub fn configure_notifications_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/push/subscribe", post(subscribe))
        .route("/api/push/unsubscribe", post(unsubscribe))
        .route("/api/push/key", get(vapid_public_key))
}
