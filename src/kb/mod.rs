//! Knowledge base: articles written by staff, plus the pipeline that
//! promotes resolved tickets into articles. Search results are cached in
//! Redis for a short window since the same queries repeat heavily during
//! incidents.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use redis::AsyncCommands;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{
    validate_category, KnowledgeArticle, Ticket, TicketStatus, UserRole,
};
use crate::shared::schema::{knowledge_articles, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;
use crate::tickets::lifecycle::{self, PromotionEligibility};

const SEARCH_CACHE_TTL_SECS: u64 = 300;

fn search_cache_key(query: &str) -> String {
    format!("cache:kb:{}", query.trim().to_lowercase())
}

async fn cache_get(state: &AppState, key: &str) -> Option<String> {
    let client = state.cache.as_ref()?;
    let mut conn = client.get_multiplexed_async_connection().await.ok()?;
    conn.get::<_, Option<String>>(key).await.ok().flatten()
}

async fn cache_put(state: &AppState, key: &str, value: &str) {
    let Some(client) = state.cache.as_ref() else {
        return;
    };
    let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
        return;
    };
    if let Err(e) = conn
        .set_ex::<_, _, ()>(key, value, SEARCH_CACHE_TTL_SECS)
        .await
    {
        log::warn!("search cache write failed: {e}");
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticleRequest {
    pub title: String,
    pub content: String,
    pub category: String,
}

/// Verified-first listing; also the no-query search result.
fn base_query() -> knowledge_articles::BoxedQuery<'static, diesel::pg::Pg> {
    knowledge_articles::table
        .order((
            knowledge_articles::is_verified.desc(),
            knowledge_articles::views_count.desc(),
        ))
        .into_boxed()
}

pub async fn search_articles(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<KnowledgeArticle>>> {
    let term = query.q.unwrap_or_default().trim().to_string();

    let cache_key = if term.is_empty() {
        None
    } else {
        Some(search_cache_key(&term))
    };
    if let Some(key) = &cache_key {
        if let Some(cached) = cache_get(&state, key).await {
            if let Ok(articles) = serde_json::from_str::<Vec<KnowledgeArticle>>(&cached) {
                return Ok(Json(articles));
            }
        }
    }

    let category = query.category;
    let term_for_db = term.clone();
    let articles = with_conn(&state.conn, move |conn| {
        let mut q = base_query();
        if !term_for_db.is_empty() {
            let pattern = format!("%{term_for_db}%");
            q = q.filter(
                knowledge_articles::title
                    .ilike(pattern.clone())
                    .or(knowledge_articles::content.ilike(pattern)),
            );
        }
        if let Some(category) = category {
            q = q.filter(knowledge_articles::category.eq(category));
        }
        Ok(q.limit(50).load::<KnowledgeArticle>(conn)?)
    })
    .await?;

    if let Some(key) = &cache_key {
        if let Ok(payload) = serde_json::to_string(&articles) {
            cache_put(&state, key, &payload).await;
        }
    }
    Ok(Json(articles))
}

/// Reads an article and bumps its view counter.
pub async fn article_detail(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<KnowledgeArticle>> {
    let article = with_conn(&state.conn, move |conn| {
        let updated = diesel::update(knowledge_articles::table.find(id))
            .set(knowledge_articles::views_count.eq(knowledge_articles::views_count + 1))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::NotFound("article not found".to_string()));
        }
        Ok(knowledge_articles::table.find(id).first(conn)?)
    })
    .await?;
    Ok(Json(article))
}

pub async fn mark_helpful(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<KnowledgeArticle>> {
    let article = with_conn(&state.conn, move |conn| {
        let updated = diesel::update(knowledge_articles::table.find(id))
            .set(knowledge_articles::helpful_count.eq(knowledge_articles::helpful_count + 1))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::NotFound("article not found".to_string()));
        }
        Ok(knowledge_articles::table.find(id).first(conn)?)
    })
    .await?;
    Ok(Json(article))
}

pub async fn create_article(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateArticleRequest>,
) -> AppResult<Json<KnowledgeArticle>> {
    actor.require(UserRole::Staff)?;
    if req.title.trim().is_empty() || req.content.trim().is_empty() {
        return Err(AppError::Validation(
            "title and content are required".to_string(),
        ));
    }
    validate_category(&req.category).map_err(AppError::Validation)?;

    let now = Utc::now();
    let article = KnowledgeArticle {
        id: Uuid::new_v4(),
        title: req.title.trim().to_string(),
        content: req.content.trim().to_string(),
        category: req.category,
        author_id: actor.id,
        is_verified: false,
        views_count: 0,
        helpful_count: 0,
        created_at: now,
        updated_at: now,
    };
    let article = with_conn(&state.conn, move |conn| {
        diesel::insert_into(knowledge_articles::table)
            .values(&article)
            .execute(conn)?;
        Ok(article)
    })
    .await?;
    Ok(Json(article))
}

/// Manager sign-off that an article is accurate.
pub async fn verify_article(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<KnowledgeArticle>> {
    actor.require(UserRole::Manager)?;
    let article = with_conn(&state.conn, move |conn| {
        let updated = diesel::update(knowledge_articles::table.find(id))
            .set((
                knowledge_articles::is_verified.eq(true),
                knowledge_articles::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::NotFound("article not found".to_string()));
        }
        Ok(knowledge_articles::table.find(id).first(conn)?)
    })
    .await?;
    Ok(Json(article))
}

/// Resolved tickets with a solution that have not yet been promoted or
/// dismissed.
pub async fn promotion_candidates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Json<Vec<Ticket>>> {
    actor.require(UserRole::Manager)?;
    let rows = with_conn(&state.conn, move |conn| {
        Ok(tickets::table
            .filter(tickets::status.eq(TicketStatus::Resolved))
            .filter(tickets::is_converted_to_article.eq(false))
            .filter(tickets::solution.is_not_null())
            .order(tickets::resolved_at.desc())
            .limit(50)
            .load(conn)?)
    })
    .await?;
    Ok(Json(rows))
}

/// Turns a resolved ticket's solution into a verified article and marks
/// the ticket converted. Repeating the call is a no-op.
pub async fn promote_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require(UserRole::Manager)?;
    let actor_id = actor.id;
    let outcome = with_conn(&state.conn, move |conn| {
        conn.transaction::<_, AppError, _>(|conn| {
            let ticket: Ticket = tickets::table
                .find(id)
                .first(conn)
                .map_err(|_| AppError::NotFound("ticket not found".to_string()))?;

            match lifecycle::promotion_eligibility(&ticket)? {
                PromotionEligibility::AlreadyConverted => Ok(serde_json::json!({
                    "converted": true,
                    "already": true,
                })),
                PromotionEligibility::Eligible => {
                    let now = Utc::now();
                    let article = KnowledgeArticle {
                        id: Uuid::new_v4(),
                        title: ticket.subject.clone(),
                        content: ticket.solution.clone().unwrap_or_default(),
                        category: ticket.category.clone(),
                        author_id: actor_id,
                        // Promotion carries the manager's sign-off.
                        is_verified: true,
                        views_count: 0,
                        helpful_count: 0,
                        created_at: now,
                        updated_at: now,
                    };
                    diesel::insert_into(knowledge_articles::table)
                        .values(&article)
                        .execute(conn)?;
                    diesel::update(tickets::table.find(id))
                        .set(tickets::is_converted_to_article.eq(true))
                        .execute(conn)?;
                    Ok(serde_json::json!({
                        "converted": true,
                        "article_id": article.id,
                    }))
                }
            }
        })
    })
    .await?;
    Ok(Json(outcome))
}

/// Drops a candidate from the promotion queue without creating an
/// article. Runs the same eligibility gate as promotion, so an unresolved
/// ticket cannot be barred from ever becoming a candidate; dismissal of an
/// already-converted ticket stays an idempotent no-op.
pub async fn dismiss_candidate(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require(UserRole::Manager)?;
    let outcome = with_conn(&state.conn, move |conn| {
        let ticket: Ticket = tickets::table
            .find(id)
            .first(conn)
            .map_err(|_| AppError::NotFound("ticket not found".to_string()))?;

        match lifecycle::promotion_eligibility(&ticket)? {
            PromotionEligibility::AlreadyConverted => Ok(serde_json::json!({
                "dismissed": true,
                "already": true,
            })),
            PromotionEligibility::Eligible => {
                diesel::update(tickets::table.find(id))
                    .set(tickets::is_converted_to_article.eq(true))
                    .execute(conn)?;
                Ok(serde_json::json!({ "dismissed": true }))
            }
        }
    })
    .await?;
    Ok(Json(outcome))
}

pub fn configure_kb_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/kb", get(search_articles).post(create_article))
        .route("/api/kb/candidates", get(promotion_candidates))
        .route("/api/kb/:id", get(article_detail))
        .route("/api/kb/:id/helpful", post(mark_helpful))
        .route("/api/kb/:id/verify", post(verify_article))
        .route("/api/kb/promote/:id", post(promote_ticket))
        .route("/api/kb/dismiss/:id", post(dismiss_candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_normalizes_query() {
        assert_eq!(search_cache_key("  Mic Dead "), "cache:kb:mic dead");
    }
}
