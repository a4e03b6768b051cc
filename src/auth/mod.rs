use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{User, UserRole};
use crate::shared::schema::users;
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

pub const SESSION_COOKIE: &str = "od_uid";

pub fn hash_password(password: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    hash_password(password) == hash
}

/// Authenticated caller: opaque id plus role. Handlers authorize by role
/// only, never by identity mechanics.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub role: UserRole,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

impl Actor {
    pub fn require(&self, role: UserRole) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "requires {role} role",
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Unauthorized("login required".to_string()))?;
        let user_id = cookies
            .get(SESSION_COOKIE)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
            .ok_or_else(|| AppError::Unauthorized("login required".to_string()))?;

        let user: User = with_conn(&state.conn, move |conn| {
            users::table
                .find(user_id)
                .first(conn)
                .map_err(|_| AppError::Unauthorized("unknown session".to_string()))
        })
        .await?;

        if !user.is_active {
            return Err(AppError::Unauthorized("account disabled".to_string()));
        }

        Ok(Actor {
            id: user.id,
            role: user.role,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email or bare username; a bare username matches the mailbox prefix.
    pub email: String,
    pub password: String,
}

/// Case-insensitive match pattern for the login input. A full address
/// matches exactly; a bare username matches the whole mailbox prefix, so
/// "tech1" finds "tech1@station.tv" but never "tech10@station.tv".
fn login_match_pattern(input: &str) -> String {
    let escaped = input
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    if escaped.contains('@') {
        escaped
    } else {
        format!("{escaped}@%")
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<User>> {
    if req.email.is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let pattern = login_match_pattern(&req.email);
    let user: User = with_conn(&state.conn, move |conn| {
        users::table
            .filter(users::email.ilike(pattern))
            .first(conn)
            .map_err(|_| AppError::Unauthorized("invalid credentials".to_string()))
    })
    .await?;

    if !user.is_active || !verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized("invalid credentials".to_string()));
    }

    let mut cookie = Cookie::new(SESSION_COOKIE, user.id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookies.add(cookie);

    log::info!("user {} logged in", user.email);
    Ok(Json(user))
}

pub async fn logout(cookies: Cookies) -> Json<serde_json::Value> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
    Json(serde_json::json!({ "ok": true }))
}

pub async fn me(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Json<User>> {
    let id = actor.id;
    let user: User =
        with_conn(&state.conn, move |conn| Ok(users::table.find(id).first(conn)?)).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<User>> {
    let id = actor.id;
    let user: User = with_conn(&state.conn, move |conn| {
        let now = Utc::now();
        if let Some(full_name) = req.full_name.filter(|n| !n.trim().is_empty()) {
            diesel::update(users::table.find(id))
                .set((users::full_name.eq(full_name), users::updated_at.eq(now)))
                .execute(conn)?;
        }
        if let Some(avatar_url) = req.avatar_url {
            diesel::update(users::table.find(id))
                .set((users::avatar_url.eq(avatar_url), users::updated_at.eq(now)))
                .execute(conn)?;
        }
        Ok(users::table.find(id).first(conn)?)
    })
    .await?;
    Ok(Json(user))
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/profile", post(update_profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_password() {
        let hash = hash_password("123456");
        assert!(verify_password("123456", &hash));
        assert!(!verify_password("1234567", &hash));
        assert_ne!(hash, "123456");
    }

    #[test]
    fn login_pattern_is_exact_per_mailbox() {
        // A bare username anchors on the "@" so "tech1" cannot select
        // "tech10@station.tv".
        assert_eq!(login_match_pattern("tech1"), "tech1@%");
        assert_eq!(login_match_pattern(" Tech1 "), "tech1@%");
        // A full address matches exactly, with LIKE wildcards escaped.
        assert_eq!(
            login_match_pattern("Tech1@Station.tv"),
            "tech1@station.tv"
        );
        assert_eq!(
            login_match_pattern("shift_lead@station.tv"),
            "shift\\_lead@station.tv"
        );
    }

    #[test]
    fn role_gate() {
        let actor = Actor {
            id: Uuid::new_v4(),
            role: UserRole::Staff,
            full_name: "Shift Tech".to_string(),
            avatar_url: None,
        };
        assert!(actor.require(UserRole::Staff).is_ok());
        assert!(actor.require(UserRole::Manager).is_err());
    }
}
