//! First-run bootstrap. An empty users table gets a manager account, two
//! staff accounts and the morning readiness routine so a fresh install is
//! immediately usable.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::shared::error::AppError;
use crate::shared::models::{RoutineTemplate, User, UserRole};
use crate::shared::schema::{routine_templates, users};
use crate::shared::utils::{with_conn, DbPool};

fn user(email: &str, name: &str, role: UserRole, password: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: hash_password(password),
        full_name: name.to_string(),
        role,
        avatar_url: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub async fn seed_if_empty(pool: &DbPool) -> Result<(), AppError> {
    with_conn(pool, |conn| {
        let existing: i64 = users::table.count().get_result(conn)?;
        if existing > 0 {
            return Ok(());
        }

        let default_password =
            std::env::var("SEED_PASSWORD").unwrap_or_else(|_| "changeme".to_string());
        let manager = user(
            "manager@opsdesk.local",
            "Ops Manager",
            UserRole::Manager,
            &default_password,
        );
        let staff = [
            user(
                "tech1@opsdesk.local",
                "Broadcast Tech 1",
                UserRole::Staff,
                &default_password,
            ),
            user(
                "tech2@opsdesk.local",
                "Broadcast Tech 2",
                UserRole::Staff,
                &default_password,
            ),
        ];
        diesel::insert_into(users::table)
            .values(&manager)
            .execute(conn)?;
        diesel::insert_into(users::table)
            .values(&staff.to_vec())
            .execute(conn)?;

        let template = RoutineTemplate {
            id: Uuid::new_v4(),
            title: "Morning readiness check".to_string(),
            cron_schedule: "0 7 * * *".to_string(),
            deadline_minutes: 120,
            checklist_items: serde_json::json!([
                "Check studio microphones",
                "Check camera feeds",
                "Check MCR router",
                "Check intercom panels",
                "Check UPS status",
            ]),
            created_by: manager.id,
            is_active: true,
        };
        diesel::insert_into(routine_templates::table)
            .values(&template)
            .execute(conn)?;

        log::info!("seeded default accounts and the morning routine");
        Ok(())
    })
    .await
}
