//! Startup schema bootstrap. The DDL is idempotent so every boot runs it
//! before seeding; existing tables are left untouched.

use diesel::connection::SimpleConnection;

use crate::shared::error::AppError;
use crate::shared::utils::{with_conn, DbPool};

/// `ticket_number` is a database identity column so concurrent inserts
/// each get a distinct human-facing number.
const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL,
    avatar_url TEXT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS tickets (
    id UUID PRIMARY KEY,
    ticket_number BIGINT GENERATED BY DEFAULT AS IDENTITY UNIQUE NOT NULL,
    location TEXT NOT NULL,
    priority TEXT NOT NULL,
    category TEXT NOT NULL,
    subject TEXT NOT NULL,
    description TEXT NOT NULL,
    solution TEXT,
    proof_image_url TEXT,
    requester_id UUID NOT NULL REFERENCES users(id),
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    first_response_at TIMESTAMPTZ,
    resolved_at TIMESTAMPTZ,
    closed_at TIMESTAMPTZ,
    is_handover BOOLEAN NOT NULL DEFAULT FALSE,
    is_converted_to_article BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
CREATE INDEX IF NOT EXISTS idx_tickets_created_at ON tickets(created_at);
CREATE INDEX IF NOT EXISTS idx_tickets_requester ON tickets(requester_id);

CREATE TABLE IF NOT EXISTS ticket_activities (
    id UUID PRIMARY KEY,
    ticket_id UUID NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    actor_id UUID NOT NULL REFERENCES users(id),
    kind TEXT NOT NULL,
    note TEXT NOT NULL,
    previous_value TEXT,
    new_value TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_ticket_activities_ticket ON ticket_activities(ticket_id);

CREATE TABLE IF NOT EXISTS knowledge_articles (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL,
    author_id UUID NOT NULL REFERENCES users(id),
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    views_count INTEGER NOT NULL DEFAULT 0,
    helpful_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS routine_templates (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    cron_schedule TEXT NOT NULL,
    deadline_minutes INTEGER NOT NULL,
    checklist_items JSONB NOT NULL,
    created_by UUID NOT NULL REFERENCES users(id),
    is_active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS routine_instances (
    id UUID PRIMARY KEY,
    template_id UUID NOT NULL REFERENCES routine_templates(id) ON DELETE CASCADE,
    assigned_user_id UUID NOT NULL REFERENCES users(id),
    checklist_state JSONB NOT NULL,
    generated_at TIMESTAMPTZ NOT NULL,
    due_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_routine_instances_user ON routine_instances(assigned_user_id);

CREATE TABLE IF NOT EXISTS shifts (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ NOT NULL,
    label TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS push_subscriptions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    endpoint TEXT NOT NULL UNIQUE,
    p256dh TEXT NOT NULL,
    auth TEXT NOT NULL
);
"#;

pub async fn ensure_schema(pool: &DbPool) -> Result<(), AppError> {
    with_conn(pool, |conn| {
        conn.batch_execute(SCHEMA_DDL)?;
        Ok(())
    })
    .await?;
    log::info!("schema bootstrap complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_covers_every_table() {
        for table in [
            "users",
            "tickets",
            "ticket_activities",
            "knowledge_articles",
            "routine_templates",
            "routine_instances",
            "shifts",
            "push_subscriptions",
        ] {
            assert!(
                SCHEMA_DDL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table: {table}"
            );
        }
    }

    #[test]
    fn ticket_numbers_are_database_generated_and_unique() {
        assert!(SCHEMA_DDL
            .contains("ticket_number BIGINT GENERATED BY DEFAULT AS IDENTITY UNIQUE NOT NULL"));
    }

    #[test]
    fn ddl_is_idempotent() {
        assert!(!SCHEMA_DDL.contains("DROP TABLE"));
        for stmt in SCHEMA_DDL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            assert!(
                stmt.starts_with("CREATE TABLE IF NOT EXISTS")
                    || stmt.starts_with("CREATE INDEX IF NOT EXISTS"),
                "non-idempotent statement: {stmt}"
            );
        }
    }
}
