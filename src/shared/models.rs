use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

use crate::shared::schema::{
    knowledge_articles, push_subscriptions, routine_instances, routine_templates, shifts,
    ticket_activities, tickets, users,
};

/// Declares a closed string enum stored as TEXT, with serde and diesel
/// mappings. Unknown strings are rejected at every boundary.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
        )]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("unrecognized ", stringify!($name), ": {}"),
                        other
                    )),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
                let s = std::str::from_utf8(value.as_bytes())?;
                s.parse::<$name>().map_err(|e| e.into())
            }
        }
    };
}

text_enum!(UserRole {
    Consumer => "CONSUMER",
    Staff => "STAFF",
    Manager => "MANAGER",
});

text_enum!(TicketStatus {
    Open => "OPEN",
    InProgress => "IN_PROGRESS",
    Handover => "HANDOVER",
    Resolved => "RESOLVED",
    Closed => "CLOSED",
});

text_enum!(TicketPriority {
    Normal => "NORMAL",
    High => "HIGH",
    UrgentOnAir => "URGENT_ON_AIR",
});

text_enum!(Location {
    Studio1 => "STUDIO_1",
    Studio2 => "STUDIO_2",
    Mcr => "MCR",
    EditingRoom => "EDITING_ROOM",
    Office => "OFFICE",
    ObVan => "OB_VAN",
});

text_enum!(ActivityKind {
    Created => "CREATED",
    Reply => "REPLY",
    Handover => "HANDOVER",
    Resolve => "RESOLVE",
    StatusChange => "STATUS_CHANGE",
});

text_enum!(RoutineStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
});

/// Ticket categories accepted at ingestion. Free-form values are rejected.
pub const TICKET_CATEGORIES: [&str; 5] =
    ["AUDIO", "VIDEO", "IT_NETWORK", "SOFTWARE", "ELECTRICAL"];

pub fn validate_category(category: &str) -> Result<(), String> {
    if TICKET_CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err(format!("unrecognized category: {category}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub role: UserRole,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: i64,
    pub location: Location,
    pub priority: TicketPriority,
    pub category: String,
    pub subject: String,
    pub description: String,
    pub solution: Option<String>,
    pub proof_image_url: Option<String>,
    pub requester_id: Uuid,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_handover: bool,
    pub is_converted_to_article: bool,
}

/// Insert form of [`Ticket`]. `ticket_number` is generated by the
/// database so concurrent creates cannot collide on the human-facing
/// number.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub location: Location,
    pub priority: TicketPriority,
    pub category: String,
    pub subject: String,
    pub description: String,
    pub solution: Option<String>,
    pub proof_image_url: Option<String>,
    pub requester_id: Uuid,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_handover: bool,
    pub is_converted_to_article: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_activities)]
pub struct TicketActivity {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub kind: ActivityKind,
    pub note: String,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = knowledge_articles)]
pub struct KnowledgeArticle {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub author_id: Uuid,
    pub is_verified: bool,
    pub views_count: i32,
    pub helpful_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = routine_templates)]
pub struct RoutineTemplate {
    pub id: Uuid,
    pub title: String,
    pub cron_schedule: String,
    pub deadline_minutes: i32,
    /// JSON array of item labels, e.g. `["Check mics", "Check lights"]`.
    pub checklist_items: serde_json::Value,
    pub created_by: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = routine_instances)]
pub struct RoutineInstance {
    pub id: Uuid,
    pub template_id: Uuid,
    pub assigned_user_id: Uuid,
    /// JSON object mapping item label to done flag.
    pub checklist_state: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RoutineStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = shifts)]
pub struct Shift {
    pub id: Uuid,
    pub user_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = push_subscriptions)]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Handover,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(s.as_str().parse::<TicketStatus>(), Ok(s));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("REOPENED".parse::<TicketStatus>().is_err());
        assert!("open".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn priority_and_location_parse() {
        assert_eq!(
            "URGENT_ON_AIR".parse::<TicketPriority>(),
            Ok(TicketPriority::UrgentOnAir)
        );
        assert_eq!("OB_VAN".parse::<Location>(), Ok(Location::ObVan));
        assert!("ROOFTOP".parse::<Location>().is_err());
    }

    #[test]
    fn category_allow_list() {
        assert!(validate_category("AUDIO").is_ok());
        assert!(validate_category("CATERING").is_err());
        assert!(validate_category("").is_err());
    }

    #[test]
    fn enum_serde_uses_wire_names() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let back: UserRole = serde_json::from_str("\"STAFF\"").unwrap();
        assert_eq!(back, UserRole::Staff);
    }
}
