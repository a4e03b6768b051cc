use chrono::FixedOffset;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub uploads: UploadConfig,
    pub push: PushConfig,
    /// Hour offset from UTC used for calendar-day KPI bucketing and for
    /// interpreting wall-clock inputs (shift forms, CSV imports).
    pub report_tz_offset_hours: i32,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct UploadConfig {
    pub dir: String,
}

#[derive(Clone)]
pub struct PushConfig {
    /// Opaque application-server key handed to browser clients. Delivery
    /// itself treats the push service as an external sink.
    pub vapid_public_key: String,
    pub subscriber: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env_or("APP_PORT", "8080")
            .parse::<u16>()
            .map_err(|e| anyhow::anyhow!("invalid APP_PORT: {e}"))?;
        let report_tz_offset_hours = env_or("REPORT_TZ_OFFSET_HOURS", "7")
            .parse::<i32>()
            .map_err(|e| anyhow::anyhow!("invalid REPORT_TZ_OFFSET_HOURS: {e}"))?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("APP_HOST", "0.0.0.0"),
                port,
            },
            database_url: env_or(
                "DATABASE_URL",
                "postgres://opsdesk:@localhost:5432/opsdesk",
            ),
            redis_url: std::env::var("REDIS_URL").ok(),
            uploads: UploadConfig {
                dir: env_or("UPLOAD_DIR", "web/uploads"),
            },
            push: PushConfig {
                vapid_public_key: env_or("VAPID_PUBLIC_KEY", ""),
                subscriber: env_or("PUSH_SUBSCRIBER", "mailto:ops@example.com"),
            },
            report_tz_offset_hours,
        })
    }

    pub fn report_tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.report_tz_offset_hours * 3600)
            .or_else(|| FixedOffset::east_opt(0))
            .expect("zero offset is always in range")
    }
}
