use std::net::SocketAddr;
use std::sync::Arc;

use opsdesk::config::AppConfig;
use opsdesk::notifications::Notifier;
use opsdesk::shared::rate_limit::KeyedRateLimiter;
use opsdesk::shared::state::AppState;
use opsdesk::shared::utils::create_conn;
use opsdesk::{build_router, routines, seed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database_url)?;

    let cache = match &config.redis_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                log::warn!("redis unavailable, running without cache/chat: {e}");
                None
            }
        },
        None => {
            log::info!("REDIS_URL not set, running without cache/chat");
            None
        }
    };

    let notifier = Notifier::spawn(pool.clone());
    let state = Arc::new(AppState {
        conn: pool.clone(),
        cache,
        config: config.clone(),
        notifier,
        // Anonymous quick reports are capped per source address.
        report_limiter: KeyedRateLimiter::per_hour(3),
    });

    opsdesk::shared::bootstrap::ensure_schema(&pool).await?;
    seed::seed_if_empty(&pool).await?;
    routines::spawn_scheduler(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("opsdesk listening on {addr}");
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
