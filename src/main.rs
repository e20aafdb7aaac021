mod auth;
mod dao;
mod eligibility;
mod error;
mod model;
mod rate_limit;
mod redemption;
mod routes;
mod utils;

use auth::auth;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{serve, Router};
use dotenvy::dotenv;
use rate_limit::{
    rate_limit, RateLimit, RateLimiter, CONFIRM_POLICY, OPEN_SHARE_POLICY, VALIDATE_POLICY,
};
use routes::{
    confirm_redemption, create_coupon, create_share, get_coupon_statistics, health,
    list_coupon_redemptions, open_share, publish_coupon, track_share, validate_redemption,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use utils::get_env;

const DEFAULT_TRACING_LEVEL: &str = "coupon_engine=debug";
const DATABASE_MAX_CONNECTIONS: u32 = 20;
// Daily sweep; expired tokens are already rejected at confirm time, so a
// missed cycle only delays storage reclamation.
const CLEANUP_JOB_CRON_EXPRESSION: &str = "0 0 3 * * *";
const LIMITER_MAX_IDLE: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AppState {
    pub db_connection_pool: Pool<Postgres>,
    pub share_base_url: String,
}

#[tokio::main]
async fn main() {
    _ = dotenv();
    let database_url = get_env("DATABASE_URL");
    let server_address = get_env("SERVER_ADDRESS");
    let share_base_url = get_env("SHARE_BASE_URL");
    configure_tracing();
    let db_connection_pool = create_db_connection_pool(&database_url).await;
    run_migrations(&db_connection_pool).await;
    sweep_expired_tokens(db_connection_pool.clone()).await;
    let limiter = Arc::new(RateLimiter::new());
    configure_scheduler(db_connection_pool.clone(), limiter.clone()).await;
    let listener = create_listener(&server_address).await;
    let state = AppState {
        db_connection_pool,
        share_base_url,
    };
    let router = create_router(state, limiter);
    serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}

fn configure_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or(DEFAULT_TRACING_LEVEL.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn create_db_connection_pool(database_url: &str) -> Pool<Postgres> {
    PgPoolOptions::new()
        .max_connections(DATABASE_MAX_CONNECTIONS)
        .connect(database_url)
        .await
        .expect("Creating database connection pool failed")
}

async fn run_migrations(db_connection_pool: &Pool<Postgres>) {
    sqlx::migrate!()
        .run(db_connection_pool)
        .await
        .expect("Running database migrations failed");
}

async fn sweep_expired_tokens(db_connection_pool: Pool<Postgres>) {
    match dao::delete_expired_tokens(db_connection_pool).await {
        Ok(deleted) => tracing::debug!("Token sweep removed {} expired redeem tokens", deleted),
        Err(err) => tracing::error!("Token sweep failed: {}", err),
    }
}

async fn configure_scheduler(db_connection_pool: Pool<Postgres>, limiter: Arc<RateLimiter>) {
    let scheduler = JobScheduler::new()
        .await
        .expect("Creating scheduler failed");
    scheduler
        .add(create_cleanup_job(
            CLEANUP_JOB_CRON_EXPRESSION,
            db_connection_pool,
            limiter,
        ))
        .await
        .expect("Adding cleanup job to scheduler failed");
    scheduler.start().await.expect("Starting scheduler failed");
}

fn create_cleanup_job(
    cron_expression: &str,
    db_connection_pool: Pool<Postgres>,
    limiter: Arc<RateLimiter>,
) -> Job {
    Job::new_async(cron_expression, move |_, _| {
        let connection_pool = db_connection_pool.clone();
        let limiter = limiter.clone();
        Box::pin(async move {
            sweep_expired_tokens(connection_pool).await;
            let evicted = limiter.evict_idle(Instant::now(), LIMITER_MAX_IDLE);
            tracing::debug!("Evicted {} idle rate limiter windows", evicted);
        })
    })
    .expect("Creating cleanup job failed")
}

async fn create_listener(server_address: &str) -> TcpListener {
    let listener = TcpListener::bind(&server_address)
        .await
        .expect("Creating tcp listener failed");
    tracing::info!("Listening on address: {}", server_address);
    listener
}

fn create_router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let open_share_limit = RateLimit {
        limiter: limiter.clone(),
        policy: OPEN_SHARE_POLICY,
    };
    let validate_limit = RateLimit {
        limiter: limiter.clone(),
        policy: VALIDATE_POLICY,
    };
    let confirm_limit = RateLimit {
        limiter,
        policy: CONFIRM_POLICY,
    };
    Router::new()
        .route(
            "/redeem/:share_id",
            get(open_share).route_layer(from_fn_with_state(open_share_limit, rate_limit)),
        )
        .route(
            "/redemption/validate",
            post(validate_redemption).route_layer(from_fn_with_state(validate_limit, rate_limit)),
        )
        .route(
            "/redemption/confirm",
            post(confirm_redemption).route_layer(from_fn_with_state(confirm_limit, rate_limit)),
        )
        .route("/shares/:id/track", post(track_share))
        .route(
            "/coupons",
            post(create_coupon).route_layer(from_fn_with_state(state.clone(), auth)),
        )
        .route(
            "/coupons/:id/publish",
            post(publish_coupon).route_layer(from_fn_with_state(state.clone(), auth)),
        )
        .route(
            "/coupons/:id/shares",
            post(create_share).route_layer(from_fn_with_state(state.clone(), auth)),
        )
        .route(
            "/coupons/:id/redemptions",
            get(list_coupon_redemptions).route_layer(from_fn_with_state(state.clone(), auth)),
        )
        .route(
            "/coupons/:id/statistics",
            get(get_coupon_statistics).route_layer(from_fn_with_state(state.clone(), auth)),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
