use axum::routing::get;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vendibook_backend::handlers;
use vendibook_backend::jobs;
use vendibook_backend::services::auth::HttpIdentityProvider;
use vendibook_backend::services::notifier::{EmailRelay, Notifier, SupportDesk};
use vendibook_backend::services::payments::StripeGateway;
use vendibook_backend::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vendibook_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let payments = StripeGateway::new(
        env::var("PAYMENTS_API_KEY").expect("PAYMENTS_API_KEY must be set"),
        env::var("PAYMENTS_BASE_URL").unwrap_or_else(|_| "https://api.stripe.com".to_string()),
    );

    let auth = HttpIdentityProvider::new(
        env::var("AUTH_BASE_URL").expect("AUTH_BASE_URL must be set"),
        env::var("AUTH_API_KEY").unwrap_or_default(),
    );

    let email = match (env::var("EMAIL_RELAY_URL"), env::var("EMAIL_RELAY_KEY")) {
        (Ok(url), Ok(key)) => Some(EmailRelay::new(url, key)),
        _ => {
            tracing::warn!("EMAIL_RELAY_URL/EMAIL_RELAY_KEY not set, email channel disabled");
            None
        }
    };
    let support = match (env::var("SUPPORT_DESK_URL"), env::var("SUPPORT_DESK_KEY")) {
        (Ok(url), Ok(key)) => Some(SupportDesk::new(url, key)),
        _ => {
            tracing::warn!("SUPPORT_DESK_URL/SUPPORT_DESK_KEY not set, ticket channel disabled");
            None
        }
    };
    let notifier = Notifier::new(db.clone(), email, support);

    let state = AppState {
        db: db.clone(),
        payments: Arc::new(payments),
        auth: Arc::new(auth),
        notifier: notifier.clone(),
    };

    // Background loops: outbox sweep and deferred-payout retry
    let dispatch_secs = env_u64("OUTBOX_DISPATCH_SECS", 30);
    jobs::outbox_dispatch::start_outbox_dispatch_job(db.clone(), notifier, dispatch_secs).await;

    let retry_secs = env_u64("PAYOUT_RETRY_SECS", 600);
    jobs::payout_retry::start_payout_retry_job(db.clone(), state.payments.clone(), retry_secs)
        .await;

    // Build router
    let app = handlers::api_router()
        .route("/", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .unwrap();

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "Vendibook escrow service"
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
