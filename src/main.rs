use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dentbook::config::AppConfig;
use dentbook::db;
use dentbook::handlers;
use dentbook::services::messaging::telegram::TelegramProvider;
use dentbook::services::messaging::MessagingProvider;
use dentbook::services::reminders::ReminderScheduler;
use dentbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    anyhow::ensure!(!config.bot_token.is_empty(), "BOT_TOKEN must be set");
    if config.admin_ids.is_empty() {
        tracing::warn!("ADMIN_IDS is empty, admin flows are disabled");
    }

    let conn = db::init_db(&config.database_url)?;

    let messaging: Arc<dyn MessagingProvider> =
        Arc::new(TelegramProvider::new(config.bot_token.clone()));

    let state = Arc::new(AppState::new(conn, config.clone(), messaging.clone()));

    let reminders = Arc::new(ReminderScheduler::new(state.db.clone(), messaging));
    reminders.spawn(Duration::from_secs(config.reminder_interval_secs.max(1)));
    tracing::info!(
        interval_secs = config.reminder_interval_secs,
        "reminder scheduler started"
    );

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
