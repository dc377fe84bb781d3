use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use homeware_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level);

    let db = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;
    }
    let db = Arc::new(db);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let admin_guard = Arc::new(api::auth::AdminGuard::new(cfg.admin_email_set()));
    let services = api::AppServices::new(db.clone(), admin_guard, Some(event_sender));

    let state = api::AppState {
        db,
        config: cfg.clone(),
        services,
    };

    let addr = cfg.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, environment = %cfg.environment, "homeware-api listening");

    axum::serve(listener, api::app_router(state))
        .await
        .context("server error")?;

    Ok(())
}
