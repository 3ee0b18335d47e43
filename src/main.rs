use tokio::net::TcpListener;
use tracing::{error, info};
use tripmate::config::AppConfig;
use tripmate::db::{init_pool, run_migrations};
use tripmate::error::AppError;
use tripmate::routes::create_router;
use tripmate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = run_migrations(&db).await {
        error!("migration failed: {err:?}");
        return Err(err);
    }

    info!(
        mail_backend = ?config.mail_backend,
        timezone = %config.timezone,
        catch_up = config.scan_catch_up,
        cron_token = config.cron_token.is_some(),
        "starting tripmate"
    );

    let state = AppState::new(config.clone(), db);
    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tripmate=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
