use anyhow::{Context, Result};
use digest_cron::{router, shutdown_signal, AppState};
use threatfeed::{Config, DigestMailer, DigestService, DryRunMailer, ResendMailer, SqliteStore};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    threatfeed::init_tracing();
    let config = Config::from_env()?;

    info!("Initializing state...");
    let store = SqliteStore::open(&config.database_path)?;

    let mailer: Box<dyn DigestMailer> = match config.resend_api_key.clone() {
        Some(api_key) => Box::new(ResendMailer::new(
            api_key,
            config.sender.clone(),
            config.base_url.clone(),
        )?),
        None => {
            warn!("RESEND_API_KEY not set, digests will be rendered but not sent");
            Box::new(DryRunMailer::new(config.base_url.clone()))
        }
    };

    if config.cron_secret.is_none() {
        warn!("CRON_SECRET not set, every trigger request will be refused");
    }

    let service = DigestService::new(store, mailer, config.digest.ranker()?)
        .with_send_concurrency(config.digest.send_concurrency);
    let app = router(AppState::new(service, config.cron_secret.clone()));

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Server running on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}
