use ad_metrics_worker::api::{build_app, AppState};
use ad_metrics_worker::config::Config;
use ad_metrics_worker::db::Database;
use ad_metrics_worker::email::EmailNotifier;
use ad_metrics_worker::tiktok::TikTokApi;
use ad_metrics_worker::worker::AdWorker;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ad_metrics_worker=info".parse()?),
        )
        .init();

    // `once` runs a single cycle for every configured advertiser and exits.
    let once = std::env::args().nth(1).as_deref() == Some("once");

    let config = Config::from_env()?;

    let db = Database::new(&config.database)
        .await
        .context("connecting to database")?;
    db.ensure_schema().await.context("creating schema")?;

    let ads = TikTokApi::new(&config.tiktok).context("building TikTok client")?;
    let notifier = EmailNotifier::new(&config.smtp).context("building SMTP transport")?;

    let worker = Arc::new(AdWorker::new(
        Arc::new(ads),
        Arc::new(db),
        Arc::new(notifier),
        config.worker.alert_threshold_cpc,
    ));

    if once {
        let failures = worker.run_once(&config.worker.advertiser_ids).await;
        if failures > 0 {
            anyhow::bail!("{} advertiser cycle(s) failed", failures);
        }
        return Ok(());
    }

    {
        let worker = Arc::clone(&worker);
        let advertiser_ids = config.worker.advertiser_ids.clone();
        let period = Duration::from_secs(config.worker.interval_secs);
        tokio::spawn(async move {
            worker.run(advertiser_ids, period).await;
        });
    }

    let app = build_app(AppState { worker });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Ad metrics worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shut down");
    Ok(())
}
