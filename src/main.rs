use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{info, warn};

use encore_api as api;
use encore_api::services::payments::{PaymentGateway, StripeGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&pool).await?;
    }
    let db = Arc::new(pool);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // One gateway per process, injected everywhere it is needed.
    let gateway: Option<Arc<dyn PaymentGateway>> = match cfg.stripe_secret_key.clone() {
        Some(secret_key) => {
            info!("payment gateway configured");
            Some(Arc::new(StripeGateway::new(
                secret_key,
                cfg.stripe_api_base.clone(),
            )))
        }
        None => {
            warn!("stripe_secret_key not set; priced checkouts will be rejected");
            None
        }
    };

    let orders = Arc::new(api::services::orders::OrderService::new(
        db.clone(),
        event_sender.clone(),
    ));
    let checkout = Arc::new(api::services::checkout::CheckoutService::new(
        db.clone(),
        gateway.clone(),
        event_sender.clone(),
        &cfg,
    ));

    api::services::reconciliation::start_sweeper(
        db.clone(),
        orders.clone(),
        gateway.clone(),
        cfg.reconcile_interval_secs,
        cfg.reconcile_pending_max_age_secs,
    );

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        gateway,
        services: api::handlers::AppServices { checkout, orders },
    };
    let app = api::app_router(state);

    let addr: SocketAddr = cfg
        .server_addr()
        .parse()
        .context("invalid listen address")?;
    info!(%addr, "starting encore-api");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
