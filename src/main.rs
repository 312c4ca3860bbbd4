mod api;
mod categories;
mod config;
mod db;
mod dispatcher;
mod error;
mod greeting;
mod logging;
mod metrics;
mod models;
mod ordering;
mod overlay;
mod payment;
mod posts;
mod push;
mod remote_config;
mod session;
mod storage;

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::{
    signal,
    sync::{mpsc, oneshot},
};
use tracing::{error, info};

use categories::CategoryStore;
use payment::{PaymentService, RazorpayClient};
use session::SessionRegistry;
use storage::MediaStore;

const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 3600);

fn main() -> Result<()> {
    // Build custom runtime with explicit thread configuration
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get);

    println!("Starting with {} Tokio worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // Initialize logging first thing
        logging::setup_logging();

        // Load environment variables from .env file if present
        dotenv::dotenv().ok();

        info!("Starting Prime Status backend");

        let config = config::Config::from_env()?;

        let db_pool = db::init_db_pool(&config.database_url).await?;

        // Repair the category collection before serving anything
        let categories = CategoryStore::new(db_pool.clone());
        let local_now = || OffsetDateTime::now_utc().to_offset(config.local_offset);
        let initial = categories.load(local_now()).await?;
        info!(count = initial.len(), "Categories repaired at startup");

        // Keep the greeting categories in step with the clock
        let refresher = categories.clone();
        let local_offset = config.local_offset;
        let refresh_every = Duration::from_secs(config.category_refresh_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_every);
            loop {
                interval.tick().await;
                let now = OffsetDateTime::now_utc().to_offset(local_offset);
                match refresher.refresh_dynamic(now).await {
                    Ok(true) => info!("Dynamic category names refreshed"),
                    Ok(false) => {}
                    Err(e) => error!("Error refreshing dynamic categories: {}", e),
                }
            }
        });

        let fcm_client = push::FcmClient::new(
            &config.fcm_api_url,
            &config.fcm_project_id,
            &config.fcm_access_token,
        )?;

        let payments = PaymentService::new(RazorpayClient::new(
            &config.razorpay_api_url,
            &config.razorpay_key_id,
            &config.razorpay_key_secret,
            config.payment_callback_url.clone(),
        )?);

        // Create channels for the notification pipeline
        let (id_sender, id_receiver) = mpsc::channel(1000);

        // Create shutdown signal
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let listener_handle = tokio::spawn(dispatcher::run_notification_listener(
            db_pool.clone(),
            id_sender,
            shutdown_rx,
        ));

        // Exits once the listener drops its sender
        let dispatcher_handle = tokio::spawn(dispatcher::run_notification_dispatcher(
            id_receiver,
            fcm_client,
            dispatcher::PgNotificationStore::new(db_pool.clone()),
        ));

        // Spawn API server
        let api_state = Arc::new(api::ApiState {
            db_pool: db_pool.clone(),
            categories,
            sessions: SessionRegistry::new(SESSION_IDLE_TIMEOUT),
            payments,
            media: MediaStore::new(&config.media_root, &config.media_base_url),
            media_root: config.media_root.clone(),
            admin_api_key: config.admin_api_key.clone(),
            webhook_secret: config.razorpay_webhook_secret.clone(),
            local_offset: config.local_offset,
        });
        let api_router = api::create_api_router(api_state);

        let addr = config.api_bind_address.clone();
        let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Starting API server on {}", addr);

        let api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp_listener, api_router).await {
                error!("API server stopped: {}", e);
            }
        });

        // Handle graceful shutdown
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, shutting down gracefully");
            }
        }

        // Send shutdown signal to tasks
        let _ = shutdown_tx.send(());
        api_handle.abort();

        let (listener_result, dispatcher_result, _) =
            tokio::join!(listener_handle, dispatcher_handle, api_handle);
        for result in [listener_result, dispatcher_result] {
            match result {
                Ok(Err(e)) => error!("Notification task failed: {:#}", e),
                Err(e) if !e.is_cancelled() => error!("Notification task panicked: {}", e),
                _ => {}
            }
        }

        info!("Shutdown complete");
        Ok(())
    })
}
