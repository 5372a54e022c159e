use std::sync::Arc;

use tracing::{info, warn};

use hotel_bookings::compactor;
use hotel_bookings::config::Config;
use hotel_bookings::engine::{Engine, EngineError};
use hotel_bookings::mail::{self, LogTransport, Mailer};
use hotel_bookings::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    hotel_bookings::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify, config.store_timeout)?);

    for (id, name) in &config.rooms {
        match engine.create_room(*id, name.clone()).await {
            Ok(room) => info!("seeded room {} ({})", room.id, room.name),
            Err(EngineError::RoomExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });
    let mailer = Mailer {
        from: config.mail_from.clone(),
        owner_email: config.owner_email.clone(),
        transport: Arc::new(LogTransport),
    };
    tokio::spawn(mail::run_mailer(engine.clone(), mailer));

    info!("hotel-bookings ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", engine.room_count());
    info!("  reservations: {}", engine.reservation_count());
    info!("  store_timeout: {:?}", config.store_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }
    info!("hotel-bookings stopped");
    Ok(())
}
