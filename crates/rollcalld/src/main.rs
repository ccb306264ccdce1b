use std::sync::Arc;

use anyhow::Result;
use rollcall_engine::{spawn_engine, EngineConfig, SidecarDetector, SqliteStore};
use rollcall_vault::TemplateCipher;
use tracing_subscriber::EnvFilter;

mod dbus;
mod signals;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = EngineConfig::from_env();
    config
        .quality
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid quality configuration: {e}"))?;

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let cipher = TemplateCipher::new(&config.service_secret)?;
    let signal_timeout_secs = config.signal_timeout_secs;
    let signals = signals::HostSignalSource::new(config.gps_fix_path.clone());

    let engine = spawn_engine(
        Box::new(SidecarDetector),
        cipher,
        store.clone(),
        store.clone(),
        store,
        config,
    );

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Rollcall1")?
        .serve_at(
            "/org/rollcall/Rollcall1",
            dbus::RollcallService::new(engine, signals, signal_timeout_secs),
        )?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
