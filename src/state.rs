use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::services::settings::SystemSettings;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    pub settings_cache: Cache<u8, Arc<SystemSettings>>,
    /// Reentrancy guard for the settlement sweep. Single-process deployment;
    /// a multi-instance rollout needs an advisory lease in the store instead.
    pub settlement_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let settings_cache = Cache::builder()
            .max_capacity(config.settings_cache_max_entries)
            .time_to_live(Duration::from_secs(config.settings_cache_ttl_seconds))
            .build();

        let db_pool = crate::db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — billing engine is inert");
        }

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            settings_cache,
            settlement_running: Arc::new(AtomicBool::new(false)),
        })
    }
}
