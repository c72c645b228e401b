use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringCharge {
    pub name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub recurring_charges: Vec<RecurringCharge>,
    #[serde(default = "default_platform_name")]
    pub platform_name: String,
    #[serde(default)]
    pub support_email: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    pub contact_address: String,
}

fn default_platform_name() -> String {
    "Nyumbani".to_string()
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            recurring_charges: Vec::new(),
            platform_name: default_platform_name(),
            support_email: String::new(),
            contact_phone: String::new(),
            contact_address: String::new(),
        }
    }
}

impl SystemSettings {
    pub fn enabled_charges(&self) -> impl Iterator<Item = &RecurringCharge> {
        self.recurring_charges.iter().filter(|c| c.enabled)
    }
}

const SETTINGS_CACHE_KEY: u8 = 0;

/// Settings row read through the moka cache. A missing or malformed row
/// degrades to defaults rather than failing billing runs.
pub async fn get_settings(state: &AppState) -> Arc<SystemSettings> {
    if let Some(cached) = state.settings_cache.get(&SETTINGS_CACHE_KEY).await {
        return cached;
    }

    let loaded = match load_settings(state).await {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(error = %error, "Failed to load system settings, using defaults");
            SystemSettings::default()
        }
    };

    let arc = Arc::new(loaded);
    state
        .settings_cache
        .insert(SETTINGS_CACHE_KEY, arc.clone())
        .await;
    arc
}

async fn load_settings(state: &AppState) -> AppResult<SystemSettings> {
    let Some(pool) = state.db_pool.as_ref() else {
        return Ok(SystemSettings::default());
    };

    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT data FROM system_settings WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    Ok(row
        .and_then(|(data,)| serde_json::from_value(data).ok())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn enabled_charges_filters_disabled() {
        let settings = SystemSettings {
            recurring_charges: vec![
                RecurringCharge { name: "Garbage".into(), amount: dec!(300), enabled: true },
                RecurringCharge { name: "Security".into(), amount: dec!(500), enabled: false },
            ],
            ..SystemSettings::default()
        };
        let enabled: Vec<_> = settings.enabled_charges().collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "Garbage");
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let settings: SystemSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.platform_name, "Nyumbani");
        assert!(settings.recurring_charges.is_empty());
    }
}
