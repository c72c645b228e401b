use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub internal_api_key: Option<String>,
    pub settings_cache_ttl_seconds: u64,
    pub settings_cache_max_entries: u64,
    // Billing cycle
    pub invoice_due_day: u32,
    pub penalty_rate_percent: u32,
    pub scheduler_enabled: bool,
    pub notification_retry_interval_seconds: u64,
    pub notification_max_retries: i32,
    // M-Pesa (Daraja)
    pub mpesa_api_base_url: String,
    pub mpesa_consumer_key: Option<String>,
    pub mpesa_consumer_secret: Option<String>,
    pub mpesa_shortcode: Option<String>,
    pub mpesa_passkey: Option<String>,
    pub mpesa_callback_base_url: String,
    pub mpesa_allowed_ips: Vec<String>,
    pub mpesa_request_timeout_seconds: u64,
    // Notification providers
    pub sms_api_url: Option<String>,
    pub sms_api_key: Option<String>,
    pub sms_sender_id: String,
    pub resend_api_key: Option<String>,
    pub email_from_address: String,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_access_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Nyumbani API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            settings_cache_ttl_seconds: env_parse_or("SETTINGS_CACHE_TTL_SECONDS", 60),
            settings_cache_max_entries: env_parse_or("SETTINGS_CACHE_MAX_ENTRIES", 8),
            invoice_due_day: env_parse_or("INVOICE_DUE_DAY", 5).clamp(1, 28),
            penalty_rate_percent: env_parse_or("PENALTY_RATE_PERCENT", 5).min(100),
            scheduler_enabled: env_parse_bool_or("SCHEDULER_ENABLED", true),
            notification_retry_interval_seconds: env_parse_or(
                "NOTIFICATION_RETRY_INTERVAL_SECONDS",
                300,
            ),
            notification_max_retries: env_parse_or("NOTIFICATION_MAX_RETRIES", 3),
            mpesa_api_base_url: env_or("MPESA_API_BASE_URL", "https://sandbox.safaricom.co.ke"),
            mpesa_consumer_key: env_opt("MPESA_CONSUMER_KEY"),
            mpesa_consumer_secret: env_opt("MPESA_CONSUMER_SECRET"),
            mpesa_shortcode: env_opt("MPESA_SHORTCODE"),
            mpesa_passkey: env_opt("MPESA_PASSKEY"),
            mpesa_callback_base_url: env_or("MPESA_CALLBACK_BASE_URL", "http://localhost:8000"),
            mpesa_allowed_ips: parse_csv(&env_or(
                "MPESA_ALLOWED_IPS",
                "196.201.214.200,196.201.214.206,196.201.213.114,196.201.214.207,196.201.214.208,196.201.213.44,196.201.212.127,196.201.212.138,196.201.212.129,196.201.212.136,196.201.212.74,196.201.212.69",
            )),
            mpesa_request_timeout_seconds: env_parse_or("MPESA_REQUEST_TIMEOUT_SECONDS", 30),
            sms_api_url: env_opt("SMS_API_URL"),
            sms_api_key: env_opt("SMS_API_KEY"),
            sms_sender_id: env_or("SMS_SENDER_ID", "NYUMBANI"),
            resend_api_key: env_opt("RESEND_API_KEY"),
            email_from_address: env_or("EMAIL_FROM_ADDRESS", "billing@nyumbani.co.ke"),
            whatsapp_phone_number_id: env_opt("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_access_token: env_opt("WHATSAPP_ACCESS_TOKEN"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Callback source-IP allowlisting is always on in production. Local
    /// development and sandbox tunnels can opt in via MPESA_IP_GUARD_ENABLED.
    pub fn callback_ip_guard_enabled(&self) -> bool {
        self.is_production() || env_parse_bool_or("MPESA_IP_GUARD_ENABLED", false)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn parses_csv_trimming_blanks() {
        assert_eq!(
            parse_csv("196.201.214.200, 196.201.214.206 ,,"),
            vec!["196.201.214.200".to_string(), "196.201.214.206".to_string()]
        );
    }
}
