use std::env;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub patient_session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    /// When set, the reminder job must present it as `x-api-key`.
    pub cron_api_key: Option<String>,
    /// No mail transport exists, so password-reset tokens are only handed
    /// back in the response when this is switched on.
    pub expose_reset_token: bool,
    pub clinic_utc_offset_minutes: i32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 24),
            patient_session_ttl_hours: parse_or("PATIENT_SESSION_TTL_HOURS", 72),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10),
            run_migrations: flag_or("RUN_MIGRATIONS", true),
            cron_api_key: env::var("CRON_API_KEY")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            expose_reset_token: flag_or("EXPOSE_RESET_TOKEN", false),
            clinic_utc_offset_minutes: parse_or("CLINIC_TIMEZONE_OFFSET_MINUTES", 0),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn flag_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => parse_flag(&v).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("nope"), None);
    }
}
