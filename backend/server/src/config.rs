use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Missing required setting {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioMode {
    Off,
    Rpi,
}

impl FromStr for GpioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(GpioMode::Off),
            "rpi" => Ok(GpioMode::Rpi),
            other => Err(format!("unknown GPIO mode {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub department: String,
    pub serial: String,
    pub database_url: String,
    pub database_secret: Option<String>,
    pub identity_url: String,
    pub identity_api_key: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_ttl: Duration,
    pub super_admin_email: String,
    pub super_admin_password: String,
    pub org_email_domain: String,
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
    pub allowed_origins: Vec<String>,
    pub gpio_mode: GpioMode,
    pub button_pin: u8,
    pub pump_pin: u8,
    pub pump_active_low: bool,
    pub upstream_timeout: Duration,
    pub upstream_retries: u32,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let jwt_ttl_minutes: u64 = try_load("JWT_TTL_MINUTES", "60")?;
        let upstream_timeout_ms: u64 = try_load("UPSTREAM_TIMEOUT_MS", "5000")?;
        let allowed_origins: String = try_load("ALLOWED_ORIGINS", "http://localhost:5173")?;

        Ok(Self {
            port: try_load("RUST_PORT", "8000")?,
            department: try_load("FOUNTAIN_DEPARTMENT", "EPHEC01")?,
            serial: try_load("FOUNTAIN_SERIAL", "M02")?,
            database_url: try_load("DATABASE_URL", "memory")?,
            database_secret: read_optional_secret("DATABASE_SECRET"),
            identity_url: try_load(
                "IDENTITY_URL",
                "https://identitytoolkit.googleapis.com/v1",
            )?,
            identity_api_key: read_optional_secret("IDENTITY_API_KEY"),
            jwt_secret: read_secret("JWT_SECRET")?,
            jwt_issuer: try_load("JWT_ISSUER", "jemlo-backend")?,
            jwt_audience: try_load("JWT_AUDIENCE", "jemlo-dashboard")?,
            jwt_ttl: Duration::from_secs(jwt_ttl_minutes * 60),
            super_admin_email: required("SUPER_ADMIN_EMAIL")?,
            super_admin_password: read_secret("SUPER_ADMIN_PASSWORD")?,
            org_email_domain: try_load("ORG_EMAIL_DOMAIN", "@jemlo.be")?,
            cookie_secure: try_load("COOKIE_SECURE", "false")?,
            cookie_domain: var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty()),
            allowed_origins: split_list(&allowed_origins),
            gpio_mode: try_load("GPIO_MODE", "off")?,
            button_pin: try_load("BUTTON_PIN", "17")?,
            pump_pin: try_load("PUMP_PIN", "27")?,
            pump_active_low: try_load("PUMP_ACTIVE_LOW", "false")?,
            upstream_timeout: Duration::from_millis(upstream_timeout_ms),
            upstream_retries: try_load("UPSTREAM_RETRIES", "2")?,
        })
    }

    /// Department code followed by the device serial, e.g. `EPHEC01M02`.
    pub fn device_id(&self) -> String {
        format!("{}{}", self.department, self.serial)
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Docker secret first, then the environment variable of the same name.
fn read_secret(secret_name: &str) -> Result<String, ConfigError> {
    read_optional_secret(secret_name).ok_or_else(|| ConfigError::Missing(secret_name.to_string()))
}

fn read_optional_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
        .or_else(|| env::var(secret_name).ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_mode_parses_case_insensitively() {
        assert_eq!("RPI".parse::<GpioMode>(), Ok(GpioMode::Rpi));
        assert_eq!(" off ".parse::<GpioMode>(), Ok(GpioMode::Off));
        assert!("sysfs".parse::<GpioMode>().is_err());
    }

    #[test]
    fn origin_list_skips_blanks() {
        assert_eq!(
            split_list("http://a.test, ,http://b.test,"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
