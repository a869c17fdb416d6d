use std::{
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use thiserror::Error;

use crate::relay::DEFAULT_TELEGRAM_API_BASE_URL;
use crate::types::ChannelAddress;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayDriver {
    Log,
    Telegram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub service_name: String,
    pub build_sha: String,
    pub db_url: Option<String>,
    pub primary_write_timeout: Duration,
    pub fallback_store_path: PathBuf,
    pub audit_log_path: Option<PathBuf>,
    pub directory_path: Option<PathBuf>,
    pub directory_refresh_interval: Duration,
    pub operations_address: ChannelAddress,
    pub relay_driver: RelayDriver,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base_url: String,
    pub relay_timeout: Duration,
    pub delivery_max_attempts: u32,
    pub delivery_base_backoff: Duration,
    pub max_message_chars: usize,
    pub max_notification_chars: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid LEADS_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid LEADS_PRIMARY_WRITE_TIMEOUT_MS: {0}")]
    InvalidPrimaryWriteTimeoutMs(String),
    #[error("invalid LEADS_DIRECTORY_REFRESH_SECONDS: {0}")]
    InvalidDirectoryRefreshSeconds(String),
    #[error("invalid LEADS_RELAY_DRIVER: {0}")]
    InvalidRelayDriver(String),
    #[error("LEADS_OPERATIONS_ADDRESS is required when LEADS_RELAY_DRIVER=telegram")]
    MissingOperationsAddress,
    #[error("invalid LEADS_RELAY_TIMEOUT_MS: {0}")]
    InvalidRelayTimeoutMs(String),
    #[error("invalid LEADS_DELIVERY_MAX_ATTEMPTS: {0}")]
    InvalidDeliveryMaxAttempts(String),
    #[error("invalid LEADS_DELIVERY_BASE_BACKOFF_MS: {0}")]
    InvalidDeliveryBaseBackoffMs(String),
    #[error("invalid LEADS_MAX_MESSAGE_CHARS: {0}")]
    InvalidMaxMessageChars(String),
    #[error("invalid LEADS_MAX_NOTIFICATION_CHARS: {0}")]
    InvalidMaxNotificationChars(String),
    #[error("invalid LEADS_LOG_FORMAT: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("LEADS_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:4300".to_string())
            .parse()?;
        let service_name =
            lookup("LEADS_SERVICE_NAME").unwrap_or_else(|| "lead-intake".to_string());
        let build_sha = lookup("LEADS_BUILD_SHA").unwrap_or_else(|| "dev".to_string());
        let db_url = non_empty(lookup("DB_URL")).or_else(|| non_empty(lookup("DATABASE_URL")));

        let primary_write_timeout_ms = parse_u64_lookup(
            &lookup,
            "LEADS_PRIMARY_WRITE_TIMEOUT_MS",
            3_000,
            50,
            60_000,
            ConfigError::InvalidPrimaryWriteTimeoutMs,
        )?;
        let fallback_store_path = non_empty(lookup("LEADS_FALLBACK_STORE_PATH"))
            .map_or_else(|| PathBuf::from("data/leads-fallback.jsonl"), PathBuf::from);
        let audit_log_path = non_empty(lookup("LEADS_AUDIT_LOG_PATH")).map(PathBuf::from);
        let directory_path = non_empty(lookup("LEADS_DIRECTORY_PATH")).map(PathBuf::from);
        let directory_refresh_seconds = parse_u64_lookup(
            &lookup,
            "LEADS_DIRECTORY_REFRESH_SECONDS",
            60,
            1,
            86_400,
            ConfigError::InvalidDirectoryRefreshSeconds,
        )?;

        let relay_driver = parse_relay_driver(
            lookup("LEADS_RELAY_DRIVER")
                .unwrap_or_else(|| "log".to_string())
                .as_str(),
        )?;
        let operations_address = match non_empty(lookup("LEADS_OPERATIONS_ADDRESS")) {
            Some(address) => ChannelAddress::new(address),
            None if relay_driver == RelayDriver::Telegram => {
                return Err(ConfigError::MissingOperationsAddress);
            }
            None => ChannelAddress::new("operations"),
        };
        let telegram_bot_token = non_empty(lookup("LEADS_TELEGRAM_BOT_TOKEN"));
        let telegram_api_base_url = non_empty(lookup("LEADS_TELEGRAM_API_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE_URL.to_string());
        let relay_timeout_ms = parse_u64_lookup(
            &lookup,
            "LEADS_RELAY_TIMEOUT_MS",
            10_000,
            100,
            120_000,
            ConfigError::InvalidRelayTimeoutMs,
        )?;

        let delivery_max_attempts = parse_u64_lookup(
            &lookup,
            "LEADS_DELIVERY_MAX_ATTEMPTS",
            3,
            1,
            10,
            ConfigError::InvalidDeliveryMaxAttempts,
        )?;
        let delivery_base_backoff_ms = parse_u64_lookup(
            &lookup,
            "LEADS_DELIVERY_BASE_BACKOFF_MS",
            500,
            1,
            60_000,
            ConfigError::InvalidDeliveryBaseBackoffMs,
        )?;
        let max_message_chars = parse_u64_lookup(
            &lookup,
            "LEADS_MAX_MESSAGE_CHARS",
            2_000,
            1,
            20_000,
            ConfigError::InvalidMaxMessageChars,
        )?;
        let max_notification_chars = parse_u64_lookup(
            &lookup,
            "LEADS_MAX_NOTIFICATION_CHARS",
            4_000,
            200,
            4_096,
            ConfigError::InvalidMaxNotificationChars,
        )?;
        let log_format = parse_log_format(
            lookup("LEADS_LOG_FORMAT")
                .unwrap_or_else(|| "text".to_string())
                .as_str(),
        )?;

        Ok(Self {
            bind_addr,
            service_name,
            build_sha,
            db_url,
            primary_write_timeout: Duration::from_millis(primary_write_timeout_ms),
            fallback_store_path,
            audit_log_path,
            directory_path,
            directory_refresh_interval: Duration::from_secs(directory_refresh_seconds),
            operations_address,
            relay_driver,
            telegram_bot_token,
            telegram_api_base_url,
            relay_timeout: Duration::from_millis(relay_timeout_ms),
            delivery_max_attempts: u32::try_from(delivery_max_attempts).unwrap_or(u32::MAX),
            delivery_base_backoff: Duration::from_millis(delivery_base_backoff_ms),
            max_message_chars: usize::try_from(max_message_chars).unwrap_or(usize::MAX),
            max_notification_chars: usize::try_from(max_notification_chars)
                .unwrap_or(usize::MAX),
            log_format,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_relay_driver(raw: &str) -> Result<RelayDriver, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "log" | "" => Ok(RelayDriver::Log),
        "telegram" => Ok(RelayDriver::Telegram),
        other => Err(ConfigError::InvalidRelayDriver(other.to_string())),
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" | "pretty" | "" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(ConfigError::InvalidLogFormat(other.to_string())),
    }
}

fn parse_u64_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    min: u64,
    max: u64,
    error: impl FnOnce(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    parse_with_lookup(lookup, key, default, |raw| {
        raw.trim()
            .parse::<u64>()
            .map_err(|parse_error| error(parse_error.to_string()))
            .map(|value| value.clamp(min, max))
    })
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}
