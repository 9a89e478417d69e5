use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub merchant_backend_url: String,
    pub vasp_backend_url: String,
    /// Serve VASP payment options from the built-in fixture instead of the network.
    pub vasp_mock: bool,
    /// Wallet and merchant URLs reported by the fixture VASP client.
    pub wallet_url: String,
    pub base_merchant_url: String,
    pub demo_mode: bool,
    pub merchant_name: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub explorer_url: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            merchant_backend_url: env::var("MERCHANT_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:5000/api".to_string()),
            vasp_backend_url: env::var("VASP_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:5000/vasp".to_string()),
            vasp_mock: parse_bool(&env::var("VASP_MOCK").unwrap_or_default())?,
            wallet_url: env::var("WALLET_URL")
                .unwrap_or_else(|_| "http://localhost:8080/wallet/checkout".to_string()),
            base_merchant_url: env::var("BASE_MERCHANT_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            demo_mode: parse_bool(&env::var("DEMO_MODE").unwrap_or_default())?,
            merchant_name: env::var("MERCHANT_NAME")
                .unwrap_or_else(|_| "Demo Merchant".to_string()),
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| DEFAULT_POLL_INTERVAL_MS.to_string())
                .parse()?,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            explorer_url: env::var("EXPLORER_URL")
                .unwrap_or_else(|_| "https://diemexplorer.com/testnet/version".to_string()),
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default())?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => anyhow::bail!("expected a boolean flag, got {:?}", other),
    }
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got {:?}", other),
    }
}
