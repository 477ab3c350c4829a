use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Revenue-category keys the service recognizes. Each maps to a gateway
/// revenue-category id via environment configuration.
pub const RECOGNIZED_REVENUE_CATEGORY_KEYS: &[&str] = &["default", "property_tax"];

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub timeout_secs: u64,
    /// Processor used when an invoice carries no explicit choice.
    pub default_processor: String,
    /// Processors the gateway offers.
    pub processors: Vec<String>,
    /// Recognized revenue-category key -> gateway revenue-category id.
    pub revenue_categories: HashMap<String, i64>,
    /// Base URL this service is reachable on, used to build callback URLs.
    pub public_base_url: String,
}

impl GatewayConfig {
    pub fn revenue_category_id(&self, key: &str) -> Option<i64> {
        self.revenue_categories.get(key).copied()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("REVENUE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("REVENUE_SERVICE_PORT")
            .unwrap_or_else(|_| "3006".to_string())
            .parse()?;

        let db_url = env::var("REVENUE_DATABASE_URL").expect("REVENUE_DATABASE_URL must be set");
        let max_connections = env::var("REVENUE_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("REVENUE_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let gateway_base_url = env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://gateway.staging.example.gov".to_string());
        let gateway_client_id = env::var("GATEWAY_CLIENT_ID").unwrap_or_default();
        let gateway_timeout_secs = env::var("GATEWAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let default_processor =
            env::var("GATEWAY_DEFAULT_PROCESSOR").unwrap_or_else(|_| "paystack".to_string());
        let processors = env::var("GATEWAY_PROCESSORS")
            .unwrap_or_else(|_| "paystack,remita,interswitch".to_string())
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let mut revenue_categories = HashMap::new();
        for key in RECOGNIZED_REVENUE_CATEGORY_KEYS {
            let var = format!("GATEWAY_REVENUE_CATEGORY_{}", key.to_uppercase());
            if let Ok(value) = env::var(&var) {
                revenue_categories.insert(key.to_string(), value.parse()?);
            }
        }

        let public_base_url = env::var("REVENUE_SERVICE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            gateway: GatewayConfig {
                base_url: gateway_base_url,
                client_id: gateway_client_id,
                timeout_secs: gateway_timeout_secs,
                default_processor,
                processors,
                revenue_categories,
                public_base_url,
            },
            service_name: "revenue-service".to_string(),
        })
    }
}
