use std::{collections::HashMap, fs, path::Path};

use shared::domain::{IdError, ObjectId};
use thiserror::Error;
use tx_builder::ContractConfig;
use url::Url;

use crate::session_key::MAX_SESSION_TTL_MINUTES;

pub const SETTINGS_FILE: &str = "market.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid {field}: {source}")]
    InvalidId {
        field: &'static str,
        #[source]
        source: IdError,
    },
    #[error("invalid {field} url '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("session ttl must be between 1 and 30 minutes, got {0}")]
    SessionTtl(i64),
    #[error("blob epochs must be at least 1")]
    BlobEpochs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub package_id: String,
    pub idea_module: String,
    pub market_module: String,
    pub seal_policy_module: String,
    pub delist_function: String,
    pub purchase_function: String,
    pub seal_approve_function: String,
    pub transfer_policy_id: String,
    pub task_package_id: String,
    pub task_module: String,
    pub platform_id: String,
    pub backend_url: String,
    pub blob_publisher_url: String,
    pub blob_aggregator_url: String,
    pub fullnode_url: String,
    pub key_server_url: Option<String>,
    pub session_ttl_minutes: i64,
    pub blob_epochs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package_id: "0x0".into(),
            idea_module: "idea".into(),
            market_module: "market".into(),
            seal_policy_module: "seal_policy".into(),
            delist_function: "delist_and_burn".into(),
            purchase_function: "purchase".into(),
            seal_approve_function: "seal_approve".into(),
            transfer_policy_id: "0x0".into(),
            task_package_id: "0x9e30d8757c19a68ada3c8d0d750f6ba277a51d161759fa0452a79dd0038dc62b"
                .into(),
            task_module: "task".into(),
            platform_id: "0x754539dfb7d17ebca4da4e66e3c88ece2e01611cf3b7507fa81ce1fbebe1450c"
                .into(),
            backend_url: "http://127.0.0.1:5000/api".into(),
            blob_publisher_url: "https://publisher.walrus-testnet.walrus.space".into(),
            blob_aggregator_url: "https://aggregator.walrus-testnet.walrus.space".into(),
            fullnode_url: "https://fullnode.testnet.sui.io:443".into(),
            key_server_url: None,
            session_ttl_minutes: 30,
            blob_epochs: 5,
        }
    }
}

/// Keys in the settings file and the environment variables that override
/// them, later names winning.
const STRING_KEYS: &[(&str, &[&str])] = &[
    ("package_id", &["VITE_PID", "APP__PACKAGE_ID"]),
    ("idea_module", &["VITE_MODULE_IDEA", "APP__IDEA_MODULE"]),
    ("market_module", &["VITE_MODULE_MARKET", "APP__MARKET_MODULE"]),
    (
        "seal_policy_module",
        &["VITE_MODULE_SEAL_POLICY", "APP__SEAL_POLICY_MODULE"],
    ),
    ("delist_function", &["VITE_FUNC_dtb", "APP__DELIST_FUNCTION"]),
    (
        "purchase_function",
        &["VITE_FUNC_purchase", "APP__PURCHASE_FUNCTION"],
    ),
    (
        "seal_approve_function",
        &["VITE_FUNC_seal_approve", "APP__SEAL_APPROVE_FUNCTION"],
    ),
    ("transfer_policy_id", &["VITE_TP", "APP__TRANSFER_POLICY_ID"]),
    ("task_package_id", &["APP__TASK_PACKAGE_ID"]),
    ("task_module", &["APP__TASK_MODULE"]),
    ("platform_id", &["APP__PLATFORM_ID"]),
    ("backend_url", &["VITE_ENDPOINT", "APP__BACKEND_URL"]),
    (
        "blob_publisher_url",
        &[
            "VITE_PublishMan",
            "VITE_WALRUS_PUBLISHER",
            "APP__BLOB_PUBLISHER_URL",
        ],
    ),
    ("blob_aggregator_url", &["APP__BLOB_AGGREGATOR_URL"]),
    ("fullnode_url", &["APP__FULLNODE_URL"]),
    ("key_server_url", &["APP__KEY_SERVER_URL"]),
    ("session_ttl_minutes", &["APP__SESSION_TTL_MINUTES"]),
    ("blob_epochs", &["APP__BLOB_EPOCHS"]),
];

impl Settings {
    fn set(&mut self, key: &str, value: String) {
        match key {
            "package_id" => self.package_id = value,
            "idea_module" => self.idea_module = value,
            "market_module" => self.market_module = value,
            "seal_policy_module" => self.seal_policy_module = value,
            "delist_function" => self.delist_function = value,
            "purchase_function" => self.purchase_function = value,
            "seal_approve_function" => self.seal_approve_function = value,
            "transfer_policy_id" => self.transfer_policy_id = value,
            "task_package_id" => self.task_package_id = value,
            "task_module" => self.task_module = value,
            "platform_id" => self.platform_id = value,
            "backend_url" => self.backend_url = value,
            "blob_publisher_url" => self.blob_publisher_url = value,
            "blob_aggregator_url" => self.blob_aggregator_url = value,
            "fullnode_url" => self.fullnode_url = value,
            "key_server_url" => {
                self.key_server_url = (!value.trim().is_empty()).then_some(value);
            }
            "session_ttl_minutes" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.session_ttl_minutes = parsed;
                }
            }
            "blob_epochs" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.blob_epochs = parsed;
                }
            }
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.contracts()?;
        for (field, value) in [
            ("backend", self.backend_url.as_str()),
            ("blob publisher", self.blob_publisher_url.as_str()),
            ("blob aggregator", self.blob_aggregator_url.as_str()),
            ("fullnode", self.fullnode_url.as_str()),
        ] {
            parse_url(field, value)?;
        }
        if let Some(url) = &self.key_server_url {
            parse_url("key server", url)?;
        }
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.session_ttl_minutes) {
            return Err(SettingsError::SessionTtl(self.session_ttl_minutes));
        }
        if self.blob_epochs == 0 {
            return Err(SettingsError::BlobEpochs);
        }
        Ok(())
    }

    pub fn contracts(&self) -> Result<ContractConfig, SettingsError> {
        Ok(ContractConfig {
            package_id: parse_id("package id", &self.package_id)?,
            idea_module: non_empty("idea module", &self.idea_module)?,
            market_module: non_empty("market module", &self.market_module)?,
            seal_policy_module: non_empty("seal policy module", &self.seal_policy_module)?,
            delist_function: non_empty("delist function", &self.delist_function)?,
            purchase_function: non_empty("purchase function", &self.purchase_function)?,
            seal_approve_function: non_empty("seal approve function", &self.seal_approve_function)?,
            transfer_policy_id: parse_id("transfer policy id", &self.transfer_policy_id)?,
            task_package_id: parse_id("task package id", &self.task_package_id)?,
            task_module: non_empty("task module", &self.task_module)?,
            platform_id: parse_id("platform id", &self.platform_id)?,
        })
    }
}

fn parse_id(field: &'static str, raw: &str) -> Result<ObjectId, SettingsError> {
    ObjectId::parse(raw).map_err(|source| SettingsError::InvalidId { field, source })
}

fn non_empty(field: &'static str, raw: &str) -> Result<String, SettingsError> {
    if raw.trim().is_empty() {
        return Err(SettingsError::Empty { field });
    }
    Ok(raw.trim().to_string())
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, SettingsError> {
    Url::parse(raw).map_err(|source| SettingsError::InvalidUrl {
        field,
        value: raw.to_string(),
        source,
    })
}

/// Defaults, then `market.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(table) = toml::from_str::<toml::Table>(&raw) {
            let file_cfg: HashMap<String, String> = table
                .into_iter()
                .filter_map(|(key, value)| {
                    let value = match value {
                        toml::Value::String(s) => s,
                        toml::Value::Integer(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key, value))
                })
                .collect();
            for (key, _) in STRING_KEYS {
                if let Some(v) = file_cfg.get(*key) {
                    settings.set(key, v.clone());
                }
            }
        }
    }

    for (key, env_names) in STRING_KEYS {
        for name in *env_names {
            if let Some(v) = env(name) {
                settings.set(key, v);
            }
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
