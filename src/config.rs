use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use serde::Deserialize;
use tracing::Level;
use url::Url;

use crate::composite::CompositeOptions;
use crate::error::InputError;
use crate::strategy::MStrategyConfig;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Path to TOML secrets file
    #[clap(long)]
    pub secrets: PathBuf,
}

/// Non-secret settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    log_level: Option<LogLevel>,
    network: String,
    deployments_dir: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    required_confirmations: Option<u64>,
    #[serde(default)]
    accounts: BTreeMap<String, Address>,
    m_strategy: Option<MStrategyConfig>,
    #[serde(default)]
    composite: CompositeOptions,
}

/// Secret credentials deserialized from the secrets TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Secrets {
    rpc_url: Url,
    deployer_private_key: B256,
}

/// Addresses configured per network under `[accounts]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedAccounts(BTreeMap<String, Address>);

impl NamedAccounts {
    pub fn get(&self, name: &str) -> Result<Address, InputError> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| InputError::MissingAccount(name.to_owned()))
    }
}

impl FromIterator<(String, Address)> for NamedAccounts {
    fn from_iter<I: IntoIterator<Item = (String, Address)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Combined runtime context assembled from config and secrets.
#[derive(Clone)]
pub struct Ctx {
    pub log_level: LogLevel,
    pub network: String,
    deployments_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub required_confirmations: u64,
    pub accounts: NamedAccounts,
    pub m_strategy: Option<MStrategyConfig>,
    pub composite: CompositeOptions,
    pub rpc_url: Url,
    deployer_private_key: B256,
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("log_level", &self.log_level)
            .field("network", &self.network)
            .field("deployments_dir", &self.deployments_dir)
            .field("artifacts_dir", &self.artifacts_dir)
            .field("required_confirmations", &self.required_confirmations)
            .field("accounts", &self.accounts)
            .field("m_strategy", &self.m_strategy)
            .field("composite", &self.composite)
            .field("rpc_url", &"[REDACTED]")
            .field("deployer_private_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to derive address from deployer_private_key")]
    PrivateKeyDerivation(#[source] alloy::signers::k256::ecdsa::Error),
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("required_confirmations must be at least 1")]
    NoConfirmations,
    #[error("[m_strategy] section is required for this command")]
    MissingMStrategy,
}

impl Ctx {
    pub fn load_files(config: &Path, secrets: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        let secrets_str = std::fs::read_to_string(secrets)?;
        Self::from_toml(&config_str, &secrets_str)
    }

    pub fn from_toml(config_toml: &str, secrets_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let secrets: Secrets = toml::from_str(secrets_toml)?;

        let required_confirmations = config.required_confirmations.unwrap_or(1);
        if required_confirmations == 0 {
            return Err(ConfigError::NoConfirmations);
        }

        Ok(Self {
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            network: config.network,
            deployments_dir: config
                .deployments_dir
                .unwrap_or_else(|| PathBuf::from("deployments")),
            artifacts_dir: config
                .artifacts_dir
                .unwrap_or_else(|| PathBuf::from("artifacts")),
            required_confirmations,
            accounts: config.accounts.into_iter().collect(),
            m_strategy: config.m_strategy,
            composite: config.composite,
            rpc_url: secrets.rpc_url,
            deployer_private_key: secrets.deployer_private_key,
        })
    }

    /// Deployment records are kept per network.
    pub fn deployments_dir(&self) -> PathBuf {
        self.deployments_dir.join(&self.network)
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        PrivateKeySigner::from_bytes(&self.deployer_private_key)
            .map_err(ConfigError::PrivateKeyDerivation)
    }

    pub fn m_strategy(&self) -> Result<&MStrategyConfig, ConfigError> {
        self.m_strategy.as_ref().ok_or(ConfigError::MissingMStrategy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        (*log_level).into()
    }
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("st0x_provision={level},st0x_evm={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
