//! Configuration management for the Bifrost Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub metrics: MetricsConfig,
    pub assets: AssetsConfig,
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Capacity of each per-event-kind channel between listener and bridge loop
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// How long shutdown waits for in-flight operations to finish
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Display symbols for the bridged assets and their wrapped counterparts
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    pub native_symbol: String,
    pub token_symbol: String,
    pub wrapped_native_symbol: String,
    pub wrapped_token_symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub contract_address: String,
    pub confirmation_blocks: u64,
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Block to start scanning from; the block after the current head when unset
    pub start_block: Option<u64>,
    pub tx_timeout_secs: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

fn default_event_buffer() -> usize {
    1024
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    60
}

fn default_max_block_range() -> u64 {
    1000
}

impl Settings {
    /// Load settings from the file named by `BIFROST_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BIFROST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.relayer.event_buffer == 0 {
            anyhow::bail!("relayer.event_buffer must be positive");
        }
        if self.relayer.health_check_interval_secs == 0 {
            anyhow::bail!("relayer.health_check_interval_secs must be positive");
        }

        for (role, chain) in [("source", &self.source), ("destination", &self.destination)] {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("{} chain {} has no RPC URLs configured", role, chain.name);
            }
            if chain.contract_address.is_empty() {
                anyhow::bail!("{} chain {} has no contract address", role, chain.name);
            }
            if chain.poll_interval_ms == 0 || chain.tx_timeout_secs == 0 {
                anyhow::bail!("{} chain {} needs positive poll and tx timeouts", role, chain.name);
            }
            if chain.max_block_range == 0 {
                anyhow::bail!("{} chain {} needs a positive max_block_range", role, chain.name);
            }
        }

        let symbols = [
            &self.assets.native_symbol,
            &self.assets.token_symbol,
            &self.assets.wrapped_native_symbol,
            &self.assets.wrapped_token_symbol,
        ];
        if symbols.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("Asset symbols must not be empty");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[relayer]
instance_id = "bifrost-test"

[metrics]
enabled = false
port = 9090

[assets]
native_symbol = "AVAX"
token_symbol = "USDC"
wrapped_native_symbol = "WAVAX"
wrapped_token_symbol = "WUSDC"

[source]
name = "avalanche"
chain_id = 43114
rpc_urls = ["http://localhost:9650/ext/bc/C/rpc"]
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
confirmation_blocks = 1
poll_interval_ms = 2000
tx_timeout_secs = 60
gas_price_strategy = "eip1559"
max_gas_price_gwei = 300

[destination]
name = "wrapped"
chain_id = 31337
rpc_urls = ["${BIFROST_TEST_DEST_RPC}"]
contract_address = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
confirmation_blocks = 2
poll_interval_ms = 2000
start_block = 100
tx_timeout_secs = 60
gas_price_strategy = "legacy"
max_gas_price_gwei = 100

[wallet]
private_key_env = "RELAYER_PRIVATE_KEY"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("BIFROST_TEST_DEST_RPC", "http://localhost:8545");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.relayer.event_buffer, 1024);
        assert_eq!(settings.relayer.shutdown_grace_secs, 60);
        assert_eq!(settings.source.max_block_range, 1000);
        assert_eq!(settings.source.start_block, None);
        assert_eq!(settings.destination.start_block, Some(100));
        assert_eq!(settings.destination.rpc_urls, vec!["http://localhost:8545"]);
        assert_eq!(settings.destination.gas_price_strategy, GasPriceStrategy::Legacy);
        assert_eq!(settings.assets.wrapped_token_symbol, "WUSDC");
    }

    #[test]
    fn test_rejects_missing_contract_address() {
        let raw = SAMPLE.replace(
            "contract_address = \"0x5FbDB2315678afecb367f032d93F642f64180aa3\"",
            "contract_address = \"\"",
        );
        let err = Settings::parse(&raw).unwrap_err();
        assert!(err.to_string().contains("no contract address"));
    }

    #[test]
    fn test_rejects_empty_symbol() {
        let raw = SAMPLE.replace("token_symbol = \"USDC\"", "token_symbol = \" \"");
        assert!(Settings::parse(&raw).is_err());
    }
}
