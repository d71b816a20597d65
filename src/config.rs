//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VaultConfig {
    pub api_port: u16,
    /// Prepend the demo assets to the ledger at start-up
    pub seed_demo_assets: bool,
    pub upload: UploadConfig,
    pub inference: InferenceConfig,
    pub wallet: WalletConfig,
    pub contract: ContractConfig,
    pub timing: TimingConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            seed_demo_assets: true,
            upload: UploadConfig::default(),
            inference: InferenceConfig::default(),
            wallet: WalletConfig::default(),
            contract: ContractConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Pinning service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    /// Hand out mock hashes when no credential is configured
    pub allow_mock: bool,
    pub mock_delay_ms: u64,
    /// Request body cap for multipart uploads
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pinata.cloud/pinning/pinFileToIPFS".to_string(),
            jwt: None,
            allow_mock: true,
            mock_delay_ms: 2000,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Hosted inference settings (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Wallet provider and target network settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletConfig {
    /// JSON-RPC endpoint of the wallet bridge; no provider when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_url: Option<String>,
    pub install_url: String,
    pub target_chain_id: u64,
    pub accepted_local_chain_ids: Vec<u64>,
    pub chain_name: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub currency_decimals: u8,
    pub rpc_urls: Vec<String>,
    pub explorer_urls: Vec<String>,
    pub event_poll_interval_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            install_url: "https://pelaguswallet.io/".to_string(),
            target_chain_id: 0x1c72,
            accepted_local_chain_ids: vec![31337],
            chain_name: "Quai Cyprus-1 Testnet".to_string(),
            currency_name: "Quai".to_string(),
            currency_symbol: "QUAI".to_string(),
            currency_decimals: 18,
            rpc_urls: vec!["https://cyprus1.rpc.quai.network".to_string()],
            explorer_urls: vec!["https://cyprus1.quaiscan.io".to_string()],
            event_poll_interval_ms: 2000,
        }
    }
}

impl WalletConfig {
    /// True when `chain_id` is the target network or an accepted local one
    pub fn is_accepted_chain(&self, chain_id: u64) -> bool {
        chain_id == self.target_chain_id || self.accepted_local_chain_ids.contains(&chain_id)
    }
}

/// Marketplace contract settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContractConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub rpc_url: String,
    pub confirmation_poll_interval_ms: u64,
    pub confirmation_max_attempts: u32,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: None,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            confirmation_poll_interval_ms: 2000,
            confirmation_max_attempts: 60,
        }
    }
}

impl ContractConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }
}

/// Fixed delays driving the vault and verification state machines
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub confirm_delay_ms: u64,
    pub success_display_ms: u64,
    pub error_display_ms: u64,
    pub verify_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 2500,
            success_display_ms: 3000,
            error_display_ms: 5000,
            verify_delay_ms: 1500,
        }
    }
}

impl TimingConfig {
    /// All delays zeroed, for tests driving the state machines directly
    pub fn immediate() -> Self {
        Self {
            confirm_delay_ms: 0,
            success_display_ms: 0,
            error_display_ms: 0,
            verify_delay_ms: 0,
        }
    }
}

impl VaultConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("LUNAR_VAULT_API_PORT") {
            config.api_port = port.parse().context("Invalid LUNAR_VAULT_API_PORT value")?;
        }
        if let Some(jwt) = non_empty_env("PINATA_JWT") {
            config.upload.jwt = Some(jwt);
        }
        if let Some(key) = non_empty_env("GROQ_API_KEY") {
            config.inference.api_key = Some(key);
        }
        if let Some(address) = non_empty_env("LUNAR_VAULT_CONTRACT_ADDRESS") {
            config.contract.address = Some(address);
        }
        if let Some(url) = non_empty_env("LUNAR_VAULT_CHAIN_RPC_URL") {
            config.contract.rpc_url = url;
        }
        if let Some(url) = non_empty_env("LUNAR_VAULT_WALLET_RPC_URL") {
            config.wallet.provider_url = Some(url);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.wallet.target_chain_id == 0 {
            anyhow::bail!("Target chain id cannot be zero");
        }

        if let Some(address) = &self.contract.address {
            address
                .parse::<ethers::types::Address>()
                .with_context(|| format!("Invalid contract address: {}", address))?;
        }

        if self.contract.confirmation_max_attempts == 0 {
            anyhow::bail!("confirmation_max_attempts must be at least 1");
        }

        if self.upload.jwt.is_none() && !self.upload.allow_mock {
            tracing::warn!("No pinning credential configured and mock uploads are disabled");
        }

        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// Default functions
fn default_api_port() -> u16 {
    9000
}
