//! API request and response models

use crate::format::{format_file_size, format_timestamp, truncate_address, truncate_hash};
use crate::inference::ChatMessage;
use crate::ledger::VaultedAsset;
use crate::wallet::WalletState;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Wallet snapshot plus whether it sits on an accepted network
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    #[serde(flatten)]
    pub state: WalletState,
    pub is_correct_network: bool,
    /// Truncated address for compact display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_address: Option<String>,
}

impl WalletResponse {
    pub fn new(state: WalletState, is_correct_network: bool) -> Self {
        let display_address = state
            .address
            .as_deref()
            .map(|address| truncate_address(address, 6, 4));
        Self {
            state,
            is_correct_network,
            display_address,
        }
    }
}

/// Ledger entry with its display strings
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetInfo {
    #[serde(flatten)]
    pub asset: VaultedAsset,
    pub size_display: String,
    pub date_display: String,
    pub short_hash: String,
}

impl From<VaultedAsset> for AssetInfo {
    fn from(asset: VaultedAsset) -> Self {
        Self {
            size_display: format_file_size(asset.file_size),
            date_display: format_timestamp(asset.timestamp),
            short_hash: truncate_hash(&asset.content_hash, 16),
            asset,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/// Access flag for the connected wallet
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub content_hash: String,
    pub has_access: bool,
}

/// Last streamed answer and the conversation so far
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub content_hash: String,
    pub transcript: String,
    pub history: Vec<ChatMessage>,
}
