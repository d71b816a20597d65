//! EIP-1193 style provider abstraction and its HTTP bridge implementation

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Provider code for a prompt the user declined
pub const USER_REJECTED: i64 = 4001;
/// Provider code for a chain the wallet does not know about
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// JSON-RPC internal error, also used for transport failures
pub const INTERNAL_ERROR: i64 = -32603;

/// Notifications pushed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

/// Error object returned by a provider request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Injected wallet provider
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Issue a JSON-RPC style request
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Receive `accountsChanged` / `chainChanged` notifications
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Provider that forwards requests to a wallet bridge over JSON-RPC/HTTP.
///
/// HTTP has no push channel, so account and chain changes are synthesised by
/// [`HttpWalletProvider::spawn_event_poller`].
pub struct HttpWalletProvider {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<ProviderEvent>,
}

impl HttpWalletProvider {
    pub fn new(url: impl Into<String>) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Poll `eth_accounts` and `eth_chainId`, emitting events when either changes
    pub fn spawn_event_poller(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            let mut last_accounts: Option<Vec<String>> = None;
            let mut last_chain: Option<String> = None;

            loop {
                ticker.tick().await;

                match provider.request("eth_accounts", json!([])).await {
                    Ok(value) => {
                        let accounts: Vec<String> =
                            serde_json::from_value(value).unwrap_or_default();
                        if let Some(prev) = &last_accounts
                            && *prev != accounts
                        {
                            let _ = provider
                                .event_tx
                                .send(ProviderEvent::AccountsChanged(accounts.clone()));
                        }
                        last_accounts = Some(accounts);
                    }
                    Err(e) => tracing::debug!(error = %e, "Account poll failed"),
                }

                match provider.request("eth_chainId", json!([])).await {
                    Ok(Value::String(chain)) => {
                        if let Some(prev) = &last_chain
                            && *prev != chain
                        {
                            let _ = provider
                                .event_tx
                                .send(ProviderEvent::ChainChanged(chain.clone()));
                        }
                        last_chain = Some(chain);
                    }
                    Ok(other) => tracing::debug!(value = %other, "Unexpected eth_chainId result"),
                    Err(e) => tracing::debug!(error = %e, "Chain poll failed"),
                }
            }
        })
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(err);
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.event_tx.subscribe()
    }
}

/// Parse a chain id given either as a `0x` hex string or a number
pub fn parse_chain_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Render a chain id the way providers expect it
pub fn chain_id_hex(chain_id: u64) -> String {
    format!("{:#x}", chain_id)
}
