//! Wallet adapter: connection state, network switching and provider events

pub mod provider;

pub use provider::{HttpWalletProvider, ProviderEvent, RpcError, WalletProvider};

use crate::config::WalletConfig;
use crate::error::{VaultError, VaultResult};
use provider::{UNRECOGNIZED_CHAIN, USER_REJECTED, chain_id_hex, parse_chain_id};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

/// Snapshot of the wallet connection.
///
/// `address` is present iff `is_connected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub is_connected: bool,
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub is_connecting: bool,
    pub error: Option<String>,
}

impl WalletState {
    fn connected(address: String, chain_id: Option<u64>) -> Self {
        Self {
            is_connected: true,
            address: Some(address),
            chain_id,
            is_connecting: false,
            error: None,
        }
    }
}

/// Transitions broadcast by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Connected(String),
    AccountChanged(String),
    Disconnected,
    /// Chain changed; chain-bound state must be rebuilt
    ReloadRequired(u64),
}

/// Wraps an injected provider and owns the [`WalletState`]
pub struct WalletAdapter {
    provider: Option<Arc<dyn WalletProvider>>,
    config: WalletConfig,
    state: RwLock<WalletState>,
    event_tx: broadcast::Sender<WalletEvent>,
}

impl WalletAdapter {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: WalletConfig) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            provider,
            config,
            state: RwLock::new(WalletState::default()),
            event_tx,
        }
    }

    pub async fn state(&self) -> WalletState {
        self.state.read().await.clone()
    }

    pub async fn address(&self) -> Option<String> {
        self.state.read().await.address.clone()
    }

    /// True when the recorded chain is the target or an accepted local network
    pub async fn is_correct_network(&self) -> bool {
        self.state
            .read()
            .await
            .chain_id
            .is_some_and(|id| self.config.is_accepted_chain(id))
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.event_tx.subscribe()
    }

    /// Restore an existing connection without prompting
    pub async fn check_connection(&self) {
        let Some(provider) = &self.provider else {
            self.state.write().await.error = Some("Wallet provider not installed".to_string());
            return;
        };

        let accounts = match provider.request("eth_accounts", json!([])).await {
            Ok(value) => accounts_from(value),
            Err(e) => {
                tracing::warn!(error = %e, "Error checking wallet connection");
                return;
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            return;
        };

        let chain_id = match provider.request("eth_chainId", json!([])).await {
            Ok(value) => parse_chain_id(&value),
            Err(e) => {
                tracing::warn!(error = %e, "Error reading chain id");
                None
            }
        };

        tracing::info!(address = %address, chain_id = ?chain_id, "Restored wallet connection");
        *self.state.write().await = WalletState::connected(address.clone(), chain_id);
        let _ = self.event_tx.send(WalletEvent::Connected(address));
    }

    /// Request accounts and make sure the wallet sits on the target network
    pub async fn connect(&self) -> VaultResult<WalletState> {
        let Some(provider) = self.provider.clone() else {
            self.state.write().await.error = Some("Please install a wallet".to_string());
            return Err(VaultError::ProviderMissing {
                install_url: self.config.install_url.clone(),
            });
        };

        {
            let mut state = self.state.write().await;
            state.is_connecting = true;
            state.error = None;
        }

        match self.establish(provider.as_ref()).await {
            Ok((address, chain_id)) => {
                let state = WalletState::connected(address.clone(), Some(chain_id));
                *self.state.write().await = state.clone();
                tracing::info!(address = %address, chain_id, "Wallet connected");
                let _ = self.event_tx.send(WalletEvent::Connected(address));
                Ok(state)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.is_connecting = false;
                state.error = Some(e.user_message());
                tracing::warn!(error = %e, "Wallet connection failed");
                Err(e)
            }
        }
    }

    async fn establish(&self, provider: &dyn WalletProvider) -> VaultResult<(String, u64)> {
        let accounts = provider
            .request("eth_requestAccounts", json!([]))
            .await
            .map(accounts_from)
            .map_err(rpc_error)?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::Provider {
                code: USER_REJECTED,
                message: "No accounts returned".to_string(),
            })?;

        let mut chain_id = read_chain_id(provider).await?;
        if !self.config.is_accepted_chain(chain_id) {
            tracing::info!(
                current = chain_id,
                target = self.config.target_chain_id,
                "Requesting network switch"
            );
            self.switch_network(provider).await?;
            chain_id = read_chain_id(provider).await?;
        }

        Ok((address, chain_id))
    }

    async fn switch_network(&self, provider: &dyn WalletProvider) -> VaultResult<()> {
        let switch_params = json!([{ "chainId": chain_id_hex(self.config.target_chain_id) }]);

        match provider
            .request("wallet_switchEthereumChain", switch_params.clone())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code == USER_REJECTED => Err(VaultError::UserRejected),
            Err(e) if e.code == UNRECOGNIZED_CHAIN => {
                tracing::info!(chain = %self.config.chain_name, "Registering network with wallet");
                provider
                    .request("wallet_addEthereumChain", json!([self.chain_params()]))
                    .await
                    .map_err(switch_error)?;
                provider
                    .request("wallet_switchEthereumChain", switch_params)
                    .await
                    .map_err(switch_error)?;
                Ok(())
            }
            Err(e) => Err(switch_error(e)),
        }
    }

    fn chain_params(&self) -> Value {
        json!({
            "chainId": chain_id_hex(self.config.target_chain_id),
            "chainName": self.config.chain_name,
            "nativeCurrency": {
                "name": self.config.currency_name,
                "symbol": self.config.currency_symbol,
                "decimals": self.config.currency_decimals,
            },
            "rpcUrls": self.config.rpc_urls,
            "blockExplorerUrls": self.config.explorer_urls,
        })
    }

    /// Revoke permissions if the provider supports it, then reset local state
    pub async fn disconnect(&self) {
        if let Some(provider) = &self.provider
            && let Err(e) = provider
                .request("wallet_revokePermissions", json!([{ "eth_accounts": {} }]))
                .await
        {
            tracing::debug!(error = %e, "Permission revocation not supported");
        }

        *self.state.write().await = WalletState::default();
        let _ = self.event_tx.send(WalletEvent::Disconnected);
        tracing::info!("Wallet disconnected");
    }

    /// Apply one provider notification to the state
    pub async fn handle_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    *self.state.write().await = WalletState::default();
                    let _ = self.event_tx.send(WalletEvent::Disconnected);
                }
                Some(address) => {
                    let mut state = self.state.write().await;
                    state.is_connected = true;
                    state.address = Some(address.clone());
                    state.is_connecting = false;
                    drop(state);
                    let _ = self.event_tx.send(WalletEvent::AccountChanged(address));
                }
            },
            ProviderEvent::ChainChanged(raw) => {
                let chain_id = parse_chain_id(&Value::String(raw.clone()));
                self.state.write().await.chain_id = chain_id;
                match chain_id {
                    Some(id) => {
                        tracing::info!(chain_id = id, "Chain changed, reload required");
                        let _ = self.event_tx.send(WalletEvent::ReloadRequired(id));
                    }
                    None => tracing::warn!(chain = %raw, "Unparseable chain id from provider"),
                }
            }
        }
    }

    /// Start forwarding provider notifications into this adapter.
    ///
    /// Returns `None` when no provider is injected. Dropping the subscription
    /// stops the listener.
    pub fn subscribe(self: &Arc<Self>) -> Option<WalletSubscription> {
        let provider = self.provider.as_ref()?;
        let mut rx = provider.subscribe();
        let adapter = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => adapter.handle_provider_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Wallet event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Some(WalletSubscription { handle })
    }
}

/// Guard for the provider event listener
pub struct WalletSubscription {
    handle: JoinHandle<()>,
}

impl WalletSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for WalletSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn accounts_from(value: Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

async fn read_chain_id(provider: &dyn WalletProvider) -> VaultResult<u64> {
    let value = provider
        .request("eth_chainId", json!([]))
        .await
        .map_err(rpc_error)?;
    parse_chain_id(&value).ok_or_else(|| VaultError::Provider {
        code: provider::INTERNAL_ERROR,
        message: format!("Unparseable chain id: {}", value),
    })
}

fn rpc_error(e: RpcError) -> VaultError {
    if e.code == USER_REJECTED {
        VaultError::UserRejected
    } else {
        VaultError::Provider {
            code: e.code,
            message: e.message,
        }
    }
}

fn switch_error(e: RpcError) -> VaultError {
    if e.code == USER_REJECTED {
        VaultError::UserRejected
    } else {
        VaultError::NetworkMismatch(e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted provider: each method pops its next queued response
    struct ScriptedProvider {
        responses: Mutex<HashMap<String, Vec<Result<Value, RpcError>>>>,
        calls: Mutex<Vec<String>>,
        event_tx: broadcast::Sender<ProviderEvent>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            let (event_tx, _) = broadcast::channel(8);
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                event_tx,
            }
        }

        fn on(self, method: &str, response: Result<Value, RpcError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(method.to_string())
                .or_default()
                .push(response);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl WalletProvider for ScriptedProvider {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            self.calls.lock().unwrap().push(method.to_string());
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(method) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Err(RpcError::new(-32601, format!("{} not scripted", method))),
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
            self.event_tx.subscribe()
        }
    }

    const ALICE: &str = "0x71C3a9A23F8b5E4D6c7A8B9C0D1E2F3A4B5C6D7E";

    fn adapter(provider: ScriptedProvider) -> (Arc<WalletAdapter>, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let adapter = Arc::new(WalletAdapter::new(
            Some(provider.clone() as Arc<dyn WalletProvider>),
            WalletConfig::default(),
        ));
        (adapter, provider)
    }

    #[tokio::test]
    async fn test_connect_without_provider() {
        let adapter = WalletAdapter::new(None, WalletConfig::default());
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, VaultError::ProviderMissing { .. }));
        assert!(!adapter.state().await.is_connected);
        assert!(adapter.state().await.error.is_some());
    }

    #[tokio::test]
    async fn test_connect_on_target_network() {
        let (adapter, provider) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1c72"))),
        );

        let state = adapter.connect().await.unwrap();
        assert!(state.is_connected);
        assert_eq!(state.address.as_deref(), Some(ALICE));
        assert_eq!(state.chain_id, Some(0x1c72));
        assert!(adapter.is_correct_network().await);
        assert!(!provider.calls().contains(&"wallet_switchEthereumChain".to_string()));
    }

    #[tokio::test]
    async fn test_connect_accepts_local_chain() {
        let (adapter, provider) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x7a69"))),
        );

        adapter.connect().await.unwrap();
        assert!(adapter.is_correct_network().await);
        assert_eq!(provider.calls(), vec!["eth_requestAccounts", "eth_chainId"]);
    }

    #[tokio::test]
    async fn test_connect_registers_unknown_network() {
        let (adapter, provider) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1")))
                .on("eth_chainId", Ok(json!("0x1c72")))
                .on(
                    "wallet_switchEthereumChain",
                    Err(RpcError::new(UNRECOGNIZED_CHAIN, "Unrecognized chain")),
                )
                .on("wallet_addEthereumChain", Ok(Value::Null))
                .on("wallet_switchEthereumChain", Ok(Value::Null)),
        );

        let state = adapter.connect().await.unwrap();
        assert_eq!(state.chain_id, Some(0x1c72));
        assert_eq!(
            provider.calls(),
            vec![
                "eth_requestAccounts",
                "eth_chainId",
                "wallet_switchEthereumChain",
                "wallet_addEthereumChain",
                "wallet_switchEthereumChain",
                "eth_chainId",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_user_rejects_switch() {
        let (adapter, _) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1")))
                .on(
                    "wallet_switchEthereumChain",
                    Err(RpcError::new(USER_REJECTED, "User rejected the request.")),
                ),
        );

        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, VaultError::UserRejected));
        let state = adapter.state().await;
        assert!(!state.is_connected);
        assert!(!state.is_connecting);
        assert!(state.address.is_none());
        assert_eq!(state.error.as_deref(), Some("Rejected in wallet."));
    }

    #[tokio::test]
    async fn test_connect_user_rejects_accounts() {
        let (adapter, _) = adapter(ScriptedProvider::new().on(
            "eth_requestAccounts",
            Err(RpcError::new(USER_REJECTED, "User rejected the request.")),
        ));
        assert!(matches!(
            adapter.connect().await.unwrap_err(),
            VaultError::UserRejected
        ));
    }

    #[tokio::test]
    async fn test_disconnect_swallows_revoke_failure() {
        let (adapter, provider) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1c72"))),
        );
        adapter.connect().await.unwrap();

        adapter.disconnect().await;
        assert_eq!(adapter.state().await, WalletState::default());
        assert!(provider.calls().contains(&"wallet_revokePermissions".to_string()));
    }

    #[tokio::test]
    async fn test_check_connection_restores_session() {
        let (adapter, _) = adapter(
            ScriptedProvider::new()
                .on("eth_accounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1c72"))),
        );
        adapter.check_connection().await;
        assert_eq!(adapter.address().await.as_deref(), Some(ALICE));
    }

    #[tokio::test]
    async fn test_account_and_chain_events() {
        let (adapter, provider) = adapter(
            ScriptedProvider::new()
                .on("eth_requestAccounts", Ok(json!([ALICE])))
                .on("eth_chainId", Ok(json!("0x1c72"))),
        );
        adapter.connect().await.unwrap();
        let mut events = adapter.subscribe_events();
        let subscription = adapter.subscribe().unwrap();

        provider
            .event_tx
            .send(ProviderEvent::AccountsChanged(vec!["0xBob".to_string()]))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WalletEvent::AccountChanged("0xBob".to_string())
        );
        assert_eq!(adapter.address().await.as_deref(), Some("0xBob"));

        provider
            .event_tx
            .send(ProviderEvent::ChainChanged("0x1".to_string()))
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), WalletEvent::ReloadRequired(1));
        assert!(!adapter.is_correct_network().await);

        provider
            .event_tx
            .send(ProviderEvent::AccountsChanged(vec![]))
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), WalletEvent::Disconnected);
        let state = adapter.state().await;
        assert!(!state.is_connected);
        assert!(state.address.is_none());

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        provider
            .event_tx
            .send(ProviderEvent::AccountsChanged(vec![ALICE.to_string()]))
            .ok();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(adapter.address().await.is_none());
    }
}
