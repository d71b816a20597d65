//! Session controller owning every workflow for one front end

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::inference::{ChatBackend, InferenceClient};
use crate::ledger::{Ledger, VaultWorkflow};
use crate::marketplace::{EthersMarketplace, MarketplaceContract, MarketplaceWorkflow};
use crate::upload::{ContentStore, PinningClient};
use crate::verify::Verifier;
use crate::wallet::{HttpWalletProvider, WalletAdapter, WalletEvent, WalletProvider, WalletSubscription};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// External collaborators a session talks to
pub struct SessionBackends {
    pub provider: Option<Arc<dyn WalletProvider>>,
    pub store: Arc<dyn ContentStore>,
    pub contract: Option<Arc<dyn MarketplaceContract>>,
    pub chat: Arc<dyn ChatBackend>,
}

impl SessionBackends {
    /// Production backends built from configuration
    pub fn from_config(config: &VaultConfig) -> VaultResult<(Self, Vec<JoinHandle<()>>)> {
        let mut background = Vec::new();

        let provider = match &config.wallet.provider_url {
            Some(url) => {
                let provider = Arc::new(HttpWalletProvider::new(url.clone()));
                background.push(provider.spawn_event_poller(Duration::from_millis(
                    config.wallet.event_poll_interval_ms,
                )));
                Some(provider as Arc<dyn WalletProvider>)
            }
            None => {
                tracing::warn!("No wallet provider configured; connect requests will fail");
                None
            }
        };

        let contract = match &config.contract.address {
            Some(address) => Some(Arc::new(EthersMarketplace::new(
                &config.contract.rpc_url,
                address,
                config.contract.poll_interval(),
                config.contract.confirmation_max_attempts,
            )?) as Arc<dyn MarketplaceContract>),
            None => {
                tracing::warn!("No contract address configured; marketplace runs on showcase data");
                None
            }
        };

        let backends = Self {
            provider,
            store: Arc::new(PinningClient::new(config.upload.clone())),
            contract,
            chat: Arc::new(InferenceClient::new(config.inference.clone())),
        };
        Ok((backends, background))
    }
}

pub struct Session {
    pub wallet: Arc<WalletAdapter>,
    pub ledger: Arc<Ledger>,
    pub vault: Arc<VaultWorkflow>,
    pub verifier: Arc<Verifier>,
    pub marketplace: Arc<MarketplaceWorkflow>,
    subscription: Mutex<Option<WalletSubscription>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: &VaultConfig, backends: SessionBackends) -> Self {
        let ledger = Arc::new(if config.seed_demo_assets {
            Ledger::with_demo_assets()
        } else {
            Ledger::new()
        });

        Self {
            wallet: Arc::new(WalletAdapter::new(
                backends.provider,
                config.wallet.clone(),
            )),
            vault: Arc::new(VaultWorkflow::new(
                ledger.clone(),
                backends.store.clone(),
                config.timing.clone(),
            )),
            verifier: Arc::new(Verifier::new(
                ledger.clone(),
                Duration::from_millis(config.timing.verify_delay_ms),
            )),
            marketplace: Arc::new(MarketplaceWorkflow::new(
                backends.contract,
                backends.store,
                backends.chat,
            )),
            ledger,
            subscription: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Build a session with production backends
    pub fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let (backends, background) = SessionBackends::from_config(config)?;
        let session = Self::new(config, backends);
        session.track(background);
        Ok(session)
    }

    fn track(&self, handles: Vec<JoinHandle<()>>) {
        self.background
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(handles);
    }

    /// Restore any existing wallet connection and start listening for wallet events
    pub async fn start(&self) {
        self.wallet.check_connection().await;

        if let Some(subscription) = self.wallet.subscribe() {
            *self.subscription.lock().unwrap_or_else(|p| p.into_inner()) = Some(subscription);
        }

        let mut events = self.wallet.subscribe_events();
        let marketplace = self.marketplace.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WalletEvent::ReloadRequired(chain_id)) => {
                        tracing::info!(chain_id, "Reloading chain-bound session state");
                        marketplace.reset_chain_state().await;
                    }
                    Ok(WalletEvent::AccountChanged(address)) => {
                        tracing::info!(address = %address, "Dropping grants of the previous account");
                        marketplace.reset_account_state();
                    }
                    Ok(WalletEvent::Disconnected) => marketplace.reset_account_state(),
                    Ok(WalletEvent::Connected(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.track(vec![handle]);
        tracing::info!("Session started");
    }

    /// Connected address, or an error asking the user to connect
    pub async fn require_address(&self) -> VaultResult<String> {
        self.wallet
            .address()
            .await
            .ok_or(VaultError::WalletNotConnected)
    }

    /// Tear down the wallet subscription and background tasks
    pub fn shutdown(&self) {
        self.subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        for handle in self
            .background
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
        {
            handle.abort();
        }
        tracing::info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
