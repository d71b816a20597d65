//! In-memory stand-ins for the wallet, pinning service, contract and inference backend
#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::U256;
use lunar_vault::config::{TimingConfig, VaultConfig};
use lunar_vault::error::{VaultError, VaultResult};
use lunar_vault::format::strip_scheme;
use lunar_vault::inference::{ChatBackend, ChatMessage, Persona, TokenSink};
use lunar_vault::marketplace::{MarketplaceContract, ModelRecord};
use lunar_vault::upload::{ContentHash, ContentStore, FileBlob};
use lunar_vault::wallet::{ProviderEvent, RpcError, WalletProvider};
use lunar_vault::{Session, SessionBackends};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const ALICE: &str = "0x70997970c51812dc3a04f177aee4a79b907c3f8a";
pub const LOCAL_CHAIN: &str = "0x7a69";

/// Wallet that is already unlocked on the local dev chain
pub struct FakeWallet {
    pub accounts: Mutex<Vec<String>>,
    pub chain_id: Mutex<String>,
    pub reject: AtomicBool,
    /// Account handed out once the user approves a connection
    pub pending: Mutex<Option<String>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl FakeWallet {
    pub fn new(address: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(vec![address.to_string()]),
            chain_id: Mutex::new(LOCAL_CHAIN.to_string()),
            reject: AtomicBool::new(false),
            pending: Mutex::new(Some(address.to_string())),
            events,
        }
    }

    /// Wallet that has not authorized this origin yet
    pub fn locked(address: &str) -> Self {
        let wallet = Self::new(address);
        wallet.accounts.lock().unwrap().clear();
        wallet
    }

    pub fn emit(&self, event: ProviderEvent) {
        if let ProviderEvent::ChainChanged(chain) = &event {
            *self.chain_id.lock().unwrap() = chain.clone();
        }
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
        match method {
            "eth_accounts" => Ok(json!(self.accounts.lock().unwrap().clone())),
            "eth_requestAccounts" => {
                if self.reject.load(Ordering::SeqCst) {
                    return Err(RpcError::new(4001, "User rejected the request."));
                }
                let mut accounts = self.accounts.lock().unwrap();
                if accounts.is_empty()
                    && let Some(address) = self.pending.lock().unwrap().clone()
                {
                    accounts.push(address);
                }
                Ok(json!(accounts.clone()))
            }
            "eth_chainId" => Ok(json!(self.chain_id.lock().unwrap().clone())),
            "wallet_switchEthereumChain" | "wallet_revokePermissions" => Ok(Value::Null),
            other => Err(RpcError::new(-32601, format!("{} not supported", other))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Content store handing out sequential hashes
#[derive(Default)]
pub struct FakeStore {
    pub uploads: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn upload(&self, file: &FileBlob) -> VaultResult<ContentHash> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VaultError::Upload {
                status: 500,
                body: "pinning unavailable".to_string(),
            });
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContentHash {
            value: format!("dh://QmFake{:04}{}", n, file.name.replace('.', "")),
            verifiable: true,
        })
    }
}

/// Marketplace contract kept in memory
#[derive(Default)]
pub struct FakeContract {
    pub models: Mutex<Vec<ModelRecord>>,
    pub grants: Mutex<HashSet<(String, String)>>,
    pub rent_calls: AtomicUsize,
    pub paid: Mutex<Vec<U256>>,
    pub unreachable: AtomicBool,
}

impl FakeContract {
    pub fn with_model(hash: &str, name: &str, price_wei: u64) -> Self {
        let contract = Self::default();
        contract.models.lock().unwrap().push(ModelRecord {
            content_hash: hash.to_string(),
            creator: "0x00000000000000000000000000000000000000c0".to_string(),
            name: name.to_string(),
            price_wei: U256::from(price_wei),
        });
        contract
    }

    pub fn revoke(&self, user: &str, hash: &str) {
        self.grants
            .lock()
            .unwrap()
            .remove(&(user.to_lowercase(), strip_scheme(hash).to_string()));
    }

    fn check(&self) -> VaultResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(VaultError::contract(None, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketplaceContract for FakeContract {
    async fn model_count(&self) -> VaultResult<u64> {
        self.check()?;
        Ok(self.models.lock().unwrap().len() as u64)
    }

    async fn model_hash_at(&self, index: u64) -> VaultResult<String> {
        self.check()?;
        self.models
            .lock()
            .unwrap()
            .get(index as usize)
            .map(|m| m.content_hash.clone())
            .ok_or_else(|| VaultError::contract(None, "index out of bounds"))
    }

    async fn get_model(&self, hash: &str) -> VaultResult<ModelRecord> {
        self.check()?;
        self.models
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.content_hash == hash)
            .cloned()
            .ok_or_else(|| VaultError::contract(None, "Model not found"))
    }

    async fn has_access(&self, user: &str, hash: &str) -> VaultResult<bool> {
        self.check()?;
        Ok(self
            .grants
            .lock()
            .unwrap()
            .contains(&(user.to_lowercase(), strip_scheme(hash).to_string())))
    }

    async fn list_model(
        &self,
        from: &str,
        hash: &str,
        name: &str,
        price_wei: U256,
    ) -> VaultResult<String> {
        self.check()?;
        self.models.lock().unwrap().push(ModelRecord {
            content_hash: hash.to_string(),
            creator: from.to_string(),
            name: name.to_string(),
            price_wei,
        });
        Ok(format!("0xlist{}", self.models.lock().unwrap().len()))
    }

    async fn rent_model(&self, from: &str, hash: &str, value: U256) -> VaultResult<String> {
        self.check()?;
        let n = self.rent_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let key = (from.to_lowercase(), strip_scheme(hash).to_string());
        if !self.grants.lock().unwrap().insert(key) {
            return Err(VaultError::contract(
                None,
                "execution reverted: Already has access",
            ));
        }
        self.paid.lock().unwrap().push(value);
        Ok(format!("0xrent{}", n))
    }
}

/// Chat backend replaying fixed chunks
pub struct FakeChat {
    pub chunks: Vec<String>,
    pub prompts: Mutex<Vec<(Persona, Vec<ChatMessage>)>>,
}

impl FakeChat {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn stream_chat(
        &self,
        persona: Persona,
        history: &[ChatMessage],
        sink: &mut TokenSink<'_>,
    ) -> VaultResult<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((persona, history.to_vec()));
        let mut full = String::new();
        for chunk in &self.chunks {
            sink(chunk);
            full.push_str(chunk);
        }
        Ok(full)
    }
}

/// Handles to the fakes behind a test session
pub struct Fakes {
    pub wallet: Arc<FakeWallet>,
    pub store: Arc<FakeStore>,
    pub contract: Option<Arc<FakeContract>>,
    pub chat: Arc<FakeChat>,
}

pub fn test_config() -> VaultConfig {
    VaultConfig {
        timing: TimingConfig::immediate(),
        ..Default::default()
    }
}

pub fn fakes(contract: Option<FakeContract>) -> Fakes {
    Fakes {
        wallet: Arc::new(FakeWallet::new(ALICE)),
        store: Arc::new(FakeStore::default()),
        contract: contract.map(Arc::new),
        chat: Arc::new(FakeChat::new(&["Hello", ", ", "world"])),
    }
}

pub fn build_session(config: &VaultConfig, fakes: &Fakes) -> Session {
    Session::new(
        config,
        SessionBackends {
            provider: Some(fakes.wallet.clone() as Arc<dyn WalletProvider>),
            store: fakes.store.clone(),
            contract: fakes
                .contract
                .clone()
                .map(|c| c as Arc<dyn MarketplaceContract>),
            chat: fakes.chat.clone(),
        },
    )
}
