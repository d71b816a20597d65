//! Model marketplace: listings, rentals and access-gated chat

pub mod contract;

pub use contract::{EthersMarketplace, MarketplaceContract, ModelRecord, await_confirmation};

use crate::error::{VaultError, VaultResult};
use crate::format::strip_scheme;
use crate::inference::{ChatBackend, ChatMessage, Persona, TokenSink};
use crate::upload::{ContentStore, FileBlob};
use dashmap::DashMap;
use ethers::types::U256;
use ethers::utils::{format_ether, parse_ether};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A listed model as shown to renters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainModel {
    pub content_hash: String,
    pub creator: String,
    pub name: String,
    /// Price in minor units (wei)
    pub price_wei: U256,
    /// Price in whole-coin display units
    pub price: String,
    pub persona: Persona,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// True when this entry comes from the built-in showcase list
    pub showcase: bool,
}

impl OnChainModel {
    fn from_record(record: ModelRecord) -> Self {
        let showcase = showcase_models()
            .into_iter()
            .find(|m| same_hash(&m.content_hash, &record.content_hash));
        Self {
            price: display_price(record.price_wei),
            persona: showcase.as_ref().map_or(Persona::Reasoning, |m| m.persona),
            description: showcase.as_ref().and_then(|m| m.description.clone()),
            category: showcase.and_then(|m| m.category),
            content_hash: record.content_hash,
            creator: record.creator,
            name: record.name,
            price_wei: record.price_wei,
            showcase: false,
        }
    }
}

/// Outcome of a rent request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentOutcome {
    pub content_hash: String,
    pub granted: bool,
    /// False when access already existed and no payment was sent
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Outcome of a listing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingOutcome {
    pub content_hash: String,
    pub name: String,
    pub price_wei: U256,
    pub tx_hash: String,
}

const CODEBOT_HASH: &str = "dh://QmX9aK4mNzP2rLvT8sWqBdFhGjCeUoYiI1bR3kMnVw5ZAp";
const CREATIVE_HASH: &str = "dh://QmB7nJ2pKwL4tMxR6yNqCsFiVuHoZAeG9dQ1k8mWvTrY3Es";
const REASON_HASH: &str = "dh://QmC3fH8qLvP5nMxK9yWsAbTdGiUoJe2R7k4mBnVrY1ZwFg";

/// Fixed listings shown when the contract is unreachable or empty
pub fn showcase_models() -> Vec<OnChainModel> {
    let entry = |hash: &str,
                 name: &str,
                 wei: u64,
                 persona: Persona,
                 creator: &str,
                 category: &str,
                 description: &str| {
        let price_wei = U256::from(wei);
        OnChainModel {
            content_hash: hash.to_string(),
            creator: creator.to_string(),
            name: name.to_string(),
            price: display_price(price_wei),
            price_wei,
            persona,
            description: Some(description.to_string()),
            category: Some(category.to_string()),
            showcase: true,
        }
    };

    vec![
        entry(
            CODEBOT_HASH,
            "CodeBot v2",
            1_000_000_000_000_000,
            Persona::Code,
            "0xdEaD...bEeF",
            "Code Generation",
            "Expert full-stack code generator. Supports 40+ languages with architecture suggestions.",
        ),
        entry(
            CREATIVE_HASH,
            "CreativeWriter",
            5_000_000_000_000_000,
            Persona::Creative,
            "0xCafe...1234",
            "Creative AI",
            "Powerful creative writing LLM. Generates stories, scripts, and marketing copy.",
        ),
        entry(
            REASON_HASH,
            "QuantumReason",
            10_000_000_000_000_000,
            Persona::Reasoning,
            "0xAbcd...5678",
            "Reasoning",
            "Advanced reasoning model. Multi-step logic, math proofs, and scientific analysis.",
        ),
    ]
}

/// Whole-coin rendering of a wei amount without trailing zeros
pub fn display_price(wei: U256) -> String {
    let formatted = format_ether(wei);
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => formatted,
    }
}

/// Parse a positive whole-coin amount into wei
pub fn parse_price(price: &str) -> VaultResult<U256> {
    let wei = parse_ether(price.trim())
        .map_err(|_| VaultError::InvalidRequest("Enter a valid price.".to_string()))?;
    if wei.is_zero() {
        return Err(VaultError::InvalidRequest("Enter a valid price.".to_string()));
    }
    Ok(wei)
}

fn key(hash: &str) -> String {
    strip_scheme(hash).to_string()
}

/// Access grants are per (caller, model); addresses compare case-insensitively
fn access_key(caller: &str, hash: &str) -> (String, String) {
    (caller.trim().to_lowercase(), key(hash))
}

fn same_hash(a: &str, b: &str) -> bool {
    strip_scheme(a) == strip_scheme(b)
}

/// Marketplace session state: cached listings, per-model access, chat history and transcripts
pub struct MarketplaceWorkflow {
    contract: Option<Arc<dyn MarketplaceContract>>,
    store: Arc<dyn ContentStore>,
    chat: Arc<dyn ChatBackend>,
    models: RwLock<Vec<OnChainModel>>,
    access: DashMap<(String, String), bool>,
    histories: DashMap<String, Vec<ChatMessage>>,
    transcripts: DashMap<String, String>,
}

impl MarketplaceWorkflow {
    pub fn new(
        contract: Option<Arc<dyn MarketplaceContract>>,
        store: Arc<dyn ContentStore>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            contract,
            store,
            chat,
            models: RwLock::new(Vec::new()),
            access: DashMap::new(),
            histories: DashMap::new(),
            transcripts: DashMap::new(),
        }
    }

    fn contract(&self) -> VaultResult<&Arc<dyn MarketplaceContract>> {
        self.contract.as_ref().ok_or_else(|| {
            VaultError::Configuration("No marketplace contract address configured".to_string())
        })
    }

    /// All listed models, or the showcase list when the contract yields nothing
    pub async fn list_models(&self) -> Vec<OnChainModel> {
        let models = match &self.contract {
            None => showcase_models(),
            Some(contract) => match fetch_listed(contract.as_ref()).await {
                Ok(models) if !models.is_empty() => models,
                Ok(_) => {
                    tracing::info!("No models listed on-chain, using showcase list");
                    showcase_models()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read listings, using showcase list");
                    showcase_models()
                }
            },
        };

        *self.models.write().await = models.clone();
        models
    }

    /// Resolve a model by hash, with or without its scheme prefix
    pub async fn find_model(&self, hash: &str) -> VaultResult<OnChainModel> {
        if let Some(model) = self
            .models
            .read()
            .await
            .iter()
            .find(|m| same_hash(&m.content_hash, hash))
        {
            return Ok(model.clone());
        }

        self.list_models()
            .await
            .into_iter()
            .find(|m| same_hash(&m.content_hash, hash))
            .ok_or_else(|| VaultError::NotFound(format!("Model {}", hash)))
    }

    /// Cached access merged with a fresh on-chain check when possible
    pub async fn has_access(&self, caller: &str, hash: &str) -> VaultResult<bool> {
        let model = self.find_model(hash).await?;
        let cached = self.cached_access(caller, &model.content_hash);
        let Some(contract) = &self.contract else {
            return Ok(cached);
        };

        let granted = contract.has_access(caller, &model.content_hash).await?;
        self.access
            .insert(access_key(caller, &model.content_hash), granted);
        Ok(granted)
    }

    pub fn cached_access(&self, caller: &str, hash: &str) -> bool {
        self.access
            .get(&access_key(caller, hash))
            .is_some_and(|v| *v)
    }

    /// Upload the model file and register it with a price
    pub async fn list_model(
        &self,
        caller: &str,
        file: FileBlob,
        name: &str,
        price: &str,
    ) -> VaultResult<ListingOutcome> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidRequest("Model name is required.".to_string()));
        }
        let price_wei = parse_price(price)?;
        if file.bytes.is_empty() {
            return Err(VaultError::InvalidRequest("Please upload a model file.".to_string()));
        }
        let contract = self.contract()?;

        let hash = self.store.upload(&file).await?;
        tracing::info!(hash = %hash.value, name = %name, "Model file uploaded, submitting listing");

        let tx_hash = contract
            .list_model(caller, &hash.value, name, price_wei)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "listModel failed"))?;

        self.models.write().await.clear();
        crate::metrics::record_listing();

        Ok(ListingOutcome {
            content_hash: hash.value,
            name: name.to_string(),
            price_wei,
            tx_hash,
        })
    }

    /// Pay for access unless the caller already has it
    pub async fn rent_model(&self, caller: &str, hash: &str) -> VaultResult<RentOutcome> {
        let contract = self.contract()?;
        let model = self.find_model(hash).await?;
        let k = access_key(caller, &model.content_hash);

        if contract.has_access(caller, &model.content_hash).await? {
            tracing::info!(model = %model.name, "Access already granted, skipping payment");
            self.access.insert(k, true);
            crate::metrics::record_rental("already_granted");
            return Ok(RentOutcome {
                content_hash: model.content_hash,
                granted: true,
                paid: false,
                tx_hash: None,
            });
        }

        match contract
            .rent_model(caller, &model.content_hash, model.price_wei)
            .await
        {
            Ok(tx_hash) => {
                tracing::info!(model = %model.name, tx = %tx_hash, "Model rented");
                self.access.insert(k, true);
                crate::metrics::record_rental("paid");
                Ok(RentOutcome {
                    content_hash: model.content_hash,
                    granted: true,
                    paid: true,
                    tx_hash: Some(tx_hash),
                })
            }
            Err(VaultError::Contract { message, .. }) if message.contains("Already has access") => {
                self.access.insert(k, true);
                crate::metrics::record_rental("already_granted");
                Ok(RentOutcome {
                    content_hash: model.content_hash,
                    granted: true,
                    paid: false,
                    tx_hash: None,
                })
            }
            Err(e) => {
                tracing::warn!(model = %model.name, error = %e, "Rent failed");
                crate::metrics::record_rental(e.kind());
                Err(e)
            }
        }
    }

    /// Stream an answer for `prompt`, re-checking on-chain access first.
    ///
    /// Tokens go to `sink` and to the per-model transcript. History is only
    /// extended once the stream completes.
    pub async fn chat(
        &self,
        caller: &str,
        hash: &str,
        prompt: &str,
        sink: &mut TokenSink<'_>,
    ) -> VaultResult<String> {
        if prompt.trim().is_empty() {
            return Err(VaultError::InvalidRequest("Prompt is empty.".to_string()));
        }
        let model = self.find_model(hash).await?;
        let k = key(&model.content_hash);

        self.verify_access(caller, &model).await?;

        let mut history = self
            .histories
            .get(&k)
            .map(|h| h.clone())
            .unwrap_or_default();
        history.push(ChatMessage::user(prompt));
        self.transcripts.insert(k.clone(), String::new());

        let transcripts = &self.transcripts;
        let mut tokens = 0usize;
        let mut forward = |token: &str| {
            transcripts.entry(k.clone()).or_default().push_str(token);
            tokens += 1;
            sink(token);
        };

        let full = self
            .chat
            .stream_chat(model.persona, &history, &mut forward)
            .await?;

        crate::metrics::record_chat_tokens(tokens);
        history.push(ChatMessage::assistant(full.clone()));
        self.histories.insert(k, history);

        Ok(full)
    }

    async fn verify_access(&self, caller: &str, model: &OnChainModel) -> VaultResult<()> {
        let k = access_key(caller, &model.content_hash);
        let cached = self.cached_access(caller, &model.content_hash);

        let Some(contract) = &self.contract else {
            return if cached { Ok(()) } else { Err(VaultError::AccessRequired) };
        };

        match contract.has_access(caller, &model.content_hash).await {
            Ok(true) => {
                self.access.insert(k, true);
                Ok(())
            }
            Ok(false) => {
                self.access.insert(k, false);
                if cached {
                    Err(VaultError::AccessRevoked)
                } else {
                    Err(VaultError::AccessRequired)
                }
            }
            Err(e) if cached => {
                tracing::warn!(error = %e, "hasAccess check skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn transcript(&self, hash: &str) -> String {
        self.transcripts
            .get(&key(hash))
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn history(&self, hash: &str) -> Vec<ChatMessage> {
        self.histories
            .get(&key(hash))
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Drop everything bound to the current chain
    pub async fn reset_chain_state(&self) {
        self.access.clear();
        self.histories.clear();
        self.transcripts.clear();
        self.models.write().await.clear();
        tracing::info!("Marketplace state reset for new chain");
    }

    /// Drop grants and conversations when the wallet account changes or goes away.
    ///
    /// Listings stay cached since they do not depend on the caller.
    pub fn reset_account_state(&self) {
        self.access.clear();
        self.histories.clear();
        self.transcripts.clear();
        tracing::info!("Marketplace state reset for new account");
    }
}

const MAX_PREALLOCATED_MODELS: u64 = 256;

async fn fetch_listed(contract: &dyn MarketplaceContract) -> VaultResult<Vec<OnChainModel>> {
    let count = contract.model_count().await?;
    // The count comes from the chain, so it only bounds the loop
    let mut models = Vec::with_capacity(count.min(MAX_PREALLOCATED_MODELS) as usize);
    for index in 0..count {
        let hash = contract.model_hash_at(index).await?;
        let record = contract.get_model(&hash).await?;
        models.push(OnChainModel::from_record(record));
    }
    Ok(models)
}
