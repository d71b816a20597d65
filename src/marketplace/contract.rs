//! Marketplace contract access: trait seam, ethers-backed binding, confirmation polling

use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod bindings {
    ethers::contract::abigen!(
        Marketplace,
        r#"[
            struct ModelRecord { string dataHavenHash; address creator; string modelName; uint256 pricePerPrompt; }
            function listModel(string _dataHavenHash, string _modelName, uint256 _pricePerPrompt) external
            function rentModel(string _dataHavenHash) external payable
            function hasAccess(address user, string dataHavenHash) external view returns (bool)
            function getModel(string _dataHavenHash) external view returns (ModelRecord)
            function getModelCount() external view returns (uint256)
            function getModelHashAtIndex(uint256 index) external view returns (string)
            event ModelListed(string indexed dataHavenHash, address indexed creator, string modelName, uint256 pricePerPrompt)
            event ModelRented(string indexed dataHavenHash, address indexed renter, uint256 amountPaid)
        ]"#
    );
}

/// A model listing as stored by the contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub content_hash: String,
    pub creator: String,
    pub name: String,
    pub price_wei: U256,
}

/// Read/write surface of the marketplace contract
#[async_trait]
pub trait MarketplaceContract: Send + Sync {
    async fn model_count(&self) -> VaultResult<u64>;

    async fn model_hash_at(&self, index: u64) -> VaultResult<String>;

    async fn get_model(&self, hash: &str) -> VaultResult<ModelRecord>;

    async fn has_access(&self, user: &str, hash: &str) -> VaultResult<bool>;

    /// Submit `listModel` from `from` and wait for confirmation; returns the tx hash
    async fn list_model(
        &self,
        from: &str,
        hash: &str,
        name: &str,
        price_wei: U256,
    ) -> VaultResult<String>;

    /// Submit `rentModel` paying `value` and wait for confirmation; returns the tx hash
    async fn rent_model(&self, from: &str, hash: &str, value: U256) -> VaultResult<String>;
}

/// Production binding over a JSON-RPC node.
///
/// Writes go out as `eth_sendTransaction` with an explicit `from`, so the node
/// or wallet bridge behind `rpc_url` does the signing.
pub struct EthersMarketplace {
    provider: Arc<Provider<Http>>,
    contract: bindings::Marketplace<Provider<Http>>,
    address: Address,
    poll_interval: Duration,
    max_attempts: u32,
    deployed: AtomicBool,
}

impl EthersMarketplace {
    pub fn new(
        rpc_url: &str,
        contract_address: &str,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> VaultResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| VaultError::Configuration(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let address = parse_address(contract_address)?;
        let provider = Arc::new(provider);
        let contract = bindings::Marketplace::new(address, provider.clone());

        Ok(Self {
            provider,
            contract,
            address,
            poll_interval,
            max_attempts,
            deployed: AtomicBool::new(false),
        })
    }

    pub fn provider(&self) -> &Arc<Provider<Http>> {
        &self.provider
    }

    async fn ensure_deployed(&self) -> VaultResult<()> {
        if self.deployed.load(Ordering::Acquire) {
            return Ok(());
        }
        let code = self
            .provider
            .get_code(self.address, None)
            .await
            .map_err(contract_error)?;
        if code.as_ref().is_empty() {
            return Err(VaultError::contract(
                None,
                format!("no contract code at {:?}", self.address),
            ));
        }
        self.deployed.store(true, Ordering::Release);
        Ok(())
    }

    async fn confirm(&self, tx_hash: TxHash) -> VaultResult<String> {
        let receipt =
            await_confirmation(self.provider.as_ref(), tx_hash, self.poll_interval, self.max_attempts)
                .await?;
        tracing::info!(
            tx = ?receipt.transaction_hash,
            block = ?receipt.block_number,
            "Transaction confirmed"
        );
        Ok(format!("{:?}", receipt.transaction_hash))
    }
}

#[async_trait]
impl MarketplaceContract for EthersMarketplace {
    async fn model_count(&self) -> VaultResult<u64> {
        self.ensure_deployed().await?;
        let count = self
            .contract
            .get_model_count()
            .call()
            .await
            .map_err(contract_error)?;
        if count > U256::from(u64::MAX) {
            return Err(VaultError::contract(None, "model count out of range"));
        }
        Ok(count.as_u64())
    }

    async fn model_hash_at(&self, index: u64) -> VaultResult<String> {
        self.contract
            .get_model_hash_at_index(U256::from(index))
            .call()
            .await
            .map_err(contract_error)
    }

    async fn get_model(&self, hash: &str) -> VaultResult<ModelRecord> {
        read_model(&self.contract, hash).await
    }

    async fn has_access(&self, user: &str, hash: &str) -> VaultResult<bool> {
        self.ensure_deployed().await?;
        self.contract
            .has_access(parse_address(user)?, hash.to_string())
            .call()
            .await
            .map_err(contract_error)
    }

    async fn list_model(
        &self,
        from: &str,
        hash: &str,
        name: &str,
        price_wei: U256,
    ) -> VaultResult<String> {
        self.ensure_deployed().await?;
        let call = self
            .contract
            .list_model(hash.to_string(), name.to_string(), price_wei)
            .from(parse_address(from)?);
        let tx_hash = {
            let pending = call.send().await.map_err(contract_error)?;
            pending.tx_hash()
        };
        tracing::info!(tx = ?tx_hash, hash = %hash, "listModel submitted");
        self.confirm(tx_hash).await
    }

    async fn rent_model(&self, from: &str, hash: &str, value: U256) -> VaultResult<String> {
        self.ensure_deployed().await?;
        let call = self
            .contract
            .rent_model(hash.to_string())
            .from(parse_address(from)?)
            .value(value);
        let tx_hash = {
            let pending = call.send().await.map_err(contract_error)?;
            pending.tx_hash()
        };
        tracing::info!(tx = ?tx_hash, hash = %hash, value = %value, "rentModel submitted");
        self.confirm(tx_hash).await
    }
}

/// `getModel` comes back as a `(hash, creator, name, price)` tuple
async fn read_model<M: Middleware + 'static>(
    contract: &bindings::Marketplace<M>,
    hash: &str,
) -> VaultResult<ModelRecord> {
    let (content_hash, creator, name, price_wei) = contract
        .get_model(hash.to_string())
        .call()
        .await
        .map_err(contract_error)?;
    Ok(ModelRecord {
        content_hash,
        creator: format!("{:?}", creator),
        name,
        price_wei,
    })
}

/// Poll for a receipt every `interval`, giving up after `max_attempts` polls.
///
/// A receipt with status 0 is reported as a reverted contract call.
pub async fn await_confirmation<M: Middleware>(
    client: &M,
    tx_hash: TxHash,
    interval: Duration,
    max_attempts: u32,
) -> VaultResult<TransactionReceipt> {
    for attempt in 1..=max_attempts {
        match client.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                if receipt.status == Some(U64::zero()) {
                    return Err(VaultError::contract(
                        None,
                        format!("transaction {:?} reverted", tx_hash),
                    ));
                }
                return Ok(receipt);
            }
            Ok(None) => {
                tracing::debug!(tx = ?tx_hash, attempt, "Receipt not available yet");
            }
            Err(e) => {
                tracing::debug!(tx = ?tx_hash, attempt, error = %e, "Receipt poll failed");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::warn!(tx = ?tx_hash, attempts = max_attempts, "Confirmation timed out");
    Err(VaultError::ConfirmationTimeout {
        tx_hash: format!("{:?}", tx_hash),
        attempts: max_attempts,
    })
}

fn parse_address(value: &str) -> VaultResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| VaultError::InvalidRequest(format!("Invalid address {}: {}", value, e)))
}

fn contract_error(e: impl std::fmt::Display) -> VaultError {
    VaultError::contract(None, e.to_string())
}
