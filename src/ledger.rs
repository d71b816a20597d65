//! In-memory asset ledger and the vault transaction state machine

use crate::config::TimingConfig;
use crate::error::{VaultError, VaultResult};
use crate::format::strip_scheme;
use crate::upload::{ContentStore, FileBlob};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

/// Verification status of a vaulted asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Verified,
    /// Hash does not address real content (mock upload)
    Pending,
    Failed,
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Pending => write!(f, "pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A file recorded in the ledger. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultedAsset {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub content_hash: String,
    /// Unix seconds
    pub timestamp: i64,
    pub creator: String,
    pub status: AssetStatus,
}

/// Lifecycle of one vault attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Uploading,
    Confirming,
    Success,
    Error,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Uploading => write!(f, "uploading"),
            Self::Confirming => write!(f, "confirming"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Current state plus the message shown next to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub state: TransactionState,
    pub message: String,
}

impl TransactionUpdate {
    fn idle() -> Self {
        Self {
            state: TransactionState::Idle,
            message: String::new(),
        }
    }
}

/// Result of [`VaultWorkflow::vault_asset`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<VaultedAsset>,
}

/// Most-recent-first collection of vaulted assets
pub struct Ledger {
    assets: RwLock<Vec<VaultedAsset>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            assets: RwLock::new(Vec::new()),
        }
    }

    /// Ledger pre-populated with the two showcase assets
    pub fn with_demo_assets() -> Self {
        let creator = "0x71C3a9A23F8b5E4D6c7A8B9C0D1E2F3A4B5C6D7E".to_string();
        let assets = vec![
            VaultedAsset {
                id: "1".to_string(),
                file_name: "artwork_v1.png".to_string(),
                file_type: "image/png".to_string(),
                file_size: 2_457_600,
                content_hash: "dh://QmX7bV9aK3mP5nQ8rS2tU6wY1zC4dE7fG0hI9jK1lM2nO3p".to_string(),
                timestamp: 1_708_876_800,
                creator: creator.clone(),
                status: AssetStatus::Verified,
            },
            VaultedAsset {
                id: "2".to_string(),
                file_name: "whitepaper.pdf".to_string(),
                file_type: "application/pdf".to_string(),
                file_size: 5_120_000,
                content_hash: "dh://QmK9pR4sT7uW2xY5zC8dE1fG4hI7jK0lM3nO6pQ9rS2tU5v".to_string(),
                timestamp: 1_708_790_400,
                creator,
                status: AssetStatus::Verified,
            },
        ];
        Self {
            assets: RwLock::new(assets),
        }
    }

    pub async fn list(&self) -> Vec<VaultedAsset> {
        self.assets.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }

    pub async fn prepend(&self, asset: VaultedAsset) {
        let mut assets = self.assets.write().await;
        assets.insert(0, asset);
        crate::metrics::update_ledger_size(assets.len());
    }

    /// Linear scan comparing hashes with their scheme prefix stripped; first match wins
    pub async fn find_by_hash(&self, hash: &str) -> Option<VaultedAsset> {
        let needle = strip_scheme(hash);
        if needle.is_empty() {
            return None;
        }
        self.assets
            .read()
            .await
            .iter()
            .find(|a| strip_scheme(&a.content_hash) == needle)
            .cloned()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives `idle -> uploading -> confirming -> success|error -> idle` for one controller
pub struct VaultWorkflow {
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    timing: TimingConfig,
    current: Arc<Mutex<TransactionUpdate>>,
    update_tx: broadcast::Sender<TransactionUpdate>,
}

impl VaultWorkflow {
    pub fn new(ledger: Arc<Ledger>, store: Arc<dyn ContentStore>, timing: TimingConfig) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            ledger,
            store,
            timing,
            current: Arc::new(Mutex::new(TransactionUpdate::idle())),
            update_tx,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Snapshot of the current transaction state
    pub fn current(&self) -> TransactionUpdate {
        lock(&self.current).clone()
    }

    /// Every transition, in order
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionUpdate> {
        self.update_tx.subscribe()
    }

    /// Upload `file`, wait for finality, and record the asset.
    ///
    /// Fails only with [`VaultError::Busy`] when another attempt is in flight
    /// or [`VaultError::WalletNotConnected`] for a blank creator. Workflow
    /// failures land in the `error` state and come back as `success: false`.
    pub async fn vault_asset(
        &self,
        file: FileBlob,
        asset_name: &str,
        creator: &str,
    ) -> VaultResult<VaultOutcome> {
        if creator.trim().is_empty() {
            return Err(VaultError::WalletNotConnected);
        }
        self.begin()?;
        let attempt = AttemptGuard {
            current: self.current.clone(),
            update_tx: self.update_tx.clone(),
            reset_after_ms: self.timing.error_display_ms,
            armed: true,
        };

        tracing::info!(file = %file.name, size = file.size(), "Vault attempt started");

        let hash = match self.store.upload(&file).await {
            Ok(hash) => hash,
            Err(e) => {
                attempt.disarm();
                return Ok(self.fail(e));
            }
        };

        self.transition(
            TransactionState::Confirming,
            "Awaiting network confirmation...",
        );
        tokio::time::sleep(Duration::from_millis(self.timing.confirm_delay_ms)).await;

        let file_name = match asset_name.trim() {
            "" => file.name.clone(),
            name => name.to_string(),
        };
        let asset = VaultedAsset {
            id: uuid::Uuid::new_v4().to_string(),
            file_name,
            file_type: file.mime_type.clone(),
            file_size: file.size(),
            content_hash: hash.value,
            timestamp: chrono::Utc::now().timestamp(),
            creator: creator.to_string(),
            status: if hash.verifiable {
                AssetStatus::Verified
            } else {
                AssetStatus::Pending
            },
        };

        self.ledger.prepend(asset.clone()).await;
        attempt.disarm();

        let message = "Asset Vaulted Successfully!";
        self.transition(TransactionState::Success, message);
        self.schedule_reset(self.timing.success_display_ms);

        tracing::info!(
            hash = %asset.content_hash,
            status = %asset.status,
            "Asset vaulted"
        );
        crate::metrics::record_vault_attempt("success");

        Ok(VaultOutcome {
            success: true,
            message: message.to_string(),
            asset: Some(asset),
        })
    }

    fn begin(&self) -> VaultResult<()> {
        let mut current = lock(&self.current);
        if current.state != TransactionState::Idle {
            return Err(VaultError::Busy(format!(
                "A vault attempt is already {}",
                current.state
            )));
        }
        *current = TransactionUpdate {
            state: TransactionState::Uploading,
            message: "Uploading to DataHaven...".to_string(),
        };
        let _ = self.update_tx.send(current.clone());
        Ok(())
    }

    fn transition(&self, state: TransactionState, message: &str) {
        publish(&self.current, &self.update_tx, state, message);
    }

    fn fail(&self, err: VaultError) -> VaultOutcome {
        let message = err.user_message();
        tracing::warn!(error = %err, "Vault attempt failed");
        crate::metrics::record_vault_attempt("error");

        self.transition(TransactionState::Error, &message);
        self.schedule_reset(self.timing.error_display_ms);

        VaultOutcome {
            success: false,
            message,
            asset: None,
        }
    }

    fn schedule_reset(&self, delay_ms: u64) {
        schedule_reset(self.current.clone(), self.update_tx.clone(), delay_ms);
    }
}

/// Lands an abandoned attempt in `error` so the workflow does not stay busy.
///
/// Armed from `begin()` until the attempt reaches `success` or `error` itself.
struct AttemptGuard {
    current: Arc<Mutex<TransactionUpdate>>,
    update_tx: broadcast::Sender<TransactionUpdate>,
    reset_after_ms: u64,
    armed: bool,
}

impl AttemptGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Vault attempt abandoned before completion");
        crate::metrics::record_vault_attempt("cancelled");
        publish(
            &self.current,
            &self.update_tx,
            TransactionState::Error,
            "Vault attempt was cancelled.",
        );
        schedule_reset(
            self.current.clone(),
            self.update_tx.clone(),
            self.reset_after_ms,
        );
    }
}

fn publish(
    current: &Mutex<TransactionUpdate>,
    update_tx: &broadcast::Sender<TransactionUpdate>,
    state: TransactionState,
    message: &str,
) {
    let update = TransactionUpdate {
        state,
        message: message.to_string(),
    };
    *lock(current) = update.clone();
    let _ = update_tx.send(update);
}

fn schedule_reset(
    current: Arc<Mutex<TransactionUpdate>>,
    update_tx: broadcast::Sender<TransactionUpdate>,
    delay_ms: u64,
) {
    let reset = async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let idle = TransactionUpdate::idle();
        *lock(&current) = idle.clone();
        let _ = update_tx.send(idle);
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(reset);
        }
        Err(_) => tracing::debug!("No runtime to schedule the idle reset on"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::ContentHash;
    use async_trait::async_trait;

    struct FixedStore(VaultResult<ContentHash>);

    #[async_trait]
    impl ContentStore for FixedStore {
        async fn upload(&self, _file: &FileBlob) -> VaultResult<ContentHash> {
            match &self.0 {
                Ok(hash) => Ok(hash.clone()),
                Err(_) => Err(VaultError::Upload {
                    status: 401,
                    body: "unauthorized".to_string(),
                }),
            }
        }
    }

    fn workflow(store: FixedStore) -> VaultWorkflow {
        VaultWorkflow::new(
            Arc::new(Ledger::with_demo_assets()),
            Arc::new(store),
            TimingConfig::default(),
        )
    }

    fn real_hash(value: &str) -> FixedStore {
        FixedStore(Ok(ContentHash {
            value: value.to_string(),
            verifiable: true,
        }))
    }

    async fn drain(rx: &mut broadcast::Receiver<TransactionUpdate>) -> Vec<TransactionState> {
        let mut states = Vec::new();
        while let Ok(update) = rx.try_recv() {
            states.push(update.state);
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_name_falls_back_to_file_name() {
        let workflow = workflow(real_hash("dh://QmDoc"));
        let file = FileBlob::new("doc.pdf", "application/pdf", vec![0u8; 5_000_000]);

        let outcome = workflow.vault_asset(file, "   ", "0xAlice").await.unwrap();
        assert!(outcome.success);

        let assets = workflow.ledger().list().await;
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].file_name, "doc.pdf");
        assert_eq!(assets[0].file_size, 5_000_000);
        assert_eq!(assets[0].status, AssetStatus::Verified);
        assert_eq!(assets[0].creator, "0xAlice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_transition_sequence() {
        let workflow = workflow(real_hash("dh://QmSeq"));
        let mut rx = workflow.subscribe();
        let file = FileBlob::new("a.txt", "text/plain", b"abc".to_vec());

        workflow.vault_asset(file, "named", "0xAlice").await.unwrap();
        assert_eq!(workflow.current().state, TransactionState::Success);

        // Still showing success just before the display delay elapses
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(workflow.current().state, TransactionState::Success);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(workflow.current().state, TransactionState::Idle);
        assert_eq!(
            drain(&mut rx).await,
            vec![
                TransactionState::Uploading,
                TransactionState::Confirming,
                TransactionState::Success,
                TransactionState::Idle,
            ]
        );
        assert_eq!(workflow.ledger().list().await[0].file_name, "named");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_transition_sequence() {
        let workflow = workflow(FixedStore(Err(VaultError::Configuration(String::new()))));
        let mut rx = workflow.subscribe();
        let file = FileBlob::new("a.txt", "text/plain", b"abc".to_vec());

        let outcome = workflow.vault_asset(file, "", "0xAlice").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("401"));
        assert_eq!(workflow.current().state, TransactionState::Error);

        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(
            drain(&mut rx).await,
            vec![
                TransactionState::Uploading,
                TransactionState::Error,
                TransactionState::Idle,
            ]
        );
        assert_eq!(workflow.ledger().len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_attempt_is_refused() {
        let workflow = workflow(real_hash("dh://QmBusy"));
        let file = FileBlob::new("a.txt", "text/plain", b"abc".to_vec());
        workflow.vault_asset(file.clone(), "", "0xAlice").await.unwrap();

        // Success is still on display
        let err = workflow.vault_asset(file, "", "0xAlice").await.unwrap_err();
        assert!(matches!(err, VaultError::Busy(_)));
    }

    struct SlowStore;

    #[async_trait]
    impl ContentStore for SlowStore {
        async fn upload(&self, _file: &FileBlob) -> VaultResult<ContentHash> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ContentHash {
                value: "dh://QmSlow".to_string(),
                verifiable: true,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_attempt_returns_to_idle() {
        let workflow = Arc::new(VaultWorkflow::new(
            Arc::new(Ledger::new()),
            Arc::new(SlowStore),
            TimingConfig::default(),
        ));
        let mut rx = workflow.subscribe();
        let file = FileBlob::new("a.txt", "text/plain", b"abc".to_vec());

        let task = tokio::spawn({
            let workflow = workflow.clone();
            let file = file.clone();
            async move { workflow.vault_asset(file, "", "0xAlice").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(workflow.current().state, TransactionState::Uploading);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(workflow.current().state, TransactionState::Error);

        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(workflow.current().state, TransactionState::Idle);
        assert_eq!(
            drain(&mut rx).await,
            vec![
                TransactionState::Uploading,
                TransactionState::Error,
                TransactionState::Idle,
            ]
        );
        assert!(workflow.ledger().is_empty().await);

        // The workflow accepts a new attempt
        let outcome = workflow.vault_asset(file, "", "0xAlice").await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_blank_creator_is_rejected() {
        let workflow = workflow(real_hash("dh://QmX"));
        let file = FileBlob::new("a.txt", "text/plain", b"abc".to_vec());
        let err = workflow.vault_asset(file, "", "").await.unwrap_err();
        assert!(matches!(err, VaultError::WalletNotConnected));
        assert_eq!(workflow.current().state, TransactionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_hash_is_pending() {
        let workflow = workflow(FixedStore(Ok(ContentHash {
            value: "dh://QmMOCKdocDataHaven".to_string(),
            verifiable: false,
        })));
        let file = FileBlob::new("doc", "text/plain", b"abc".to_vec());
        let outcome = workflow.vault_asset(file, "", "0xAlice").await.unwrap();
        assert_eq!(outcome.asset.unwrap().status, AssetStatus::Pending);
    }

    #[tokio::test]
    async fn test_find_by_hash_strips_scheme() {
        let ledger = Ledger::with_demo_assets();
        let found = ledger
            .find_by_hash("QmK9pR4sT7uW2xY5zC8dE1fG4hI7jK0lM3nO6pQ9rS2tU5v")
            .await
            .unwrap();
        assert_eq!(found.file_name, "whitepaper.pdf");
        assert!(ledger.find_by_hash("dh://").await.is_none());
    }
}
