//! Hash verification against the in-memory ledger

use crate::error::{VaultError, VaultResult};
use crate::ledger::{Ledger, VaultedAsset};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FOUND_MESSAGE: &str = "Verified!";
pub const NOT_FOUND_MESSAGE: &str = "Hash not found. This asset has not been vaulted.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<VaultedAsset>,
    pub message: String,
}

pub struct Verifier {
    ledger: Arc<Ledger>,
    delay: Duration,
    in_progress: AtomicBool,
    last_result: Mutex<Option<VerificationResult>>,
}

impl Verifier {
    pub fn new(ledger: Arc<Ledger>, delay: Duration) -> Self {
        Self {
            ledger,
            delay,
            in_progress: AtomicBool::new(false),
            last_result: Mutex::new(None),
        }
    }

    pub fn is_verifying(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn last_result(&self) -> Option<VerificationResult> {
        self.last_result
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Look `hash` up in the ledger; unknown hashes yield `found: false`.
    ///
    /// One lookup runs at a time. A call made while another is in flight fails
    /// with [`VaultError::Busy`] and leaves the running one untouched.
    pub async fn verify(&self, hash: &str) -> VaultResult<VerificationResult> {
        let _in_progress = InProgress::acquire(&self.in_progress)
            .ok_or_else(|| VaultError::Busy("A verification is in progress".to_string()))?;
        *self.last_result.lock().unwrap_or_else(|p| p.into_inner()) = None;

        tokio::time::sleep(self.delay).await;

        let result = match self.ledger.find_by_hash(hash).await {
            Some(asset) => VerificationResult {
                found: true,
                asset: Some(asset),
                message: FOUND_MESSAGE.to_string(),
            },
            None => VerificationResult {
                found: false,
                asset: None,
                message: NOT_FOUND_MESSAGE.to_string(),
            },
        };

        tracing::debug!(hash = %hash.trim(), found = result.found, "Verification finished");
        crate::metrics::record_verification(result.found);

        *self.last_result.lock().unwrap_or_else(|p| p.into_inner()) = Some(result.clone());
        Ok(result)
    }
}

/// Holds the in-progress flag; released on drop, including when the caller goes away
struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
