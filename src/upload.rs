//! Pinning-service upload adapter

use crate::config::UploadConfig;
use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheme prefix carried by every content hash handed to callers
pub const HASH_SCHEME: &str = "dh://";

/// A file as received from the client
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Handle returned by a content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub value: String,
    /// False for mock hashes that do not address real content
    pub verifiable: bool,
}

/// Trait for content-addressed storage backends
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store the blob and return its `dh://` handle
    async fn upload(&self, file: &FileBlob) -> VaultResult<ContentHash>;
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Production content store backed by the Pinata pinning API
pub struct PinningClient {
    client: reqwest::Client,
    config: UploadConfig,
}

impl PinningClient {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn pin(&self, jwt: &str, file: &FileBlob) -> VaultResult<ContentHash> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(mime_or_default(&file.mime_type))
            .map_err(|e| VaultError::InvalidRequest(format!("Bad MIME type: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text(
                "pinataMetadata",
                serde_json::json!({ "name": file.name }).to_string(),
            )
            .text(
                "pinataOptions",
                serde_json::json!({ "cidVersion": 1 }).to_string(),
            );

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(jwt)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), file = %file.name, "Pinning request failed");
            return Err(VaultError::Upload {
                status: status.as_u16(),
                body,
            });
        }

        let pinned: PinResponse = response.json().await?;
        tracing::info!(file = %file.name, cid = %pinned.ipfs_hash, "File pinned");

        Ok(ContentHash {
            value: format!("{}{}", HASH_SCHEME, pinned.ipfs_hash),
            verifiable: true,
        })
    }
}

#[async_trait]
impl ContentStore for PinningClient {
    async fn upload(&self, file: &FileBlob) -> VaultResult<ContentHash> {
        match self.config.jwt.as_deref() {
            Some(jwt) => self.pin(jwt, file).await,
            None if self.config.allow_mock => {
                tokio::time::sleep(Duration::from_millis(self.config.mock_delay_ms)).await;
                let hash = mock_hash(&file.name);
                tracing::warn!(file = %file.name, hash = %hash, "No pinning credential, issued mock hash");
                Ok(ContentHash {
                    value: hash,
                    verifiable: false,
                })
            }
            None => Err(VaultError::Configuration(
                "No pinning credential configured (set PINATA_JWT)".to_string(),
            )),
        }
    }
}

fn mime_or_default(mime: &str) -> &str {
    if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    }
}

/// `dh://Qm<8 random>` followed by up to six word characters of the file name
pub fn mock_hash(file_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    let sanitized: String = file_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(6)
        .collect();
    format!("{}Qm{}{}DataHaven", HASH_SCHEME, suffix, sanitized)
}
