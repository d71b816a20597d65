//! Error taxonomy shared by every workflow, plus its HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate
pub type VaultResult<T> = Result<T, VaultError>;

/// Classification of a failed contract read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractFailure {
    UserRejected,
    InsufficientFunds,
    NotDeployed,
    Generic,
}

impl ContractFailure {
    /// Classify a raw provider or contract error by code and message inspection
    pub fn classify(code: Option<i64>, message: &str) -> Self {
        let lower = message.to_lowercase();
        if code == Some(4001)
            || lower.contains("code: 4001")
            || lower.contains("user rejected")
            || message.contains("ACTION_REJECTED")
        {
            Self::UserRejected
        } else if lower.contains("insufficient funds") {
            Self::InsufficientFunds
        } else if lower.contains("no contract code")
            || lower.contains("returned no data")
            || lower.contains("could not decode")
        {
            Self::NotDeployed
        } else {
            Self::Generic
        }
    }
}

impl std::fmt::Display for ContractFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRejected => write!(f, "user_rejected"),
            Self::InsufficientFunds => write!(f, "insufficient_funds"),
            Self::NotDeployed => write!(f, "not_deployed"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No wallet provider found. Install one from {install_url}")]
    ProviderMissing { install_url: String },

    #[error("Request rejected in wallet")]
    UserRejected,

    #[error("Wrong network: {0}")]
    NetworkMismatch(String),

    #[error("Wallet provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Upload failed ({status}): {body}")]
    Upload { status: u16, body: String },

    #[error("Contract call failed ({kind}): {message}")]
    Contract {
        kind: ContractFailure,
        message: String,
    },

    #[error("Transaction {tx_hash} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { tx_hash: String, attempts: u32 },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("On-chain access revoked. Please rent again.")]
    AccessRevoked,

    #[error("Rent this model to start chatting.")]
    AccessRequired,

    #[error("Connect your wallet first.")]
    WalletNotConnected,

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl VaultError {
    /// Build a contract error from a raw message, classifying it on the way
    pub fn contract(code: Option<i64>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Contract {
            kind: ContractFailure::classify(code, &message),
            message,
        }
    }

    /// Stable tag for clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::ProviderMissing { .. } => "provider_missing",
            Self::UserRejected => "user_rejected",
            Self::NetworkMismatch(_) => "network_mismatch",
            Self::Provider { .. } => "provider",
            Self::Upload { .. } => "upload",
            Self::Contract { kind, .. } => match kind {
                ContractFailure::UserRejected => "user_rejected",
                ContractFailure::InsufficientFunds => "insufficient_funds",
                ContractFailure::NotDeployed => "not_deployed",
                ContractFailure::Generic => "contract",
            },
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::Inference(_) => "inference",
            Self::AccessRevoked => "access_revoked",
            Self::AccessRequired => "access_required",
            Self::WalletNotConnected => "wallet_not_connected",
            Self::Busy(_) => "busy",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
        }
    }

    /// Short message suitable for display next to the control that failed
    pub fn user_message(&self) -> String {
        match self {
            Self::UserRejected => "Rejected in wallet.".to_string(),
            Self::Contract { kind, message } => match kind {
                ContractFailure::UserRejected => "Rejected in wallet.".to_string(),
                ContractFailure::InsufficientFunds => "Insufficient balance for this transaction.".to_string(),
                ContractFailure::NotDeployed => {
                    "Marketplace contract is not deployed on this network.".to_string()
                }
                ContractFailure::Generic => message.clone(),
            },
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::WalletNotConnected => StatusCode::UNAUTHORIZED,
            Self::AccessRevoked => StatusCode::FORBIDDEN,
            Self::AccessRequired => StatusCode::PAYMENT_REQUIRED,
            Self::UserRejected => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::NetworkMismatch(_) => StatusCode::CONFLICT,
            Self::ProviderMissing { .. } => StatusCode::PRECONDITION_FAILED,
            Self::Contract { kind, .. } => match kind {
                ContractFailure::UserRejected => StatusCode::FORBIDDEN,
                ContractFailure::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Upload { .. }
            | Self::Inference(_)
            | Self::Provider { .. }
            | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        VaultError::Transport(err.to_string())
    }
}

impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.user_message(),
            kind: self.kind().to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
