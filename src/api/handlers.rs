//! API request handlers

use super::models::{
    AccessResponse, AssetInfo, ChatRequest, HealthResponse, TranscriptResponse, VerifyRequest,
    WalletResponse,
};
use super::routes::AppState;
use crate::error::{ErrorResponse, VaultError, VaultResult};
use crate::ledger::{TransactionUpdate, VaultOutcome};
use crate::marketplace::{ListingOutcome, OnChainModel, RentOutcome};
use crate::upload::FileBlob;
use crate::verify::VerificationResult;
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Service health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

async fn wallet_response(state: &AppState) -> WalletResponse {
    let wallet = &state.session.wallet;
    WalletResponse::new(wallet.state().await, wallet.is_correct_network().await)
}

/// GET /wallet - Current connection state
pub async fn get_wallet(State(state): State<AppState>) -> Json<WalletResponse> {
    Json(wallet_response(&state).await)
}

/// POST /wallet/connect - Request accounts and move to the target network
pub async fn connect_wallet(
    State(state): State<AppState>,
) -> Result<Json<WalletResponse>, VaultError> {
    state.session.wallet.connect().await?;
    Ok(Json(wallet_response(&state).await))
}

/// POST /wallet/disconnect - Forget the connection
pub async fn disconnect_wallet(State(state): State<AppState>) -> Json<WalletResponse> {
    state.session.wallet.disconnect().await;
    Json(wallet_response(&state).await)
}

/// GET /assets - Ledger, most recent first
pub async fn list_assets(State(state): State<AppState>) -> Json<Vec<AssetInfo>> {
    let assets = state.session.ledger.list().await;
    Json(assets.into_iter().map(AssetInfo::from).collect())
}

/// POST /vault - Upload a file and record it in the ledger
pub async fn vault_asset(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<VaultOutcome>), VaultError> {
    let creator = state.session.require_address().await?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    let asset_name = form.text("asset_name").unwrap_or_default();

    let outcome = state
        .session
        .vault
        .vault_asset(file, &asset_name, &creator)
        .await?;

    let status = if outcome.success {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)))
}

/// GET /vault/state - Vault transaction state
pub async fn vault_state(State(state): State<AppState>) -> Json<TransactionUpdate> {
    Json(state.session.vault.current())
}

/// GET /vault/events - Vault state transitions as server-sent events
pub async fn vault_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = BroadcastStream::new(state.session.vault.subscribe()).filter_map(
        |update| async move {
            match update {
                Ok(update) => serde_json::to_string(&update).ok().map(|data| {
                    Ok::<_, Infallible>(
                        Event::default().event(update.state.to_string()).data(data),
                    )
                }),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Vault event subscriber lagged");
                    None
                }
            }
        },
    );

    Sse::new(updates).keep_alive(KeepAlive::default())
}

/// POST /verify - Look a hash up in the ledger
pub async fn verify_hash(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerificationResult>, VaultError> {
    if req.hash.trim().is_empty() {
        return Err(VaultError::InvalidRequest("Enter a hash to verify.".to_string()));
    }
    Ok(Json(state.session.verifier.verify(&req.hash).await?))
}

/// GET /models - Listed models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<OnChainModel>> {
    Json(state.session.marketplace.list_models().await)
}

/// POST /models - Upload a model file and list it for rent
pub async fn create_listing(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ListingOutcome>), VaultError> {
    let caller = state.session.require_address().await?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    let name = form.text("name").unwrap_or_default();
    let price = form.text("price").unwrap_or_default();

    let outcome = state
        .session
        .marketplace
        .list_model(&caller, file, &name, &price)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /models/{hash}/access - Access check for the connected wallet
pub async fn model_access(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<AccessResponse>, VaultError> {
    let caller = state.session.require_address().await?;
    let model = state.session.marketplace.find_model(&hash).await?;
    let has_access = state
        .session
        .marketplace
        .has_access(&caller, &model.content_hash)
        .await?;

    Ok(Json(AccessResponse {
        content_hash: model.content_hash,
        has_access,
    }))
}

/// POST /models/{hash}/rent - Pay for access unless already granted
pub async fn rent_model(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<RentOutcome>, VaultError> {
    let caller = state.session.require_address().await?;
    let outcome = state.session.marketplace.rent_model(&caller, &hash).await?;
    Ok(Json(outcome))
}

/// GET /models/{hash}/transcript - Last streamed answer and history
pub async fn transcript(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<TranscriptResponse>, VaultError> {
    let model = state.session.marketplace.find_model(&hash).await?;
    let marketplace = &state.session.marketplace;

    Ok(Json(TranscriptResponse {
        transcript: marketplace.transcript(&model.content_hash),
        history: marketplace.history(&model.content_hash),
        content_hash: model.content_hash,
    }))
}

enum ChatFrame {
    Token(String),
    Done,
    Failed(VaultError),
}

/// POST /models/{hash}/chat - Stream an answer as server-sent events.
///
/// Failures before the first token come back as plain error responses;
/// later ones end the stream with an `error` event.
pub async fn chat(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, VaultError> {
    let caller = state.session.require_address().await?;
    let marketplace = state.session.marketplace.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let token_tx = tx.clone();
        let mut sink = move |token: &str| {
            let _ = token_tx.send(ChatFrame::Token(token.to_string()));
        };
        let frame = match marketplace.chat(&caller, &hash, &req.prompt, &mut sink).await {
            Ok(_) => ChatFrame::Done,
            Err(e) => ChatFrame::Failed(e),
        };
        let _ = tx.send(frame);
    });

    let first = match rx.recv().await {
        Some(ChatFrame::Failed(e)) => return Err(e),
        Some(frame) => frame,
        None => return Err(VaultError::Inference("Chat task ended unexpectedly".to_string())),
    };

    let stream = async_stream::stream! {
        let mut next = Some(first);
        while let Some(frame) = next {
            match frame {
                ChatFrame::Token(token) => {
                    yield Ok::<_, Infallible>(Event::default().event("token").data(token));
                }
                ChatFrame::Done => {
                    yield Ok(Event::default().event("done").data("[DONE]"));
                    break;
                }
                ChatFrame::Failed(e) => {
                    tracing::warn!(error = %e, "Chat stream failed");
                    yield Ok(error_event(&e));
                    break;
                }
            }
            next = rx.recv().await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn error_event(error: &VaultError) -> Event {
    let body = ErrorResponse {
        error: error.user_message(),
        kind: error.kind().to_string(),
        timestamp: chrono::Utc::now(),
    };
    let data = serde_json::to_string(&body).unwrap_or_else(|_| body.error.clone());
    Event::default().event("error").data(data)
}

/// Multipart form split into its file part and text fields
struct UploadForm {
    file: Option<FileBlob>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> VaultResult<Self> {
        let mut form = Self {
            file: None,
            fields: HashMap::new(),
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| VaultError::InvalidRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| VaultError::InvalidRequest(e.body_text()))?;
                form.file = Some(FileBlob::new(file_name, mime_type, bytes.to_vec()));
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| VaultError::InvalidRequest(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn take_file(&mut self) -> VaultResult<FileBlob> {
        self.file
            .take()
            .ok_or_else(|| VaultError::InvalidRequest("Please select a file.".to_string()))
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }
}
