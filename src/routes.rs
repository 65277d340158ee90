use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::custody::CustodyAccounts;
use crate::deposit::{validate_amount, DepositWorkflow};
use crate::error::MixerError;
use crate::job::ProofSource;
use crate::registry::{canonical_key, ProofRecord, ProofRegistry};
use crate::types::{
    DepositAddressResponse, DepositRequest, DepositResponse, GenerateProofRequest,
    GenerateProofResponse, HealthResponse, RemoveRequest, RemoveResponse, VerifyProofRequest,
    VerifyProofResponse, WithdrawRequest, WithdrawResponse,
};
use crate::verifier::{ContractRef, ProofVerifier};
use crate::withdraw::WithdrawalWorkflow;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub deposits: DepositWorkflow,
    pub withdrawals: WithdrawalWorkflow,
    pub registry: Arc<ProofRegistry>,
    pub verifier: Arc<ProofVerifier>,
    pub proofs: Arc<dyn ProofSource>,
    pub custody: CustodyAccounts,
    pub currency: String,
}

impl AppState {
    pub fn new(
        proofs: Arc<dyn ProofSource>,
        verifier: Arc<ProofVerifier>,
        custody: CustodyAccounts,
        registry: Arc<ProofRegistry>,
        currency: String,
    ) -> Self {
        Self {
            deposits: DepositWorkflow::new(
                proofs.clone(),
                verifier.clone(),
                custody.clone(),
                registry.clone(),
                currency.clone(),
            ),
            withdrawals: WithdrawalWorkflow::new(verifier.clone(), custody.clone(), registry.clone()),
            registry,
            verifier,
            proofs,
            custody,
            currency,
        }
    }
}

/// Unwrap a JSON body, reporting a bad body as a validation error.
fn extract_json<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, MixerError> {
    body.map(|Json(req)| req)
        .map_err(|rejection| MixerError::validation(rejection.body_text()))
}

/// POST /deposit — Generate a proof, verify it, fund the pool and register it.
pub async fn deposit_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<Json<DepositResponse>, MixerError> {
    let req = extract_json(body)?;
    let receipt = state
        .deposits
        .deposit(req.amount, req.currency.as_deref())
        .await?;

    Ok(Json(DepositResponse {
        success: true,
        message: "Deposit registered".to_string(),
        proof_key: receipt.proof_key,
        proof: receipt.proof,
        public_signals: receipt.public_signals,
        deposit_address: receipt.deposit_address,
        amount: receipt.amount,
        currency: receipt.currency,
        transaction_hash: receipt.transaction_hash,
        contract_address: receipt.contract_address,
    }))
}

/// POST /withdraw — Release the funds held for a proof to a new recipient.
pub async fn withdraw_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, MixerError> {
    let req = extract_json(body)?;
    let receipt = state
        .withdrawals
        .withdraw(req.proof_key.as_deref(), req.recipient.as_deref())
        .await?;

    Ok(Json(WithdrawResponse {
        success: true,
        message: "Withdrawal successful".to_string(),
        transaction_hash: receipt.transaction_hash,
    }))
}

/// POST /mixer_generate_proof — Run the proof script and register its output.
///
/// Administrative path: the record is stored without a custody transfer.
pub async fn generate_proof_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateProofRequest>, JsonRejection>,
) -> Result<Json<GenerateProofResponse>, MixerError> {
    let req = extract_json(body)?;
    let (amount, _) = validate_amount(
        req.amount,
        req.currency.as_deref(),
        &state.currency,
        state.custody.kind().decimals(),
    )?;

    let generated = state.proofs.generate().await?;
    let proof_key = canonical_key(&generated.proof);
    state.registry.put(
        &proof_key,
        ProofRecord {
            amount,
            contract_address: generated.contract_address.clone(),
            contract_abi: generated.contract_abi.clone(),
            public_signals: generated.public_signals.clone(),
        },
    );
    tracing::info!("Registered generated proof without transfer: contract={}", generated.contract_address);

    Ok(Json(GenerateProofResponse {
        proof_key,
        proof: generated.proof,
        public_signals: generated.public_signals,
        contract_address: generated.contract_address,
    }))
}

/// POST /mixer_verify_proof — Ask the verifier contract about a proof.
pub async fn verify_proof_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<VerifyProofRequest>, JsonRejection>,
) -> Result<Json<VerifyProofResponse>, MixerError> {
    let req = extract_json(body)?;
    if req.contract_address.trim().is_empty() {
        return Err(MixerError::validation("contract_address is required"));
    }

    let contract = ContractRef {
        address: req.contract_address,
        abi: req.contract_abi,
    };
    let is_valid = state
        .verifier
        .verify(&req.proof, &req.public_signals, &contract)
        .await?;

    Ok(Json(VerifyProofResponse { is_valid }))
}

/// POST /remove_withdrawal_request — Drop a custody record without paying out.
pub async fn remove_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RemoveRequest>, JsonRejection>,
) -> Result<Json<RemoveResponse>, MixerError> {
    let req = extract_json(body)?;
    let proof_key = match req.proof_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => canonical_key(key),
        _ => return Err(MixerError::validation("proof_key is required")),
    };

    // Wait out any withdrawal in flight for this key.
    let _guard = state.registry.lock(&proof_key).await;
    let removed = state.registry.remove(&proof_key).is_some();
    tracing::info!("Removal request processed: removed={}", removed);

    Ok(Json(RemoveResponse {
        success: true,
        removed,
    }))
}

/// GET /get_deposit_address — Address of the pooled custody account.
pub async fn deposit_address_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(DepositAddressResponse {
            deposit_address: state.custody.deposit_address().to_string(),
            backend: state.custody.kind().to_string(),
        }),
    )
}

/// GET /health — Health check endpoint.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            live_records: state.registry.len(),
            backend: state.custody.kind().to_string(),
        }),
    )
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/mixer_generate_proof", post(generate_proof_handler))
        .route("/mixer_verify_proof", post(verify_proof_handler))
        .route("/remove_withdrawal_request", post(remove_handler))
        .route("/get_deposit_address", get(deposit_address_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}
