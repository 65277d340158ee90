use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::types::ErrorResponse;

/// Every failure the mixer can report to a caller.
///
/// Each variant maps to one stable machine-readable kind (see [`MixerError::kind`])
/// and one HTTP status. Text coming from a collaborator (RPC node, script
/// stderr, signer) is kept in a separate diagnostic field so the classified
/// kind never depends on it.
#[derive(Error, Debug)]
pub enum MixerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("proof is already registered: {key}")]
    ProofAlreadyRegistered { key: String },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("proof rejected by verifier contract {contract_address}")]
    ProofRejected { contract_address: String },

    #[error("verification call failed")]
    VerificationCallFailed { diagnostic: String },

    #[error("transfer failed: {reason}")]
    TransferFailed {
        reason: String,
        diagnostic: Option<String>,
    },

    #[error("proof generation script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("proof generation script exited with {status}")]
    ScriptExecution { status: String, stderr: String },

    #[error("proof generation script timed out after {0}s")]
    ScriptTimeout(u64),

    #[error("proof generation output not found: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("proof generation output is malformed: {0}")]
    OutputMalformed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MixerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transfer(reason: impl Into<String>, diagnostic: impl ToString) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
            diagnostic: Some(diagnostic.to_string()),
        }
    }

    /// Stable error kind exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ProofAlreadyRegistered { .. } => "PROOF_ALREADY_REGISTERED",
            Self::MalformedProof(_) => "MALFORMED_PROOF",
            Self::ProofRejected { .. } => "PROOF_REJECTED",
            Self::VerificationCallFailed { .. } => "VERIFICATION_CALL_FAILED",
            Self::TransferFailed { .. } => "TRANSFER_FAILED",
            Self::ScriptNotFound(_) => "SCRIPT_NOT_FOUND",
            Self::ScriptExecution { .. } => "SCRIPT_EXECUTION_ERROR",
            Self::ScriptTimeout(_) => "SCRIPT_TIMEOUT",
            Self::OutputMissing(_) => "OUTPUT_MISSING",
            Self::OutputMalformed(_) => "OUTPUT_MALFORMED",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MalformedProof(_) | Self::ProofRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ProofAlreadyRegistered { .. } => StatusCode::CONFLICT,
            Self::VerificationCallFailed { .. } | Self::TransferFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::ScriptTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ScriptNotFound(_)
            | Self::ScriptExecution { .. }
            | Self::OutputMissing(_)
            | Self::OutputMalformed(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Collaborator text attached to the error, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::VerificationCallFailed { diagnostic } => Some(diagnostic),
            Self::TransferFailed { diagnostic, .. } => diagnostic.as_deref(),
            Self::ScriptExecution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl IntoResponse for MixerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), diagnostic = ?self.diagnostic(), "{}", self);
        } else {
            tracing::warn!(kind = self.kind(), "{}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
            diagnostic: self.diagnostic().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}
