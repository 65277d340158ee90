mod config;
mod custody;
mod deposit;
mod error;
mod job;
mod registry;
mod routes;
#[cfg(test)]
mod testing;
mod types;
mod verifier;
mod withdraw;

use std::sync::Arc;

use crate::config::MixerConfig;
use crate::custody::CustodyAccounts;
use crate::job::ProofGenerationJob;
use crate::registry::ProofRegistry;
use crate::routes::{build_router, AppState};
use crate::verifier::{EthersVerifier, ProofVerifier};

#[tokio::main]
async fn main() {
    // Pick up a local .env before anything reads the environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proofport_mixer=info".into()),
        )
        .init();

    let config = MixerConfig::from_env().unwrap_or_else(|e| {
        panic!("Invalid configuration: {}", e);
    });

    tracing::info!(
        "Proof script: {} (timeout {}s)",
        config.job.script_path.display(),
        config.job.timeout.as_secs()
    );

    let custody = CustodyAccounts::from_config(
        &config.custody,
        config.rpc_timeout,
        config.transfer_timeout,
    )
    .unwrap_or_else(|e| {
        panic!("Failed to initialize custody backend: {}", e);
    });

    let contract = EthersVerifier::new(&config.verifier_rpc_url).unwrap_or_else(|e| {
        panic!("Failed to initialize verifier: {}", e);
    });
    let verifier = Arc::new(ProofVerifier::new(
        Arc::new(contract),
        config.verifier_caller.clone(),
        config.rpc_timeout,
    ));

    // Custody records are in-memory only and do not survive a restart
    let registry = ProofRegistry::new();
    let proofs = Arc::new(ProofGenerationJob::new(config.job.clone()));

    let state = Arc::new(AppState::new(
        proofs,
        verifier,
        custody,
        registry,
        config.currency.clone(),
    ));

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);

    tracing::info!("Mixer service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            panic!("Failed to bind to {}: {}", addr, e);
        });

    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| {
            panic!("Server error: {}", e);
        });
}
