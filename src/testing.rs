//! Test doubles for the chain and script collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::Decimal;

use crate::custody::{BackendKind, Custody, CustodyAccounts, TransactionResult};
use crate::error::MixerError;
use crate::job::{GeneratedProof, ProofSource};
use crate::verifier::{ContractRef, ProofVerifier, VerifierContract};

pub const CALLER: &str = "0x0000000000000000000000000000000000000000";

pub fn generated_proof() -> GeneratedProof {
    GeneratedProof {
        contract_address: "0xABC123".to_string(),
        contract_abi: r#"[{"name":"verifyProof"}]"#.to_string(),
        proof: "0x01, 0x02,0x03".to_string(),
        public_signals: "0x04".to_string(),
    }
}

pub struct FakeProofSource {
    proof: Option<GeneratedProof>,
    calls: AtomicUsize,
}

impl FakeProofSource {
    pub fn returning(proof: GeneratedProof) -> Arc<Self> {
        Arc::new(Self {
            proof: Some(proof),
            calls: AtomicUsize::new(0),
        })
    }

    /// A source whose script is missing.
    pub fn missing_script() -> Arc<Self> {
        Arc::new(Self {
            proof: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofSource for FakeProofSource {
    async fn generate(&self) -> Result<GeneratedProof, MixerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.proof
            .clone()
            .ok_or_else(|| MixerError::ScriptNotFound("make_plonk_contract.sh".into()))
    }
}

pub struct FakeContract {
    answer: Mutex<Result<bool, String>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ContractRef>>,
}

impl FakeContract {
    pub fn answering(valid: bool) -> Arc<Self> {
        Self::with(Ok(valid))
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Self::with(Err(error.to_string()))
    }

    fn with(answer: Result<bool, String>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn set_answer(&self, answer: Result<bool, String>) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ContractRef> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerifierContract for FakeContract {
    async fn verify_proof(
        &self,
        contract: &ContractRef,
        _caller: &str,
        _proof: Vec<U256>,
        _public_signals: Vec<U256>,
    ) -> Result<bool, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(contract.clone());
        self.answer.lock().unwrap().clone()
    }
}

pub fn verifier(contract: Arc<FakeContract>) -> Arc<ProofVerifier> {
    Arc::new(ProofVerifier::new(
        contract,
        CALLER.to_string(),
        Duration::from_secs(5),
    ))
}

/// In-memory custody account recording every transfer it is asked to make.
pub struct FakeCustody {
    address: String,
    tx_hash: String,
    confirms: Mutex<bool>,
    fails: Mutex<bool>,
    delay: Duration,
    sends: Mutex<Vec<(String, Decimal)>>,
}

impl FakeCustody {
    pub fn new(address: &str, tx_hash: &str) -> Arc<Self> {
        Self::with_delay(address, tx_hash, Duration::ZERO)
    }

    pub fn with_delay(address: &str, tx_hash: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            tx_hash: tx_hash.to_string(),
            confirms: Mutex::new(true),
            fails: Mutex::new(false),
            delay,
            sends: Mutex::new(Vec::new()),
        })
    }

    pub fn set_confirms(&self, confirms: bool) {
        *self.confirms.lock().unwrap() = confirms;
    }

    pub fn set_fails(&self, fails: bool) {
        *self.fails.lock().unwrap() = fails;
    }

    pub fn sends(&self) -> Vec<(String, Decimal)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl Custody for FakeCustody {
    fn kind(&self) -> BackendKind {
        BackendKind::Ledger
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn send_funds(
        &self,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransactionResult, MixerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.fails.lock().unwrap() {
            return Err(MixerError::transfer("payment submission failed", "tefPAST_SEQ"));
        }
        self.sends
            .lock()
            .unwrap()
            .push((destination.to_string(), amount));
        Ok(TransactionResult::new(self.tx_hash.clone()))
    }

    async fn confirm(&self, _tx: &TransactionResult) -> Result<bool, MixerError> {
        Ok(*self.confirms.lock().unwrap())
    }
}

pub struct FakeAccounts {
    pub depositor: Arc<FakeCustody>,
    pub pool: Arc<FakeCustody>,
}

impl FakeAccounts {
    pub fn new() -> Self {
        Self {
            depositor: FakeCustody::new("rDepositor", "T1"),
            pool: FakeCustody::new("rPool", "T2"),
        }
    }

    pub fn accounts(&self) -> CustodyAccounts {
        CustodyAccounts::new(self.depositor.clone(), self.pool.clone())
    }
}
