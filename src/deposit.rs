use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::custody::CustodyAccounts;
use crate::error::MixerError;
use crate::job::ProofSource;
use crate::registry::{canonical_key, ProofRecord, ProofRegistry};
use crate::verifier::ProofVerifier;

/// Progress of a single deposit. A failure stops at the stage reached;
/// earlier stages are not rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepositStage {
    Validated,
    ProofGenerated,
    Verified,
    Transferred,
    Registered,
}

impl fmt::Display for DepositStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DepositStage::Validated => "validated",
            DepositStage::ProofGenerated => "proof_generated",
            DepositStage::Verified => "verified",
            DepositStage::Transferred => "transferred",
            DepositStage::Registered => "registered",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositReceipt {
    pub proof_key: String,
    pub proof: String,
    pub public_signals: String,
    pub deposit_address: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_hash: String,
    pub contract_address: String,
}

/// Check that an amount is present, positive and representable in `decimals`
/// places, and that the currency is the one unit this deployment mixes. A
/// missing currency means that unit.
pub fn validate_amount(
    amount: Option<Decimal>,
    currency: Option<&str>,
    supported: &str,
    decimals: u32,
) -> Result<(Decimal, String), MixerError> {
    let amount = amount.ok_or_else(|| MixerError::validation("amount is required"))?;
    if amount <= Decimal::ZERO {
        return Err(MixerError::validation("amount must be positive"));
    }
    if amount.normalize().scale() > decimals {
        return Err(MixerError::validation(format!(
            "amount {} has more than {} decimal places",
            amount, decimals
        )));
    }

    let currency = currency.unwrap_or(supported);
    if currency != supported {
        return Err(MixerError::validation(format!(
            "Unsupported currency {}. Only {} is allowed.",
            currency, supported
        )));
    }

    Ok((amount, currency.to_string()))
}

pub struct DepositWorkflow {
    proofs: Arc<dyn ProofSource>,
    verifier: Arc<ProofVerifier>,
    custody: CustodyAccounts,
    registry: Arc<ProofRegistry>,
    currency: String,
}

impl DepositWorkflow {
    pub fn new(
        proofs: Arc<dyn ProofSource>,
        verifier: Arc<ProofVerifier>,
        custody: CustodyAccounts,
        registry: Arc<ProofRegistry>,
        currency: String,
    ) -> Self {
        Self {
            proofs,
            verifier,
            custody,
            registry,
            currency,
        }
    }

    pub async fn deposit(
        &self,
        amount: Option<Decimal>,
        currency: Option<&str>,
    ) -> Result<DepositReceipt, MixerError> {
        let (amount, currency) = validate_amount(
            amount,
            currency,
            &self.currency,
            self.custody.kind().decimals(),
        )?;
        let deposit_address = self.custody.deposit_address().to_string();
        tracing::info!(stage = %DepositStage::Validated, "Deposit of {} {} into {}", amount, currency, deposit_address);

        let generated = self
            .proofs
            .generate()
            .await
            .inspect_err(|e| tracing::error!(stage = %DepositStage::Validated, "Proof generation failed: {}", e))?;
        tracing::info!(stage = %DepositStage::ProofGenerated, "Proof generated against contract {}", generated.contract_address);

        let contract = generated.contract();
        self.verifier
            .require_valid(&generated.proof, &generated.public_signals, &contract)
            .await
            .inspect_err(|e| tracing::error!(stage = %DepositStage::ProofGenerated, "Verification failed: {}", e))?;
        tracing::info!(stage = %DepositStage::Verified, "Proof verified");

        let proof_key = canonical_key(&generated.proof);
        self.registry.ensure_vacant(&proof_key)?;

        let tx = self
            .custody
            .depositor
            .send_funds(&deposit_address, amount)
            .await
            .inspect_err(|e| tracing::error!(stage = %DepositStage::Verified, "Transfer failed: {}", e))?;
        if !self.custody.depositor.confirm(&tx).await? {
            tracing::error!(stage = %DepositStage::Verified, "Transfer {} not confirmed", tx.hash());
            return Err(MixerError::TransferFailed {
                reason: "deposit transfer was not confirmed".to_string(),
                diagnostic: Some(tx.hash().to_string()),
            });
        }
        tracing::info!(stage = %DepositStage::Transferred, "Deposit transfer confirmed: {}", tx.hash());

        // Funds have moved; a failure below leaves them in the pool unregistered.
        self.registry.insert(
            &proof_key,
            ProofRecord {
                amount,
                contract_address: generated.contract_address.clone(),
                contract_abi: generated.contract_abi.clone(),
                public_signals: generated.public_signals.clone(),
            },
        )?;
        tracing::info!(stage = %DepositStage::Registered, "Custody record registered");

        Ok(DepositReceipt {
            proof_key,
            proof: generated.proof,
            public_signals: generated.public_signals,
            deposit_address,
            amount,
            currency,
            transaction_hash: tx.hash().to_string(),
            contract_address: generated.contract_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{generated_proof, verifier, FakeAccounts, FakeContract, FakeProofSource};

    struct Harness {
        workflow: DepositWorkflow,
        proofs: Arc<FakeProofSource>,
        contract: Arc<FakeContract>,
        accounts: FakeAccounts,
        registry: Arc<ProofRegistry>,
    }

    fn harness(valid: bool) -> Harness {
        let proofs = FakeProofSource::returning(generated_proof());
        let contract = FakeContract::answering(valid);
        let accounts = FakeAccounts::new();
        let registry = ProofRegistry::new();
        let workflow = DepositWorkflow::new(
            proofs.clone(),
            verifier(contract.clone()),
            accounts.accounts(),
            registry.clone(),
            "XRP".to_string(),
        );
        Harness {
            workflow,
            proofs,
            contract,
            accounts,
            registry,
        }
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Some(Decimal::from(10)), Some("XRP"), "XRP", 6).is_ok());
        let (_, currency) = validate_amount(Some(Decimal::from(1)), None, "XRP", 6).unwrap();
        assert_eq!(currency, "XRP");

        for (amount, currency) in [
            (None, Some("XRP")),
            (Some(Decimal::ZERO), Some("XRP")),
            (Some(Decimal::from(-5)), Some("XRP")),
            (Some(Decimal::from(10)), Some("ETH")),
        ] {
            assert!(matches!(
                validate_amount(amount, currency, "XRP", 6).unwrap_err(),
                MixerError::Validation(_)
            ));
        }
    }

    #[test]
    fn test_validate_amount_precision() {
        let one_drop = Decimal::new(1, 6);
        let sub_drop = Decimal::new(1, 7);
        assert!(validate_amount(Some(one_drop), Some("XRP"), "XRP", 6).is_ok());
        assert!(matches!(
            validate_amount(Some(sub_drop), Some("XRP"), "XRP", 6).unwrap_err(),
            MixerError::Validation(_)
        ));
        assert!(validate_amount(Some(sub_drop), Some("XRP"), "XRP", 18).is_ok());

        // Trailing zeros do not count as precision.
        let padded = Decimal::new(1_500_000_000, 9);
        assert!(validate_amount(Some(padded), Some("XRP"), "XRP", 6).is_ok());
    }

    #[tokio::test]
    async fn test_sub_unit_amount_stops_before_proof_generation() {
        let h = harness(true);
        let err = h
            .workflow
            .deposit(Some(Decimal::new(1, 7)), Some("XRP"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::Validation(_)));
        assert_eq!(h.proofs.calls(), 0);
        assert!(h.accounts.depositor.sends().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_registers_record() {
        let h = harness(true);
        let receipt = h
            .workflow
            .deposit(Some(Decimal::from(10)), Some("XRP"))
            .await
            .unwrap();

        assert_eq!(receipt.proof_key, "0x01,0x02,0x03");
        assert_eq!(receipt.transaction_hash, "T1");
        assert_eq!(receipt.deposit_address, "rPool");
        assert_eq!(h.registry.len(), 1);

        let record = h.registry.get(&receipt.proof_key).unwrap();
        assert_eq!(record.amount, Decimal::from(10));
        assert_eq!(record.public_signals, "0x04");

        // The stored metadata is exactly what was verified.
        let verified = h.contract.seen();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0], record.contract());

        assert_eq!(
            h.accounts.depositor.sends(),
            vec![("rPool".to_string(), Decimal::from(10))]
        );
        assert!(h.accounts.pool.sends().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_stops_before_proof_generation() {
        let h = harness(true);
        let err = h
            .workflow
            .deposit(Some(Decimal::from(10)), Some("BTC"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::Validation(_)));
        assert_eq!(h.proofs.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_proof_moves_no_funds() {
        let h = harness(false);
        let err = h
            .workflow
            .deposit(Some(Decimal::from(10)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::ProofRejected { .. }));
        assert!(h.accounts.depositor.sends().is_empty());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_script_failure_propagates() {
        let accounts = FakeAccounts::new();
        let contract = FakeContract::answering(true);
        let workflow = DepositWorkflow::new(
            FakeProofSource::missing_script(),
            verifier(contract.clone()),
            accounts.accounts(),
            ProofRegistry::new(),
            "XRP".to_string(),
        );
        let err = workflow.deposit(Some(Decimal::from(10)), None).await.unwrap_err();
        assert!(matches!(err, MixerError::ScriptNotFound(_)));
        assert_eq!(contract.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_registers_nothing() {
        let h = harness(true);
        h.accounts.depositor.set_confirms(false);
        let err = h
            .workflow
            .deposit(Some(Decimal::from(10)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::TransferFailed { .. }));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_registers_nothing() {
        let h = harness(true);
        h.accounts.depositor.set_fails(true);
        let err = h
            .workflow
            .deposit(Some(Decimal::from(10)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::TransferFailed { .. }));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_colliding_proof_is_refused_before_transfer() {
        let h = harness(true);
        h.workflow.deposit(Some(Decimal::from(10)), None).await.unwrap();

        let err = h
            .workflow
            .deposit(Some(Decimal::from(20)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::ProofAlreadyRegistered { .. }));
        assert_eq!(h.accounts.depositor.sends().len(), 1);
        assert_eq!(
            h.registry.get("0x01,0x02,0x03").unwrap().amount,
            Decimal::from(10)
        );
    }
}
