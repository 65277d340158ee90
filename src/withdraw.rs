use std::sync::Arc;

use crate::custody::CustodyAccounts;
use crate::error::MixerError;
use crate::registry::{canonical_key, ProofRegistry};
use crate::verifier::ProofVerifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub proof_key: String,
    pub recipient: String,
    pub transaction_hash: String,
}

fn required(value: Option<&str>, name: &str) -> Result<String, MixerError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(MixerError::validation(format!("{} is required", name))),
    }
}

pub struct WithdrawalWorkflow {
    verifier: Arc<ProofVerifier>,
    custody: CustodyAccounts,
    registry: Arc<ProofRegistry>,
}

impl WithdrawalWorkflow {
    pub fn new(
        verifier: Arc<ProofVerifier>,
        custody: CustodyAccounts,
        registry: Arc<ProofRegistry>,
    ) -> Self {
        Self {
            verifier,
            custody,
            registry,
        }
    }

    /// Pay out the amount held for `proof_key` to `recipient`.
    ///
    /// The key's lock is held from lookup to removal, so a second withdrawal
    /// of the same proof waits and then finds no record. The record is only
    /// removed after a confirmed transfer; any earlier failure leaves it in
    /// place for a retry.
    pub async fn withdraw(
        &self,
        proof_key: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<WithdrawalReceipt, MixerError> {
        let proof_key = canonical_key(&required(proof_key, "proof_key")?);
        let recipient = required(recipient, "recipient")?;

        let _guard = self.registry.lock(&proof_key).await;

        let record = self.registry.get(&proof_key)?;
        tracing::info!(
            "Withdrawal of {} to {} (contract={})",
            record.amount,
            recipient,
            record.contract_address
        );

        self.verifier
            .require_valid(&proof_key, &record.public_signals, &record.contract())
            .await?;

        let tx = self
            .custody
            .pool
            .send_funds(&recipient, record.amount)
            .await?;
        if !self.custody.pool.confirm(&tx).await? {
            tracing::error!("Withdrawal transfer {} not confirmed; record kept", tx.hash());
            return Err(MixerError::TransferFailed {
                reason: "withdrawal transfer was not confirmed".to_string(),
                diagnostic: Some(tx.hash().to_string()),
            });
        }

        self.registry.remove(&proof_key);
        tracing::info!("Withdrawal complete: tx={}", tx.hash());

        Ok(WithdrawalReceipt {
            proof_key,
            recipient,
            transaction_hash: tx.hash().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use crate::registry::ProofRecord;
    use crate::testing::{verifier, FakeAccounts, FakeContract, FakeCustody};

    const KEY: &str = "0x01,0x02,0x03";

    fn record() -> ProofRecord {
        ProofRecord {
            amount: Decimal::from(10),
            contract_address: "0xABC123".to_string(),
            contract_abi: "[]".to_string(),
            public_signals: "0x04".to_string(),
        }
    }

    fn setup(valid: bool) -> (WithdrawalWorkflow, Arc<FakeContract>, FakeAccounts, Arc<ProofRegistry>) {
        let contract = FakeContract::answering(valid);
        let accounts = FakeAccounts::new();
        let registry = ProofRegistry::new();
        registry.insert(KEY, record()).unwrap();
        let workflow =
            WithdrawalWorkflow::new(verifier(contract.clone()), accounts.accounts(), registry.clone());
        (workflow, contract, accounts, registry)
    }

    #[tokio::test]
    async fn test_withdraw_pays_and_removes() {
        let (workflow, _, accounts, registry) = setup(true);
        let receipt = workflow.withdraw(Some(KEY), Some("rRecipient")).await.unwrap();

        assert_eq!(receipt.transaction_hash, "T2");
        assert_eq!(
            accounts.pool.sends(),
            vec![("rRecipient".to_string(), Decimal::from(10))]
        );
        assert!(accounts.depositor.sends().is_empty());
        assert!(!registry.contains(KEY));
    }

    #[tokio::test]
    async fn test_key_is_canonicalized() {
        let (workflow, _, _, registry) = setup(true);
        workflow
            .withdraw(Some(" 0x01, 0x02,\n0x03 "), Some("rRecipient"))
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_validation_errors() {
        let (workflow, contract, _, _) = setup(true);
        for (key, recipient) in [(None, Some("r")), (Some(KEY), None), (Some("  "), Some("r"))] {
            let err = workflow.withdraw(key, recipient).await.unwrap_err();
            assert!(matches!(err, MixerError::Validation(_)));
        }
        assert_eq!(contract.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_key_never_transfers() {
        let (workflow, contract, accounts, _) = setup(true);
        let err = workflow
            .withdraw(Some("0xdead"), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::NotFound(_)));
        assert!(accounts.pool.sends().is_empty());
        assert_eq!(contract.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_keys_leave_no_lock_entries() {
        let (workflow, _, _, registry) = setup(true);
        for i in 0..1000 {
            let key = format!("0x{:x}", i);
            let err = workflow
                .withdraw(Some(&key), Some("rRecipient"))
                .await
                .unwrap_err();
            assert!(matches!(err, MixerError::NotFound(_)));
        }
        assert_eq!(registry.lock_entries(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_second_withdrawal_is_not_found() {
        let (workflow, _, accounts, _) = setup(true);
        workflow.withdraw(Some(KEY), Some("rRecipient")).await.unwrap();
        let err = workflow
            .withdraw(Some(KEY), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::NotFound(_)));
        assert_eq!(accounts.pool.sends().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_proof_keeps_record() {
        let (workflow, _, accounts, registry) = setup(false);
        let err = workflow
            .withdraw(Some(KEY), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::ProofRejected { .. }));
        assert!(accounts.pool.sends().is_empty());
        assert_eq!(registry.get(KEY).unwrap(), record());
    }

    #[tokio::test]
    async fn test_verifier_outage_keeps_record() {
        let (workflow, contract, _, registry) = setup(true);
        contract.set_answer(Err("connection reset".to_string()));
        let err = workflow
            .withdraw(Some(KEY), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::VerificationCallFailed { .. }));
        assert_eq!(registry.get(KEY).unwrap(), record());
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_keeps_record_for_retry() {
        let (workflow, _, accounts, registry) = setup(true);
        accounts.pool.set_confirms(false);
        let err = workflow
            .withdraw(Some(KEY), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::TransferFailed { .. }));
        assert_eq!(registry.get(KEY).unwrap(), record());

        accounts.pool.set_confirms(true);
        workflow.withdraw(Some(KEY), Some("rRecipient")).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_keeps_record() {
        let (workflow, _, accounts, registry) = setup(true);
        accounts.pool.set_fails(true);
        let err = workflow
            .withdraw(Some(KEY), Some("rRecipient"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::TransferFailed { .. }));
        assert!(registry.contains(KEY));
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_pay_once() {
        let contract = FakeContract::answering(true);
        let pool = FakeCustody::with_delay("rPool", "T2", Duration::from_millis(50));
        let depositor = FakeCustody::new("rDepositor", "T1");
        let registry = ProofRegistry::new();
        registry.insert(KEY, record()).unwrap();
        let workflow = Arc::new(WithdrawalWorkflow::new(
            verifier(contract),
            CustodyAccounts::new(depositor, pool.clone()),
            registry.clone(),
        ));

        let attempts: Vec<_> = (0..4)
            .map(|i| {
                let workflow = workflow.clone();
                tokio::spawn(async move {
                    workflow
                        .withdraw(Some(KEY), Some(&format!("rRecipient{}", i)))
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, MixerError::NotFound(_))),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(pool.sends().len(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.lock_entries(), 0);
    }
}
