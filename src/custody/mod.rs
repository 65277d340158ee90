//! Custody backends: moving funds in and out of the pooled account.
//!
//! A deployment runs against exactly one account model. The model is picked
//! once from [`CustodyConfig`]; after that every call dispatches through the
//! [`Custody`] trait and nothing re-inspects which wallet is present.

mod evm;
mod ledger;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::MixerError;

pub use evm::EvmAccount;
pub use ledger::LedgerAccount;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Ledger,
    Evm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ledger => "ledger",
            BackendKind::Evm => "evm",
        }
    }

    /// Decimal places of one mixer unit the chain can represent: drops on
    /// the ledger, wei on EVM.
    pub fn decimals(&self) -> u32 {
        match self {
            BackendKind::Ledger => 6,
            BackendKind::Evm => 18,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a submitted transfer. Only the backend that produced it
/// knows how to check it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionResult {
    hash: String,
}

impl TransactionResult {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Capability set shared by both account models.
///
/// Neither method retries: a failed or timed-out submission is reported once
/// and resubmitting is up to the caller.
#[async_trait]
pub trait Custody: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn address(&self) -> &str;

    /// Submit a transfer of `amount` mixer units to `destination` and block
    /// until the chain reports it final.
    async fn send_funds(
        &self,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransactionResult, MixerError>;

    /// Look the transaction up once and report whether it succeeded.
    async fn confirm(&self, tx: &TransactionResult) -> Result<bool, MixerError>;
}

pub enum CustodyBackend {
    Ledger(LedgerAccount),
    Evm(EvmAccount),
}

#[async_trait]
impl Custody for CustodyBackend {
    fn kind(&self) -> BackendKind {
        match self {
            CustodyBackend::Ledger(_) => BackendKind::Ledger,
            CustodyBackend::Evm(_) => BackendKind::Evm,
        }
    }

    fn address(&self) -> &str {
        match self {
            CustodyBackend::Ledger(account) => account.address(),
            CustodyBackend::Evm(account) => account.address(),
        }
    }

    async fn send_funds(
        &self,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransactionResult, MixerError> {
        match self {
            CustodyBackend::Ledger(account) => account.send_funds(destination, amount).await,
            CustodyBackend::Evm(account) => account.send_funds(destination, amount).await,
        }
    }

    async fn confirm(&self, tx: &TransactionResult) -> Result<bool, MixerError> {
        match self {
            CustodyBackend::Ledger(account) => account.confirm(tx).await,
            CustodyBackend::Evm(account) => account.confirm(tx).await,
        }
    }
}

/// Credentials for one ledger-native account.
#[derive(Clone, Debug)]
pub struct LedgerWallet {
    pub address: String,
    pub seed: String,
}

/// Deployment-wide custody settings. Both accounts always share one model.
#[derive(Clone, Debug)]
pub enum CustodyConfig {
    Ledger {
        rpc_url: String,
        source: LedgerWallet,
        pool: LedgerWallet,
    },
    Evm {
        rpc_url: String,
        chain_id: u64,
        source_private_key: String,
        pool_private_key: String,
    },
}

impl CustodyConfig {
    #[cfg(test)]
    pub fn kind(&self) -> BackendKind {
        match self {
            CustodyConfig::Ledger { .. } => BackendKind::Ledger,
            CustodyConfig::Evm { .. } => BackendKind::Evm,
        }
    }
}

/// The two accounts a deployment moves funds between: deposits flow from
/// `depositor` into `pool`, withdrawals flow out of `pool`.
#[derive(Clone)]
pub struct CustodyAccounts {
    pub depositor: Arc<dyn Custody>,
    pub pool: Arc<dyn Custody>,
}

impl CustodyAccounts {
    pub fn new(depositor: Arc<dyn Custody>, pool: Arc<dyn Custody>) -> Self {
        Self { depositor, pool }
    }

    pub fn from_config(
        config: &CustodyConfig,
        rpc_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Result<Self, MixerError> {
        let (depositor, pool) = match config {
            CustodyConfig::Ledger {
                rpc_url,
                source,
                pool,
            } => (
                CustodyBackend::Ledger(LedgerAccount::new(
                    rpc_url,
                    source.clone(),
                    rpc_timeout,
                    transfer_timeout,
                )?),
                CustodyBackend::Ledger(LedgerAccount::new(
                    rpc_url,
                    pool.clone(),
                    rpc_timeout,
                    transfer_timeout,
                )?),
            ),
            CustodyConfig::Evm {
                rpc_url,
                chain_id,
                source_private_key,
                pool_private_key,
            } => (
                CustodyBackend::Evm(EvmAccount::new(
                    rpc_url,
                    source_private_key,
                    *chain_id,
                    rpc_timeout,
                    transfer_timeout,
                )?),
                CustodyBackend::Evm(EvmAccount::new(
                    rpc_url,
                    pool_private_key,
                    *chain_id,
                    rpc_timeout,
                    transfer_timeout,
                )?),
            ),
        };

        tracing::info!(
            "Custody backend={} depositor={} pool={}",
            depositor.kind(),
            depositor.address(),
            pool.address()
        );

        Ok(Self::new(Arc::new(depositor), Arc::new(pool)))
    }

    pub fn kind(&self) -> BackendKind {
        self.pool.kind()
    }

    /// Address that deposits are paid into.
    pub fn deposit_address(&self) -> &str {
        self.pool.address()
    }
}
