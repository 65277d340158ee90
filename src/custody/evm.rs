//! EVM-style custody: locally signed value transfers through ethers.

use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, H256, U64};
use ethers::utils::{parse_ether, to_checksum};
use rust_decimal::Decimal;

use super::TransactionResult;
use crate::error::MixerError;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EvmAccount {
    client: SignerClient,
    address: Address,
    display_address: String,
    rpc_timeout: Duration,
    transfer_timeout: Duration,
}

impl EvmAccount {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        rpc_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Result<Self, MixerError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| MixerError::Config(format!("invalid EVM RPC URL {}: {}", rpc_url, e)))?;

        let wallet = private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| MixerError::Config(format!("invalid EVM private key: {}", e)))?
            .with_chain_id(chain_id);

        let address = wallet.address();
        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            address,
            display_address: to_checksum(&address, None),
            rpc_timeout,
            transfer_timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.display_address
    }

    pub async fn send_funds(
        &self,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransactionResult, MixerError> {
        let to: Address = destination
            .parse()
            .map_err(|e| MixerError::transfer(format!("invalid destination {}", destination), e))?;
        let value = parse_ether(amount.to_string())
            .map_err(|e| MixerError::transfer(format!("invalid amount {}", amount), e))?;

        // Nonce and gas price are read once; a stale value fails the send.
        let nonce = tokio::time::timeout(
            self.rpc_timeout,
            self.client.get_transaction_count(self.address, None),
        )
        .await
        .map_err(|_| MixerError::transfer("nonce lookup timed out", "eth_getTransactionCount"))?
        .map_err(|e| MixerError::transfer("nonce lookup failed", e))?;

        let gas_price = tokio::time::timeout(self.rpc_timeout, self.client.get_gas_price())
            .await
            .map_err(|_| MixerError::transfer("gas price lookup timed out", "eth_gasPrice"))?
            .map_err(|e| MixerError::transfer("gas price lookup failed", e))?;

        let tx = TransactionRequest::new()
            .from(self.address)
            .to(to)
            .value(value)
            .nonce(nonce)
            .gas_price(gas_price);

        tracing::info!(
            "Sending EVM transfer: from={} to={:?} wei={} nonce={}",
            self.display_address,
            to,
            value,
            nonce
        );

        let send = async {
            let pending = self
                .client
                .send_transaction(tx, None)
                .await
                .map_err(|e| MixerError::transfer("EVM transaction broadcast failed", e))?;
            let hash = pending.tx_hash();
            tracing::info!("EVM transaction broadcast: hash={:?}", hash);

            let receipt = pending
                .await
                .map_err(|e| MixerError::transfer("EVM receipt polling failed", e))?
                .ok_or_else(|| {
                    MixerError::transfer("EVM transaction was dropped", format!("{:?}", hash))
                })?;
            Ok::<_, MixerError>(receipt.transaction_hash)
        };

        let hash = tokio::time::timeout(self.transfer_timeout, send)
            .await
            .map_err(|_| {
                MixerError::transfer(
                    "EVM transaction was not mined in time",
                    format!("no receipt after {}s", self.transfer_timeout.as_secs()),
                )
            })??;

        Ok(TransactionResult::new(format!("0x{}", hex::encode(hash.as_bytes()))))
    }

    pub async fn confirm(&self, tx: &TransactionResult) -> Result<bool, MixerError> {
        let hash: H256 = tx
            .hash()
            .parse()
            .map_err(|e| MixerError::transfer(format!("invalid transaction hash {}", tx.hash()), e))?;

        let receipt = tokio::time::timeout(
            self.rpc_timeout,
            self.client.get_transaction_receipt(hash),
        )
        .await
        .map_err(|_| MixerError::transfer("receipt lookup timed out", tx.hash()))?
        .map_err(|e| MixerError::transfer("receipt lookup failed", e))?;

        Ok(receipt
            .and_then(|r| r.status)
            .map(|status| status == U64::from(1))
            .unwrap_or(false))
    }
}
