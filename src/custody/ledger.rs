//! Ledger-native custody over the rippled JSON-RPC API.

use std::time::{Duration, Instant};

use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::{LedgerWallet, TransactionResult};
use crate::error::MixerError;

const DROPS_PER_UNIT: i64 = 1_000_000;
const FINALITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Engine results that mean the payment was accepted for inclusion.
const ACCEPTED_ENGINE_RESULTS: &[&str] = &["tesSUCCESS", "terQUEUED"];

/// Convert a mixer-unit amount into an integer drop string.
fn to_drops(amount: Decimal) -> Result<String, String> {
    if amount <= Decimal::ZERO {
        return Err(format!("amount {} is not positive", amount));
    }
    let drops = amount
        .checked_mul(Decimal::from(DROPS_PER_UNIT))
        .ok_or_else(|| format!("amount {} is too large", amount))?;
    if !drops.fract().is_zero() {
        return Err(format!("amount {} is finer than one drop", amount));
    }
    Ok(drops.trunc().normalize().to_string())
}

/// Outcome of a single `tx` lookup.
#[derive(Debug, PartialEq, Eq)]
enum LedgerStatus {
    NotFound,
    Pending,
    Validated { result: String },
}

pub struct LedgerAccount {
    client: Client,
    rpc_url: String,
    wallet: LedgerWallet,
    finality_timeout: Duration,
}

impl LedgerAccount {
    pub fn new(
        rpc_url: &str,
        wallet: LedgerWallet,
        rpc_timeout: Duration,
        finality_timeout: Duration,
    ) -> Result<Self, MixerError> {
        let client = Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| MixerError::Config(format!("Failed to create ledger client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            wallet,
            finality_timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.wallet.address
    }

    /// rippled JSON-RPC call. Returns the `result` object on success.
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, String> {
        let request = json!({
            "method": method,
            "params": [params]
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Failed to send {} request: {}", method, e))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse {} response: {}", method, e))?;

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| format!("{} response has no result", method))?;

        if result["status"] == "error" {
            return Err(format!(
                "{}: {}",
                result["error"].as_str().unwrap_or("unknown error"),
                result["error_message"].as_str().unwrap_or("")
            ));
        }

        Ok(result)
    }

    async fn lookup(&self, hash: &str) -> Result<LedgerStatus, String> {
        let result = match self
            .rpc_call("tx", json!({ "transaction": hash, "binary": false }))
            .await
        {
            Ok(result) => result,
            Err(e) if e.starts_with("txnNotFound") => return Ok(LedgerStatus::NotFound),
            Err(e) => return Err(e),
        };
        Ok(parse_tx_status(&result))
    }

    pub async fn send_funds(
        &self,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransactionResult, MixerError> {
        let drops =
            to_drops(amount).map_err(|e| MixerError::transfer("invalid ledger amount", e))?;

        tracing::info!(
            "Submitting ledger payment: from={} to={} drops={}",
            self.wallet.address,
            destination,
            drops
        );

        let submit = self
            .rpc_call(
                "submit",
                json!({
                    "secret": self.wallet.seed,
                    "tx_json": {
                        "TransactionType": "Payment",
                        "Account": self.wallet.address,
                        "Destination": destination,
                        "Amount": drops,
                    }
                }),
            )
            .await
            .map_err(|e| MixerError::transfer("ledger payment submission failed", e))?;

        let engine_result = submit["engine_result"].as_str().unwrap_or_default();
        if !ACCEPTED_ENGINE_RESULTS.contains(&engine_result) {
            return Err(MixerError::transfer(
                "ledger rejected the payment",
                format!(
                    "{}: {}",
                    engine_result,
                    submit["engine_result_message"].as_str().unwrap_or_default()
                ),
            ));
        }

        let hash = submit["tx_json"]["hash"]
            .as_str()
            .ok_or_else(|| MixerError::transfer("ledger payment has no hash", submit.to_string()))?
            .to_string();

        tracing::info!("Ledger payment submitted: hash={} engine_result={}", hash, engine_result);

        self.await_validation(&hash).await?;
        Ok(TransactionResult::new(hash))
    }

    async fn await_validation(&self, hash: &str) -> Result<(), MixerError> {
        let start = Instant::now();

        loop {
            match self.lookup(hash).await {
                Ok(LedgerStatus::Validated { result }) if result == "tesSUCCESS" => {
                    tracing::info!("Ledger payment validated: hash={}", hash);
                    return Ok(());
                }
                Ok(LedgerStatus::Validated { result }) => {
                    return Err(MixerError::transfer(
                        "ledger payment validated with a failure result",
                        result,
                    ));
                }
                Ok(LedgerStatus::Pending) | Ok(LedgerStatus::NotFound) => {}
                Err(e) => return Err(MixerError::transfer("ledger lookup failed", e)),
            }

            if start.elapsed() > self.finality_timeout {
                return Err(MixerError::transfer(
                    "ledger payment was not validated in time",
                    format!("hash {} pending after {}s", hash, self.finality_timeout.as_secs()),
                ));
            }
            tokio::time::sleep(FINALITY_POLL_INTERVAL).await;
        }
    }

    pub async fn confirm(&self, tx: &TransactionResult) -> Result<bool, MixerError> {
        let status = self
            .lookup(tx.hash())
            .await
            .map_err(|e| MixerError::transfer("ledger lookup failed", e))?;
        Ok(matches!(status, LedgerStatus::Validated { ref result } if result == "tesSUCCESS"))
    }
}

fn parse_tx_status(result: &Value) -> LedgerStatus {
    if result["validated"].as_bool().unwrap_or(false) {
        LedgerStatus::Validated {
            result: result["meta"]["TransactionResult"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        }
    } else {
        LedgerStatus::Pending
    }
}
