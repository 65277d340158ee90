use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::custody::{CustodyConfig, LedgerWallet};
use crate::error::MixerError;
use crate::job::JobSettings;

const DEFAULT_EVM_RPC_URL: &str = "https://rpc-evm-sidechain.xrpl.org/";
const DEFAULT_LEDGER_RPC_URL: &str = "https://s.altnet.rippletest.net:51234";
const DEFAULT_EVM_CHAIN_ID: u64 = 1440002;

/// Service configuration, read from the process environment.
#[derive(Clone, Debug)]
pub struct MixerConfig {
    pub port: u16,
    pub currency: String,
    pub job: JobSettings,
    pub rpc_timeout: Duration,
    pub transfer_timeout: Duration,
    pub verifier_rpc_url: String,
    pub verifier_caller: String,
    pub custody: CustodyConfig,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_var(name: &str) -> Result<String, MixerError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(MixerError::Config(format!("{} must be set", name))),
    }
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T, MixerError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MixerError::Config(format!("{}={} is invalid: {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}

fn custody_from_env() -> Result<CustodyConfig, MixerError> {
    let backend = var_or("CUSTODY_BACKEND", "ledger");
    match backend.trim().to_ascii_lowercase().as_str() {
        "ledger" => Ok(CustodyConfig::Ledger {
            rpc_url: var_or("LEDGER_RPC_URL", DEFAULT_LEDGER_RPC_URL),
            source: LedgerWallet {
                address: required_var("LEDGER_SOURCE_ADDRESS")?,
                seed: required_var("LEDGER_SOURCE_SEED")?,
            },
            pool: LedgerWallet {
                address: required_var("LEDGER_POOL_ADDRESS")?,
                seed: required_var("LEDGER_POOL_SEED")?,
            },
        }),
        "evm" => Ok(CustodyConfig::Evm {
            rpc_url: var_or("EVM_RPC_URL", DEFAULT_EVM_RPC_URL),
            chain_id: parsed_var("EVM_CHAIN_ID", DEFAULT_EVM_CHAIN_ID)?,
            source_private_key: required_var("EVM_SOURCE_PRIVATE_KEY")?,
            pool_private_key: required_var("EVM_POOL_PRIVATE_KEY")?,
        }),
        other => Err(MixerError::Config(format!(
            "CUSTODY_BACKEND must be 'ledger' or 'evm', got '{}'",
            other
        ))),
    }
}

impl MixerConfig {
    pub fn from_env() -> Result<Self, MixerError> {
        let job = JobSettings {
            interpreter: var_or("PROOF_SCRIPT_SHELL", "bash"),
            script_path: PathBuf::from(var_or("PROOF_SCRIPT_PATH", "./make_plonk_contract.sh")),
            work_dir: PathBuf::from(var_or("PROOF_WORK_DIR", ".")),
            output_path: PathBuf::from(var_or(
                "PROOF_OUTPUT_PATH",
                "./commitmentproof_js/generatecall_output.txt",
            )),
            timeout: Duration::from_secs(parsed_var("PROOF_SCRIPT_TIMEOUT_SECS", 300)?),
        };

        Ok(Self {
            port: parsed_var("PORT", 4004)?,
            currency: var_or("MIXER_CURRENCY", "XRP"),
            job,
            rpc_timeout: Duration::from_secs(parsed_var("RPC_TIMEOUT_SECS", 30)?),
            transfer_timeout: Duration::from_secs(parsed_var("TRANSFER_TIMEOUT_SECS", 120)?),
            verifier_rpc_url: var_or("VERIFIER_RPC_URL", DEFAULT_EVM_RPC_URL),
            verifier_caller: var_or(
                "VERIFIER_CALLER_ADDRESS",
                "0x0000000000000000000000000000000000000000",
            ),
            custody: custody_from_env()?,
        })
    }
}
