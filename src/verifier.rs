// Proof verification against a deployed verifier contract.
//
// Parsing happens locally so malformed input never reaches the chain. The
// on-chain call itself sits behind `VerifierContract`; `EthersVerifier` is the
// production implementation.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{Abi, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};

use crate::error::MixerError;

const VERIFY_FUNCTION: &str = "verifyProof";

/// Location and interface of a deployed verifier contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractRef {
    pub address: String,
    pub abi: String,
}

/// Read-only `verifyProof(proof, publicSignals)` call on a verifier contract.
///
/// Errors are returned as plain text; [`ProofVerifier`] classifies them.
#[async_trait]
pub trait VerifierContract: Send + Sync {
    async fn verify_proof(
        &self,
        contract: &ContractRef,
        caller: &str,
        proof: Vec<U256>,
        public_signals: Vec<U256>,
    ) -> Result<bool, String>;
}

/// Parse a comma-separated list of hexadecimal field elements.
///
/// Tokens may carry a `0x` prefix, surrounding whitespace and surrounding
/// double quotes. Enclosing brackets must already be stripped.
pub fn parse_field_elements(raw: &str, what: &str) -> Result<Vec<U256>, MixerError> {
    if raw.trim().is_empty() {
        return Err(MixerError::MalformedProof(format!("{} is empty", what)));
    }

    raw.split(',')
        .enumerate()
        .map(|(index, token)| {
            let token = token.trim().trim_matches('"').trim();
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            if digits.is_empty() {
                return Err(MixerError::MalformedProof(format!(
                    "{} element {} is empty",
                    what, index
                )));
            }
            U256::from_str_radix(digits, 16).map_err(|e| {
                MixerError::MalformedProof(format!(
                    "{} element {} ({}) is not a field element: {}",
                    what, index, token, e
                ))
            })
        })
        .collect()
}

pub struct ProofVerifier {
    contract: Arc<dyn VerifierContract>,
    caller: String,
    timeout: Duration,
}

impl ProofVerifier {
    pub fn new(contract: Arc<dyn VerifierContract>, caller: String, timeout: Duration) -> Self {
        Self {
            contract,
            caller,
            timeout,
        }
    }

    /// Parse the artifact and ask the contract whether it is valid.
    ///
    /// Each call goes to the chain; results are never cached.
    pub async fn verify(
        &self,
        proof: &str,
        public_signals: &str,
        contract: &ContractRef,
    ) -> Result<bool, MixerError> {
        let proof_elements = parse_field_elements(proof, "proof")?;
        let signal_elements = parse_field_elements(public_signals, "public signals")?;

        tracing::info!(
            "Verifying proof: contract={} proof_elements={} public_signals={}",
            contract.address,
            proof_elements.len(),
            signal_elements.len()
        );

        let call = self.contract.verify_proof(
            contract,
            &self.caller,
            proof_elements,
            signal_elements,
        );
        let valid = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => return Err(MixerError::VerificationCallFailed { diagnostic: e }),
            Err(_) => {
                return Err(MixerError::VerificationCallFailed {
                    diagnostic: format!("verifyProof timed out after {}s", self.timeout.as_secs()),
                })
            }
        };

        tracing::info!("Verification result for contract={}: {}", contract.address, valid);
        Ok(valid)
    }

    /// Like [`ProofVerifier::verify`], but a `false` answer is an error.
    pub async fn require_valid(
        &self,
        proof: &str,
        public_signals: &str,
        contract: &ContractRef,
    ) -> Result<(), MixerError> {
        if self.verify(proof, public_signals, contract).await? {
            Ok(())
        } else {
            Err(MixerError::ProofRejected {
                contract_address: contract.address.clone(),
            })
        }
    }
}

/// `eth_call` based verifier using an ethers HTTP provider.
pub struct EthersVerifier {
    provider: Provider<Http>,
}

impl EthersVerifier {
    pub fn new(rpc_url: &str) -> Result<Self, MixerError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| MixerError::Config(format!("invalid verifier RPC URL {}: {}", rpc_url, e)))?;
        Ok(Self { provider })
    }
}

/// Build the argument token for one `verifyProof` parameter, honouring
/// fixed-size array parameters (`uint256[24]`) as well as dynamic ones.
fn elements_token(kind: &ParamType, elements: Vec<U256>) -> Result<Token, String> {
    let tokens: Vec<Token> = elements.into_iter().map(Token::Uint).collect();
    match kind {
        ParamType::Array(_) => Ok(Token::Array(tokens)),
        ParamType::FixedArray(_, size) if *size == tokens.len() => Ok(Token::FixedArray(tokens)),
        ParamType::FixedArray(_, size) => Err(format!(
            "contract expects {} elements, got {}",
            size,
            tokens.len()
        )),
        other => Err(format!("unsupported verifyProof parameter type {}", other)),
    }
}

#[async_trait]
impl VerifierContract for EthersVerifier {
    async fn verify_proof(
        &self,
        contract: &ContractRef,
        caller: &str,
        proof: Vec<U256>,
        public_signals: Vec<U256>,
    ) -> Result<bool, String> {
        let abi: Abi = serde_json::from_str(&contract.abi)
            .map_err(|e| format!("Failed to parse contract ABI: {}", e))?;
        let function = abi
            .function(VERIFY_FUNCTION)
            .map_err(|e| format!("ABI has no {}: {}", VERIFY_FUNCTION, e))?;
        if function.inputs.len() != 2 {
            return Err(format!(
                "{} takes {} parameters, expected 2",
                VERIFY_FUNCTION,
                function.inputs.len()
            ));
        }

        let to: Address = contract
            .address
            .parse()
            .map_err(|e| format!("Invalid contract address {}: {}", contract.address, e))?;
        let from: Address = caller
            .parse()
            .map_err(|e| format!("Invalid caller address {}: {}", caller, e))?;

        let args = [
            elements_token(&function.inputs[0].kind, proof)?,
            elements_token(&function.inputs[1].kind, public_signals)?,
        ];
        let calldata = function
            .encode_input(&args)
            .map_err(|e| format!("Failed to encode {} call: {}", VERIFY_FUNCTION, e))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(calldata)
            .into();
        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| format!("{} call reverted or failed: {}", VERIFY_FUNCTION, e))?;

        let decoded = function
            .decode_output(&output)
            .map_err(|e| format!("Failed to decode {} result: {}", VERIFY_FUNCTION, e))?;
        decoded
            .into_iter()
            .next()
            .and_then(Token::into_bool)
            .ok_or_else(|| format!("{} did not return a bool", VERIFY_FUNCTION))
    }
}
