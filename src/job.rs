use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::MixerError;
use crate::verifier::ContractRef;

const ADDRESS_MARKER: &str = "Contract deployed at address: ";
const ABI_MARKER: &str = "Contract ABI: ";
const PAYLOAD_SEPARATOR: &str = "][";

/// Placeholder for contract metadata the script did not report.
pub const UNKNOWN: &str = "Unknown";

/// Artifacts produced by one proof-generation run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProof {
    pub contract_address: String,
    pub contract_abi: String,
    pub proof: String,
    pub public_signals: String,
}

impl GeneratedProof {
    pub fn contract(&self) -> ContractRef {
        ContractRef {
            address: self.contract_address.clone(),
            abi: self.contract_abi.clone(),
        }
    }
}

/// Something that can produce a fresh proof artifact on demand.
#[async_trait]
pub trait ProofSource: Send + Sync {
    async fn generate(&self) -> Result<GeneratedProof, MixerError>;
}

#[derive(Clone, Debug)]
pub struct JobSettings {
    /// Program used to run the script (e.g. `bash`).
    pub interpreter: String,
    pub script_path: PathBuf,
    pub work_dir: PathBuf,
    /// File the script writes its `[proof][public_signals]` payload to.
    pub output_path: PathBuf,
    pub timeout: Duration,
}

impl JobSettings {
    /// Resolve a configured path the way the script sees it: relative paths
    /// are taken from the work directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }
}

/// Runs the external proof-generation script.
///
/// Runs are serialized through a Mutex: the script writes its payload to a
/// fixed path, so two concurrent runs would read each other's output.
pub struct ProofGenerationJob {
    settings: JobSettings,
    mutex: Mutex<()>,
}

impl ProofGenerationJob {
    pub fn new(settings: JobSettings) -> Self {
        Self {
            settings,
            mutex: Mutex::new(()),
        }
    }

    pub async fn run(&self) -> Result<GeneratedProof, MixerError> {
        let settings = &self.settings;
        let script_path = settings.resolve(&settings.script_path);
        let output_path = settings.resolve(&settings.output_path);
        if !script_path.exists() {
            return Err(MixerError::ScriptNotFound(script_path));
        }

        let _guard = self.mutex.lock().await;

        match tokio::fs::remove_file(&output_path).await {
            Ok(()) => tracing::debug!("Removed stale output {}", output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove stale output {}: {}",
                output_path.display(),
                e
            ),
        }

        tracing::info!(
            "Running proof generation: script={} timeout={}s",
            settings.script_path.display(),
            settings.timeout.as_secs()
        );

        let stdout = run_script_with_timeout(
            &settings.interpreter,
            &settings.script_path,
            &settings.work_dir,
            settings.timeout,
        )
        .await?;

        if let Some(generated) = parse_structured_output(&stdout) {
            tracing::info!(
                "Proof generated (structured): contract={}",
                generated.contract_address
            );
            return Ok(generated);
        }

        let contract_address = scrape_contract_address(&stdout);
        let contract_abi = scrape_contract_abi(&stdout);
        if contract_address == UNKNOWN {
            tracing::warn!("Script output did not report a contract address");
        }

        let payload = match tokio::fs::read_to_string(&output_path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MixerError::OutputMissing(output_path))
            }
            Err(e) => {
                return Err(MixerError::OutputMalformed(format!(
                    "Failed to read {}: {}",
                    output_path.display(),
                    e
                )))
            }
        };
        let (proof, public_signals) = split_payload(&payload)?;

        tracing::info!(
            "Proof generated: contract={} proof_len={} public_signals_len={}",
            contract_address,
            proof.len(),
            public_signals.len()
        );

        Ok(GeneratedProof {
            contract_address,
            contract_abi,
            proof,
            public_signals,
        })
    }
}

#[async_trait]
impl ProofSource for ProofGenerationJob {
    async fn generate(&self) -> Result<GeneratedProof, MixerError> {
        self.run().await
    }
}

// ─────────────────────────────────────────────
// Script execution with timeout
// ─────────────────────────────────────────────

async fn run_script_with_timeout(
    interpreter: &str,
    script: &Path,
    cwd: &Path,
    timeout: Duration,
) -> Result<String, MixerError> {
    let child = Command::new(interpreter)
        .arg(script)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MixerError::ScriptNotFound(PathBuf::from(interpreter))
            } else {
                MixerError::ScriptExecution {
                    status: "spawn failed".to_string(),
                    stderr: format!("Failed to spawn {}: {}", interpreter, e),
                }
            }
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| MixerError::ScriptTimeout(timeout.as_secs()))?
        .map_err(|e| MixerError::ScriptExecution {
            status: "wait failed".to_string(),
            stderr: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        tracing::error!("{} exited with {}: {}", script.display(), output.status, stderr);
        return Err(MixerError::ScriptExecution {
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(stdout)
}

// ─────────────────────────────────────────────
// Output extraction
// ─────────────────────────────────────────────

/// Find a standard-output line holding the full result as one JSON object.
fn parse_structured_output(stdout: &str) -> Option<GeneratedProof> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<GeneratedProof>(line).ok())
}

/// Word token following the deployment marker, or [`UNKNOWN`].
pub fn scrape_contract_address(stdout: &str) -> String {
    stdout
        .find(ADDRESS_MARKER)
        .map(|start| {
            stdout[start + ADDRESS_MARKER.len()..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|address| !address.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Everything after the ABI marker to the end of output, or [`UNKNOWN`].
pub fn scrape_contract_abi(stdout: &str) -> String {
    stdout
        .find(ABI_MARKER)
        .map(|start| stdout[start + ABI_MARKER.len()..].trim().to_string())
        .filter(|abi| !abi.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Split a `[proof][public_signals]` payload into its two segments.
pub fn split_payload(payload: &str) -> Result<(String, String), MixerError> {
    let payload = payload.trim();
    let segments: Vec<&str> = payload.split(PAYLOAD_SEPARATOR).collect();
    if segments.len() != 2 {
        return Err(MixerError::OutputMalformed(format!(
            "expected two bracketed segments, found {}",
            segments.len()
        )));
    }

    let proof = segments[0]
        .strip_prefix('[')
        .ok_or_else(|| MixerError::OutputMalformed("proof segment does not open with [".to_string()))?;
    let public_signals = segments[1].strip_suffix(']').ok_or_else(|| {
        MixerError::OutputMalformed("public signals segment does not close with ]".to_string())
    })?;

    Ok((proof.to_string(), public_signals.to_string()))
}
