//! `LedgerRecorder` — the forensic backbone (spec §4.5).
//!
//! Every assessment outcome, including early-blocked requests, is appended
//! to a hash-chained, Ed25519-signed append-only log. Recording happens
//! after the response is already on the wire: the pipeline never blocks a
//! caller on a disk write.

use crate::canonical::{canonical_hash, to_canonical_json};
use crate::types::{AssessmentOutcome, LedgerEntry};
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::rngs::OsRng;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const GENESIS_PREV_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const GENESIS_SIGNATURE: &str = "GENESIS";
const VERIFICATION_HINT: &str = "prev_hash|data_json|timestamp";

/// Single-writer append-only ledger. The writer lock spans disk I/O, so two
/// concurrent recordings never race on `last_hash` or interleave lines.
pub struct LedgerRecorder {
    file_path: PathBuf,
    signing_key: SigningKey,
    last_hash: Mutex<String>,
}

impl LedgerRecorder {
    /// Opens (creating and genesis-seeding if absent) the ledger at
    /// `file_path`. If `signing_key_file` names a readable 32-byte raw
    /// Ed25519 seed, that key is loaded; otherwise a fresh keypair is
    /// generated for this process only (spec §9: persistence is a hook
    /// implementations expose, not something decided on the operator's
    /// behalf). The public key is logged at startup so an operator can pin
    /// it for offline verification.
    pub fn open(file_path: impl AsRef<Path>, signing_key_file: Option<&str>) -> anyhow::Result<Arc<Self>> {
        let file_path = file_path.as_ref().to_path_buf();
        let signing_key = match signing_key_file {
            Some(path) => Self::load_signing_key(path)?,
            None => {
                tracing::warn!("ledger: no SIGNING_KEY_FILE configured, using an ephemeral per-process key");
                SigningKey::generate(&mut OsRng)
            }
        };

        let verifying_key = signing_key.verifying_key();
        tracing::info!(
            public_key = %base64::engine::general_purpose::STANDARD.encode(verifying_key.as_bytes()),
            "ledger: signing key active for this process"
        );

        let last_hash = Self::init_ledger(&file_path)?;

        Ok(Arc::new(LedgerRecorder {
            file_path,
            signing_key,
            last_hash: Mutex::new(last_hash),
        }))
    }

    fn load_signing_key(path: &str) -> anyhow::Result<SigningKey> {
        let bytes = std::fs::read(path)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("signing key file must contain exactly 32 raw bytes"))?;
        Ok(SigningKey::from_bytes(&seed))
    }

    fn init_ledger(file_path: &Path) -> anyhow::Result<String> {
        if !file_path.exists() {
            let genesis = serde_json::json!({
                "event": "GENESIS",
                "timestamp": chrono::Utc::now().timestamp(),
                "prev_hash": GENESIS_PREV_HASH,
                "signature": GENESIS_SIGNATURE,
                "meta": { "version": "v1.0" },
            });
            let mut file = OpenOptions::new().create(true).append(true).open(file_path)?;
            writeln!(file, "{}", serde_json::to_string(&genesis)?)?;
            return Ok(canonical_hash(&genesis));
        }

        let file = std::fs::File::open(file_path)?;
        let reader = BufReader::new(file);
        let mut last_line: Option<String> = None;
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                last_line = Some(line);
            }
        }
        match last_line {
            Some(line) => {
                let entry: serde_json::Value = serde_json::from_str(&line)?;
                Ok(canonical_hash(&entry))
            }
            None => Ok(GENESIS_PREV_HASH.to_string()),
        }
    }

    /// Sign and append `outcome`. Never panics on a write failure — an
    /// unwritable ledger is an `InternalInvariantBreak`-class condition the
    /// caller decides how to surface, not a reason to crash the request
    /// handler that already responded.
    pub async fn record(&self, outcome: &AssessmentOutcome) -> anyhow::Result<()> {
        let timestamp = chrono::Utc::now().timestamp();
        let data = serde_json::to_value(outcome)?;

        let mut last_hash = self.last_hash.lock().await;
        let prev_hash = last_hash.clone();

        let payload = format!("{}|{}|{}", prev_hash, to_canonical_json(&data), timestamp);
        let signature: Signature = self.signing_key.sign(payload.as_bytes());
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let entry = LedgerEntry {
            timestamp,
            data,
            prev_hash,
            signature: signature_b64,
            verification_data: Some(VERIFICATION_HINT.to_string()),
        };

        let mut file = OpenOptions::new().append(true).open(&self.file_path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;

        *last_hash = canonical_hash(&entry);
        tracing::info!(path = %outcome.path, status = outcome.status_code, "ledger: entry recorded");
        Ok(())
    }

    /// Records in the background so the recording never delays the
    /// response already sent to the caller (spec §4.5 "after the response
    /// has been sent").
    pub fn record_async(self: &Arc<Self>, outcome: AssessmentOutcome) {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&outcome).await {
                tracing::error!(error = %e, "ledger: write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> AssessmentOutcome {
        AssessmentOutcome {
            path: "/v1/assess".to_string(),
            method: "POST".to_string(),
            client_ip: "10.0.0.5".to_string(),
            status_code: 200,
            latency_ms: 12.5,
            layers_passed: "ALL".to_string(),
            intent_header_present: true,
        }
    }

    #[tokio::test]
    async fn opening_a_missing_file_seeds_a_genesis_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let _recorder = LedgerRecorder::open(&path, None).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let first_line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first_line["event"], "GENESIS");
        assert_eq!(first_line["prev_hash"], GENESIS_PREV_HASH);
        assert_eq!(first_line["signature"], GENESIS_SIGNATURE);
    }

    #[tokio::test]
    async fn reopening_an_existing_ledger_resumes_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let recorder = LedgerRecorder::open(&path, None).unwrap();
        recorder.record(&outcome()).await.unwrap();

        let reopened = LedgerRecorder::open(&path, None).unwrap();
        let expected_tip = recorder.last_hash.lock().await.clone();
        let actual_tip = reopened.last_hash.lock().await.clone();
        assert_eq!(expected_tip, actual_tip);
    }

    #[tokio::test]
    async fn successive_entries_chain_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let recorder = LedgerRecorder::open(&path, None).unwrap();
        recorder.record(&outcome()).await.unwrap();
        recorder.record(&outcome()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3); // genesis + 2 entries

        let genesis: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let second: LedgerEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.prev_hash, canonical_hash(&genesis));

        let third: LedgerEntry = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third.prev_hash, canonical_hash(&second));
    }

    #[tokio::test]
    async fn concurrent_records_never_interleave_or_collide_on_prev_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let recorder = LedgerRecorder::open(&path, None).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let recorder = Arc::clone(&recorder);
            handles.push(tokio::spawn(async move {
                recorder.record(&outcome()).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<String> = contents.lines().map(|s| s.to_string()).collect();
        assert_eq!(lines.len(), 17);

        let genesis: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        let mut running_hash = canonical_hash(&genesis);
        for line in &lines[1..] {
            let entry: LedgerEntry = serde_json::from_str(line).unwrap();
            assert_eq!(entry.prev_hash, running_hash);
            running_hash = canonical_hash(&entry);
        }
    }
}
