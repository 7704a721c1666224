//! # Signing collaborator
//! Signing is delegated to an external signer; this crate only moves bytes
//! and key handles around and records the result next to the snapshot.

use std::fmt;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AtfError, Result};

/// Opaque reference to key material held by the signer (path, KMS id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHandle(pub String);

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait::async_trait]
pub trait FeedSigner: Send + Sync {
    async fn sign(&self, content: &[u8], key: &KeyHandle) -> Result<Vec<u8>>;
    async fn verify(&self, content: &[u8], signature: &[u8], key: &KeyHandle) -> Result<bool>;
}

/// Detached signature stored as `<feed>/<version>.sig.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub feed_id: String,
    pub version: String,
    /// Checksum of the archive entry that was signed.
    pub checksum: String,
    pub key_handle: KeyHandle,
    /// Lowercase hex.
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

impl SignatureEnvelope {
    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.signature)
            .map_err(|e| AtfError::Signing(format!("bad hex signature: {e}")))
    }
}

/// Runs external programs for signing and verification.
///
/// `{key}` in any argument is replaced by the key handle; for verification
/// `{signature}` is replaced by the path of a temp file holding the
/// signature. Content is always piped on stdin. The sign command's stdout is
/// the signature; the verify command's exit status is the verdict.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    sign_cmd: Vec<String>,
    verify_cmd: Vec<String>,
}

impl CommandSigner {
    pub fn new(sign_cmd: Vec<String>, verify_cmd: Vec<String>) -> Result<Self> {
        if sign_cmd.is_empty() || verify_cmd.is_empty() {
            return Err(AtfError::Signing("signer commands must not be empty".into()));
        }
        Ok(Self {
            sign_cmd,
            verify_cmd,
        })
    }
}

#[async_trait::async_trait]
impl FeedSigner for CommandSigner {
    async fn sign(&self, content: &[u8], key: &KeyHandle) -> Result<Vec<u8>> {
        let args = substitute(&self.sign_cmd, key, None);
        let out = run_with_stdin(&args, content).await?;
        if !out.status.success() {
            return Err(AtfError::Signing(format!(
                "{} exited with {}: {}",
                args[0],
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        if out.stdout.is_empty() {
            return Err(AtfError::Signing(format!("{} produced no signature", args[0])));
        }
        Ok(out.stdout)
    }

    async fn verify(&self, content: &[u8], signature: &[u8], key: &KeyHandle) -> Result<bool> {
        let sig_file = tempfile::NamedTempFile::new()?;
        tokio::fs::write(sig_file.path(), signature).await?;
        let sig_path = sig_file.path().to_string_lossy().to_string();

        let args = substitute(&self.verify_cmd, key, Some(&sig_path));
        let out = run_with_stdin(&args, content).await?;
        if !out.status.success() {
            tracing::debug!(
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "verify command rejected signature"
            );
        }
        Ok(out.status.success())
    }
}

fn substitute(cmd: &[String], key: &KeyHandle, sig_path: Option<&str>) -> Vec<String> {
    cmd.iter()
        .map(|a| {
            let a = a.replace("{key}", &key.0);
            match sig_path {
                Some(p) => a.replace("{signature}", p),
                None => a,
            }
        })
        .collect()
}

async fn run_with_stdin(args: &[String], content: &[u8]) -> Result<std::process::Output> {
    let mut child = Command::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AtfError::Signing(format!("cannot start {}: {e}", args[0])))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AtfError::Signing("signer stdin unavailable".into()))?;
    let payload = content.to_vec();
    // Feed stdin concurrently so a chatty child can't block on a full stdout pipe.
    let writer = tokio::spawn(async move {
        let res = stdin.write_all(&payload).await;
        drop(stdin);
        res
    });

    let out = child.wait_with_output().await?;
    match writer.await {
        Ok(Ok(())) => {}
        // The child may legitimately exit before reading everything.
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) => return Err(AtfError::Signing(format!("stdin writer failed: {e}"))),
    }
    Ok(out)
}
