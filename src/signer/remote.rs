//! Remote Threshold Signer Client
//!
//! Speaks the signer service's HTTP surface:
//!
//! - `GET /pubkey` → `{ success, group_public_key }` (64 hex-encoded bytes,
//!   32-byte X then 32-byte Y)
//! - `POST /sign { msg }` → `{ success, signature }` (64 hex-encoded bytes,
//!   32-byte Rx then 32-byte S)
//!
//! The service fronts a multi-party signing round, so a call may take
//! arbitrary time; the caller fans out and waits on the reply channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{SignatureRequest, SignerClient, SignerError};

/// Remote signer HTTP client
pub struct RemoteSigner {
    base_url: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SignBody {
    msg: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    success: bool,
    #[serde(default)]
    signature: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PubKeyResponse {
    success: bool,
    #[serde(default)]
    group_public_key: String,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteSigner {
    /// Create a client for the signer service at `base_url`
    pub fn new(base_url: &str) -> Result<Self, SignerError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SignerError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SignerClient for RemoteSigner {
    async fn sign_async(
        &self,
        request: SignatureRequest,
        reply: mpsc::Sender<SignatureRequest>,
    ) -> Result<(), SignerError> {
        let session_id = uuid::Uuid::new_v4().to_string();

        debug!(
            target: "bridge::signer",
            session_id = %session_id,
            id = %hex::encode(request.id),
            "requesting remote signature"
        );

        let body = SignBody {
            msg: hex::encode(request.signing_hash),
        };

        let response: SignResponse = self
            .http_client
            .post(format!("{}/sign", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SignerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SignerError::Transport(e.to_string()))?;

        if !response.success {
            return Err(SignerError::Rejected(
                response.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        let signature = parse_signature_hex(&response.signature)?;

        info!(
            target: "bridge::signer",
            session_id = %session_id,
            id = %hex::encode(request.id),
            "remote signature complete"
        );

        reply
            .send(request.signed(&signature))
            .await
            .map_err(|_| SignerError::ReplyChannelClosed)
    }

    async fn group_public_key(&self) -> Result<[u8; 64], SignerError> {
        let response: PubKeyResponse = self
            .http_client
            .get(format!("{}/pubkey", self.base_url))
            .send()
            .await
            .map_err(|e| SignerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SignerError::Transport(e.to_string()))?;

        if !response.success {
            return Err(SignerError::Rejected(
                response.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        parse_key_hex(&response.group_public_key)
    }
}

fn parse_signature_hex(s: &str) -> Result<[u8; 64], SignerError> {
    let bytes = hex::decode(s).map_err(|e| SignerError::SigningFailed(e.to_string()))?;
    if bytes.len() != 64 {
        return Err(SignerError::SigningFailed(format!(
            "signature must be 64 bytes, got {}",
            bytes.len()
        )));
    }

    let mut sig = [0u8; 64];
    sig.copy_from_slice(&bytes);
    Ok(sig)
}

fn parse_key_hex(s: &str) -> Result<[u8; 64], SignerError> {
    let bytes = hex::decode(s).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
    if bytes.len() != 64 {
        return Err(SignerError::InvalidKey(format!(
            "public key must be 64 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key = [0u8; 64];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let signer = RemoteSigner::new("http://localhost:9000/").unwrap();
        assert_eq!(signer.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_parse_signature_hex() {
        let sig = parse_signature_hex(&"ab".repeat(64)).unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig[0], 0xab);

        assert!(parse_signature_hex("abcd").is_err());
        assert!(parse_signature_hex("not hex").is_err());
    }

    #[test]
    fn test_parse_key_hex() {
        assert!(parse_key_hex(&"01".repeat(64)).is_ok());
        assert!(parse_key_hex(&"01".repeat(32)).is_err());
    }
}
