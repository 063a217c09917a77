//! Signature Client Contract
//!
//! The manager requests Schnorr signatures through an asynchronous
//! request/response contract: `sign_async` takes a request and a reply
//! channel, and the client publishes the same request back with (Rx, S)
//! filled in. The request id round-trips unchanged so callers can
//! correlate replies. Either a local single-key signer or a remote
//! threshold signer satisfies the contract; the two are semantically
//! equivalent.

pub mod local;
pub mod remote;

use alloy_primitives::B256;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::Outpoint;

pub use local::LocalSigner;
pub use remote::RemoteSigner;

/// Signer client errors
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signer rejected request: {0}")]
    Rejected(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("reply channel closed")]
    ReplyChannelClosed,
}

/// One signature request, also used as the reply envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    /// Caller-chosen correlation id; round-trips unchanged
    pub id: B256,
    /// The 32-byte digest to sign
    pub signing_hash: B256,
    /// Outpoints a BTC-side request spends, empty otherwise
    pub outpoints: Vec<Outpoint>,
    /// Schnorr commitment X-coordinate, filled in the reply
    pub rx: Option<B256>,
    /// Schnorr scalar, filled in the reply
    pub s: Option<B256>,
}

impl SignatureRequest {
    pub fn new(id: B256, signing_hash: B256) -> Self {
        Self {
            id,
            signing_hash,
            outpoints: Vec::new(),
            rx: None,
            s: None,
        }
    }

    pub fn with_outpoints(mut self, outpoints: Vec<Outpoint>) -> Self {
        self.outpoints = outpoints;
        self
    }

    /// Fill in the signature halves from a 64-byte Schnorr signature
    pub fn signed(mut self, signature: &[u8; 64]) -> Self {
        self.rx = Some(B256::from_slice(&signature[..32]));
        self.s = Some(B256::from_slice(&signature[32..]));
        self
    }

    /// The (Rx, S) pair, if this request has been answered
    pub fn signature(&self) -> Option<(B256, B256)> {
        Some((self.rx?, self.s?))
    }
}

/// Asynchronous Schnorr signing capability
///
/// `sign_async` may take arbitrary time (a network round trip to a
/// threshold signer). A synchronous error is retryable; a reply delivered
/// on the channel is final.
#[async_trait]
pub trait SignerClient: Send + Sync {
    /// Sign the request's hash and publish the answered request to `reply`
    async fn sign_async(
        &self,
        request: SignatureRequest,
        reply: mpsc::Sender<SignatureRequest>,
    ) -> Result<(), SignerError>;

    /// The signer's 64-byte public key (32-byte X then 32-byte Y)
    async fn group_public_key(&self) -> Result<[u8; 64], SignerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let req = SignatureRequest::new(B256::repeat_byte(0x01), B256::repeat_byte(0x02));
        assert!(req.signature().is_none());

        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(&[0x11; 32]);
        sig[32..].copy_from_slice(&[0x22; 32]);

        let answered = req.signed(&sig);
        assert_eq!(answered.id, B256::repeat_byte(0x01));
        assert_eq!(
            answered.signature(),
            Some((B256::repeat_byte(0x11), B256::repeat_byte(0x22)))
        );
    }
}
