//! Local Single-Key Signer
//!
//! Signs with one secp256k1 key held in memory. POC stand-in for the
//! remote threshold signer; the reply contract is identical.

use async_trait::async_trait;
use bitcoin::secp256k1::{self, Keypair, Message, Secp256k1, SecretKey};
use tokio::sync::mpsc;
use tracing::debug;

use super::{SignatureRequest, SignerClient, SignerError};

/// Single-key Schnorr signer
pub struct LocalSigner {
    keypair: Keypair,
    secp: Secp256k1<secp256k1::All>,
}

impl LocalSigner {
    /// Create from secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignerError> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &secret_key);

        Ok(Self { keypair, secp })
    }

    /// Create from hex string
    pub fn from_hex(hex_key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex_key).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey("key must be 32 bytes".to_string()));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Generate a new random signer
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        Self { keypair, secp }
    }

    /// Get secret key hex (for backup)
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_key().secret_bytes())
    }

    /// BIP-340 Schnorr signature over a 32-byte digest
    fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        let msg = Message::from_digest(*digest);
        self.secp.sign_schnorr(&msg, &self.keypair).serialize()
    }
}

#[async_trait]
impl SignerClient for LocalSigner {
    async fn sign_async(
        &self,
        request: SignatureRequest,
        reply: mpsc::Sender<SignatureRequest>,
    ) -> Result<(), SignerError> {
        debug!(
            target: "bridge::signer",
            id = %hex::encode(request.id),
            "local signing"
        );

        let signature = self.sign(&request.signing_hash.0);
        reply
            .send(request.signed(&signature))
            .await
            .map_err(|_| SignerError::ReplyChannelClosed)
    }

    async fn group_public_key(&self) -> Result<[u8; 64], SignerError> {
        let uncompressed = self.keypair.public_key().serialize_uncompressed();
        let mut key = [0u8; 64];
        key.copy_from_slice(&uncompressed[1..]);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use bitcoin::secp256k1::XOnlyPublicKey;

    #[test]
    fn test_from_hex_round_trip() {
        let hex_key = "0000000000000000000000000000000000000000000000000000000000000001";
        let signer = LocalSigner::from_hex(hex_key).unwrap();
        assert_eq!(signer.secret_hex(), hex_key);

        assert!(LocalSigner::from_hex("abcd").is_err());
        assert!(LocalSigner::from_hex("zz").is_err());
    }

    #[test]
    fn test_signature_verifies() {
        let signer = LocalSigner::generate();
        let digest = [0x42u8; 32];

        let sig_bytes = signer.sign(&digest);

        let secp = Secp256k1::new();
        let sig = secp256k1::schnorr::Signature::from_slice(&sig_bytes).unwrap();
        let msg = Message::from_digest(digest);
        let (xonly, _) = XOnlyPublicKey::from_keypair(&signer.keypair);
        secp.verify_schnorr(&sig, &msg, &xonly).unwrap();
    }

    #[tokio::test]
    async fn test_sign_async_reply() {
        let signer = LocalSigner::generate();
        let (tx, mut rx) = mpsc::channel(1);

        let request = SignatureRequest::new(B256::repeat_byte(0x01), B256::repeat_byte(0x02));
        signer.sign_async(request, tx).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, B256::repeat_byte(0x01));
        assert_eq!(reply.signing_hash, B256::repeat_byte(0x02));
        assert!(reply.signature().is_some());
    }

    #[tokio::test]
    async fn test_group_public_key_shape() {
        let signer = LocalSigner::generate();
        let key = signer.group_public_key().await.unwrap();

        let (xonly, _) = XOnlyPublicKey::from_keypair(&signer.keypair);
        // X-coordinate leads; parity lives in Y
        assert_eq!(&key[..32], xonly.serialize().as_slice());
    }
}
