//! Wire Formats
//!
//! Byte-exact encodings shared with the on-chain contracts and the BTC
//! deposit flow:
//!
//! - the OP_RETURN deposit payload: an RLP list of the 4-byte big-endian
//!   target chain id followed by the 20-byte Mirror-Chain receiver
//! - the mint signing hash: `keccak256(btc_txid || receiver || amount)`
//!   with the amount packed as a 32-byte big-endian word

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::{Decodable, Encodable, Header};
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::Script;
use thiserror::Error;

/// Wire format errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid RLP payload: {0}")]
    Rlp(String),

    #[error("not an OP_RETURN script")]
    NotOpReturn,

    #[error("payload too large for OP_RETURN")]
    PayloadTooLarge,
}

/// The OP_RETURN deposit payload
///
/// Identifies which Mirror Chain a BTC deposit targets and which account
/// receives the wrapped tokens there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositPayload {
    /// Target Mirror-Chain id
    pub chain_id: u32,
    /// Mirror-Chain account receiving the wrapped tokens
    pub receiver: Address,
}

impl DepositPayload {
    pub fn new(chain_id: u32, receiver: Address) -> Self {
        Self { chain_id, receiver }
    }

    /// RLP-encode as `list[[4B chain id], [20B receiver]]`
    pub fn encode(&self) -> Vec<u8> {
        let chain_id = self.chain_id.to_be_bytes();
        let mut out = Vec::with_capacity(28);
        Header {
            list: true,
            payload_length: chain_id.length() + self.receiver.length(),
        }
        .encode(&mut out);
        chain_id.encode(&mut out);
        self.receiver.encode(&mut out);
        out
    }

    /// Decode from the RLP wire form
    ///
    /// Rejects trailing bytes and chain-id fields that are not exactly four
    /// bytes; the layout is fixed, not minimal-integer RLP.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let buf = &mut &bytes[..];
        let mut payload = Header::decode_bytes(buf, true).map_err(rlp_err)?;

        let chain_id: [u8; 4] = Decodable::decode(&mut payload).map_err(rlp_err)?;
        let receiver: Address = Decodable::decode(&mut payload).map_err(rlp_err)?;

        if !payload.is_empty() || !buf.is_empty() {
            return Err(WireError::Rlp("trailing bytes".to_string()));
        }

        Ok(Self {
            chain_id: u32::from_be_bytes(chain_id),
            receiver,
        })
    }

    /// Build the full OP_RETURN locking script carrying this payload
    pub fn to_script(&self) -> Result<Vec<u8>, WireError> {
        let data = PushBytesBuf::try_from(self.encode()).map_err(|_| WireError::PayloadTooLarge)?;
        let script = Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(data)
            .into_script();
        Ok(script.into_bytes())
    }

    /// Extract the payload from an OP_RETURN locking script
    pub fn from_script(script_bytes: &[u8]) -> Result<Self, WireError> {
        let script = Script::from_bytes(script_bytes);
        if !script.is_op_return() {
            return Err(WireError::NotOpReturn);
        }

        let mut instructions = script.instructions();
        // OP_RETURN itself
        instructions
            .next()
            .transpose()
            .map_err(|e| WireError::Rlp(e.to_string()))?;

        match instructions.next() {
            Some(Ok(Instruction::PushBytes(data))) => Self::decode(data.as_bytes()),
            _ => Err(WireError::Rlp("missing payload push".to_string())),
        }
    }
}

fn rlp_err(e: alloy_rlp::Error) -> WireError {
    WireError::Rlp(e.to_string())
}

/// The hash the signer commits to for a mint
///
/// `keccak256(btc_txid[32] || receiver[20] || amount_be_32)`; must be
/// bit-identical across implementations.
pub fn mint_signing_hash(btc_txid: &B256, receiver: &Address, amount: u64) -> B256 {
    let mut buf = Vec::with_capacity(32 + 20 + 32);
    buf.extend_from_slice(btc_txid.as_slice());
    buf.extend_from_slice(receiver.as_slice());
    buf.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "0xdab1330000000000000000000000000000003940".parse().unwrap()
    }

    #[test]
    fn test_payload_byte_layout() {
        let encoded = DepositPayload::new(1337, addr()).encode();

        // list header, then 4-byte string, then 20-byte string
        let mut expected = vec![0xc0 + 26, 0x80 + 4];
        expected.extend_from_slice(&1337u32.to_be_bytes());
        expected.push(0x80 + 20);
        expected.extend_from_slice(addr().as_slice());

        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_payload_round_trip() {
        for chain_id in [0u32, 1, 1337, u32::MAX] {
            let payload = DepositPayload::new(chain_id, addr());
            let decoded = DepositPayload::decode(&payload.encode()).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = DepositPayload::new(7, addr()).encode();
        encoded.push(0x00);
        assert!(DepositPayload::decode(&encoded).is_err());
    }

    #[test]
    fn test_script_round_trip() {
        let payload = DepositPayload::new(1337, addr());
        let script = payload.to_script().unwrap();

        assert_eq!(script[0], 0x6a);
        assert_eq!(DepositPayload::from_script(&script).unwrap(), payload);
    }

    #[test]
    fn test_from_script_rejects_non_op_return() {
        // P2WPKH-shaped script
        let script = [0x00, 0x14, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab,
            0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab];
        assert!(matches!(
            DepositPayload::from_script(&script),
            Err(WireError::NotOpReturn)
        ));
    }

    #[test]
    fn test_mint_signing_hash_packing() {
        let txid = B256::repeat_byte(0xaa);
        let hash = mint_signing_hash(&txid, &addr(), 100_000_000);

        let mut buf = Vec::new();
        buf.extend_from_slice(&[0xaa; 32]);
        buf.extend_from_slice(addr().as_slice());
        buf.extend_from_slice(&[0u8; 24]);
        buf.extend_from_slice(&100_000_000u64.to_be_bytes());
        assert_eq!(hash, keccak256(&buf));

        // every field participates
        assert_ne!(hash, mint_signing_hash(&txid, &addr(), 100_000_001));
        assert_ne!(hash, mint_signing_hash(&B256::repeat_byte(0xab), &addr(), 100_000_000));
        assert_ne!(
            hash,
            mint_signing_hash(&txid, &Address::repeat_byte(0x01), 100_000_000)
        );
    }
}
