use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

use crate::BlockNumber;

/// EIP-2124 fork identifier: a CRC32 checksum rolled over the genesis hash and every past
/// fork-activation block number, plus the next known activation (0 if none is scheduled).
/// Lets a peer reject an incompatible chain history before exchanging any block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkId {
    pub hash: [u8; 4],
    pub next: BlockNumber,
}

impl ForkId {
    pub fn new(genesis_hash: crate::H256, activations: &[BlockNumber], head: BlockNumber) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(genesis_hash.as_bytes());
        let mut next = 0;
        for &activation in activations {
            if activation <= head {
                hasher.update(&activation.to_be_bytes());
            } else {
                next = activation;
                break;
            }
        }
        Self {
            hash: hasher.finalize().to_be_bytes(),
            next,
        }
    }

    /// Whether `other` (received from a peer) is compatible with locally known fork history.
    /// A strict equality check; richer EIP-2124 "subset" rules are left to the RPC/embedder
    /// layer that tracks the full schedule.
    pub fn is_compatible_with(&self, other: &ForkId) -> bool {
        self.hash == other.hash
    }
}

impl RLPEncode for ForkId {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.hash)
            .encode_field(&self.next)
            .finish()
            .ok();
    }
}

impl RLPDecode for ForkId {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (hash, decoder): (bytes::Bytes, _) = decoder.decode_field("hash")?;
        let (next, decoder) = decoder.decode_field("next")?;
        let remaining = decoder.finish()?;
        let mut fixed = [0u8; 4];
        if hash.len() != 4 {
            return Err(RLPDecodeError::InvalidLength);
        }
        fixed.copy_from_slice(&hash);
        Ok((ForkId { hash: fixed, next }, remaining))
    }
}
