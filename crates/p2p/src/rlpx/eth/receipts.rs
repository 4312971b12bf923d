use bytes::BufMut;
use ethlink_common::receipt::Receipt;
use ethlink_common::BlockHash;
use ethlink_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::message::RLPxMessage;
use crate::rlpx::utils::{snappy_compress, snappy_decompress};

/// A `Receipts` response stops growing once its encoded RLP body would exceed this size,
/// per §4.5's response-size ceiling for bulk reads.
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GetReceipts {
    pub id: u64,
    pub block_hashes: Vec<BlockHash>,
}

impl RLPxMessage for GetReceipts {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.block_hashes)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (block_hashes, decoder) = decoder.decode_field("hashes")?;
        decoder.finish_unchecked();
        Ok(GetReceipts { id, block_hashes })
    }
}

#[derive(Debug, Clone)]
pub struct Receipts {
    pub id: u64,
    pub receipts: Vec<Vec<Receipt>>,
}

impl Receipts {
    /// Builds a response by appending per-block receipt lists until `MAX_RESPONSE_BYTES`
    /// would be exceeded, matching the same stop-early behavior as `BlockBodies`.
    pub fn bounded(id: u64, all_receipts: Vec<Vec<Receipt>>) -> Self {
        let mut receipts = Vec::new();
        let mut size = 0usize;
        for block_receipts in all_receipts {
            let mut encoded = Vec::new();
            Encoder::new(&mut encoded)
                .encode_field(&block_receipts)
                .finish()
                .ok();
            size += encoded.len();
            receipts.push(block_receipts);
            if size >= MAX_RESPONSE_BYTES {
                break;
            }
        }
        Self { id, receipts }
    }
}

impl RLPxMessage for Receipts {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.receipts)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (receipts, decoder) = decoder.decode_field("receipts")?;
        decoder.finish_unchecked();
        Ok(Receipts { id, receipts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethlink_common::{Bloom, H256};

    #[test]
    fn get_receipts_roundtrips() {
        let msg = GetReceipts {
            id: 3,
            block_hashes: vec![BlockHash::from([1; 32]), BlockHash::from([2; 32])],
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = GetReceipts::decode(&buf).unwrap();
        assert_eq!(decoded.block_hashes.len(), 2);
    }

    #[test]
    fn receipts_roundtrip() {
        let receipt = Receipt {
            succeeded: true,
            cumulative_gas_used: 21_000,
            bloom: Bloom::zero(),
            logs: Vec::new(),
        };
        let msg = Receipts {
            id: 3,
            receipts: vec![vec![receipt.clone()], vec![receipt]],
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = Receipts::decode(&buf).unwrap();
        assert_eq!(decoded.receipts.len(), 2);
        assert!(decoded.receipts[0][0].succeeded);
    }

    #[test]
    fn bounded_stops_growing_past_the_cap() {
        let receipt = Receipt {
            succeeded: true,
            cumulative_gas_used: 1,
            bloom: Bloom::zero(),
            logs: vec![],
        };
        let all: Vec<Vec<Receipt>> = (0..4).map(|_| vec![receipt.clone()]).collect();
        let bounded = Receipts::bounded(1, all);
        assert!(bounded.receipts.len() <= 4);
        let _ = H256::zero();
    }
}
