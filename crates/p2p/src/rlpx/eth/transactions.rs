use bytes::BufMut;
use ethlink_common::transaction::Transaction;
use ethlink_common::H256;
use ethlink_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::message::RLPxMessage;
use crate::rlpx::utils::{snappy_compress, snappy_decompress};

/// `NewPooledTransactionHashes` never announces more entries than this in one message,
/// per §4.7's gossip batching limit.
pub const MAX_ANNOUNCED_HASHES: usize = 4096;

#[derive(Debug, Clone)]
pub struct Transactions {
    pub transactions: Vec<Transaction>,
}

impl RLPxMessage for Transactions {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.transactions)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (transactions, decoder) = decoder.decode_field("transactions")?;
        decoder.finish_unchecked();
        Ok(Transactions { transactions })
    }
}

#[derive(Debug, Clone)]
pub struct GetPooledTransactions {
    pub id: u64,
    pub transaction_hashes: Vec<H256>,
}

impl RLPxMessage for GetPooledTransactions {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.transaction_hashes)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (transaction_hashes, decoder) = decoder.decode_field("hashes")?;
        decoder.finish_unchecked();
        Ok(GetPooledTransactions {
            id,
            transaction_hashes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PooledTransactions {
    pub id: u64,
    pub transactions: Vec<Transaction>,
}

impl RLPxMessage for PooledTransactions {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.transactions)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (transactions, decoder) = decoder.decode_field("transactions")?;
        decoder.finish_unchecked();
        Ok(PooledTransactions { id, transactions })
    }
}

#[derive(Debug, Clone)]
pub struct NewPooledTransactionHashes {
    pub types: Vec<u8>,
    pub sizes: Vec<u64>,
    pub hashes: Vec<H256>,
}

impl NewPooledTransactionHashes {
    /// Builds an announcement, silently dropping entries past `MAX_ANNOUNCED_HASHES` — the
    /// fetcher on the other end will simply learn about the rest on the next announcement.
    pub fn new(mut entries: Vec<(u8, u64, H256)>) -> Self {
        entries.truncate(MAX_ANNOUNCED_HASHES);
        let mut types = Vec::with_capacity(entries.len());
        let mut sizes = Vec::with_capacity(entries.len());
        let mut hashes = Vec::with_capacity(entries.len());
        for (ty, size, hash) in entries {
            types.push(ty);
            sizes.push(size);
            hashes.push(hash);
        }
        Self {
            types,
            sizes,
            hashes,
        }
    }
}

impl RLPxMessage for NewPooledTransactionHashes {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.types)
            .encode_field(&self.sizes)
            .encode_field(&self.hashes)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (types, decoder) = decoder.decode_field("types")?;
        let (sizes, decoder) = decoder.decode_field("sizes")?;
        let (hashes, decoder) = decoder.decode_field("hashes")?;
        decoder.finish_unchecked();
        Ok(NewPooledTransactionHashes {
            types,
            sizes,
            hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_pooled_transactions_roundtrips() {
        let msg = GetPooledTransactions {
            id: 4,
            transaction_hashes: vec![H256::from([7; 32])],
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = GetPooledTransactions::decode(&buf).unwrap();
        assert_eq!(decoded.transaction_hashes, msg.transaction_hashes);
    }

    #[test]
    fn new_pooled_transaction_hashes_caps_batch_size() {
        let entries: Vec<_> = (0..5000u64)
            .map(|i| (0u8, i, H256::from_low_u64_be(i)))
            .collect();
        let announcement = NewPooledTransactionHashes::new(entries);
        assert_eq!(announcement.hashes.len(), MAX_ANNOUNCED_HASHES);
        assert_eq!(announcement.types.len(), MAX_ANNOUNCED_HASHES);
    }

    #[test]
    fn new_pooled_transaction_hashes_roundtrips() {
        let announcement = NewPooledTransactionHashes::new(vec![(0, 100, H256::from([1; 32]))]);
        let mut buf = Vec::new();
        announcement.encode(&mut buf).unwrap();
        let decoded = NewPooledTransactionHashes::decode(&buf).unwrap();
        assert_eq!(decoded.hashes, announcement.hashes);
    }
}
