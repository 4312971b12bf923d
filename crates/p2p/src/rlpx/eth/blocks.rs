use bytes::BufMut;
use ethlink_common::block::{BlockBody, BlockHeader};
use ethlink_common::{BlockHash, BlockNumber};
use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::message::RLPxMessage;
use crate::rlpx::utils::{snappy_compress, snappy_decompress};

/// A BlockHeaders response never carries more than this many headers, per §4.5's limits.
pub const MAX_HEADERS_PER_REQUEST: u64 = 100;

const HASH_FIRST_BYTE: u8 = 0xa0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(BlockHash),
    Number(BlockNumber),
}

impl RLPEncode for HashOrNumber {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            HashOrNumber::Hash(hash) => hash.encode(buf),
            HashOrNumber::Number(number) => number.encode(buf),
        }
    }
}

impl RLPDecode for HashOrNumber {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if *first_byte == HASH_FIRST_BYTE {
            let (hash, rest) = BlockHash::decode_unfinished(rlp)?;
            return Ok((Self::Hash(hash), rest));
        }
        let (number, rest) = u64::decode_unfinished(rlp)?;
        Ok((Self::Number(number), rest))
    }
}

#[derive(Debug, Clone)]
pub struct GetBlockHeaders {
    pub id: u64,
    pub start_block: HashOrNumber,
    pub limit: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl RLPxMessage for GetBlockHeaders {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.start_block)
            .encode_field(&self.limit)
            .encode_field(&self.skip)
            .encode_field(&self.reverse)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (start_block, decoder) = decoder.decode_field("startBlock")?;
        let (limit, decoder) = decoder.decode_field("limit")?;
        let (skip, decoder) = decoder.decode_field("skip")?;
        let (reverse, decoder) = decoder.decode_field("reverse")?;
        decoder.finish_unchecked();
        Ok(GetBlockHeaders {
            id,
            start_block,
            limit,
            skip,
            reverse,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BlockHeaders {
    pub id: u64,
    pub headers: Vec<BlockHeader>,
}

impl BlockHeaders {
    /// Enforces the reply's `MAX_HEADERS_PER_REQUEST` cap; callers building a response from
    /// a `Chain` lookup shouldn't need to remember the limit at every call site.
    pub fn new(id: u64, mut headers: Vec<BlockHeader>) -> Self {
        headers.truncate(MAX_HEADERS_PER_REQUEST as usize);
        Self { id, headers }
    }
}

impl RLPxMessage for BlockHeaders {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.headers)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (headers, decoder) = decoder.decode_field("headers")?;
        decoder.finish_unchecked();
        Ok(BlockHeaders { id, headers })
    }
}

#[derive(Debug, Clone)]
pub struct GetBlockBodies {
    pub id: u64,
    pub block_hashes: Vec<BlockHash>,
}

impl RLPxMessage for GetBlockBodies {
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
        Ok(GetBlockBodies { id, block_hashes })
    }
}

#[derive(Debug, Clone)]
pub struct BlockBodies {
    pub id: u64,
    pub bodies: Vec<BlockBody>,
}

impl RLPxMessage for BlockBodies {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.id)
            .encode_field(&self.bodies)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (id, decoder) = decoder.decode_field("reqId")?;
        let (bodies, decoder) = decoder.decode_field("bodies")?;
        decoder.finish_unchecked();
        Ok(BlockBodies { id, bodies })
    }
}

#[derive(Debug, Clone)]
pub struct NewBlockHashEntry {
    pub hash: BlockHash,
    pub number: BlockNumber,
}

impl RLPEncode for NewBlockHashEntry {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.hash)
            .encode_field(&self.number)
            .finish()
            .ok();
    }
}

impl RLPDecode for NewBlockHashEntry {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (hash, decoder) = decoder.decode_field("hash")?;
        let (number, decoder) = decoder.decode_field("number")?;
        let remaining = decoder.finish_unchecked();
        Ok((NewBlockHashEntry { hash, number }, remaining))
    }
}

#[derive(Debug, Clone)]
pub struct NewBlockHashes {
    pub entries: Vec<NewBlockHashEntry>,
}

impl RLPxMessage for NewBlockHashes {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.entries)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (entries, decoder) = decoder.decode_field("entries")?;
        decoder.finish_unchecked();
        Ok(NewBlockHashes { entries })
    }
}

#[derive(Debug, Clone)]
pub struct NewBlock {
    pub header: BlockHeader,
    pub body: BlockBody,
    pub total_difficulty: ethlink_common::U256,
}

impl RLPxMessage for NewBlock {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.header)
            .encode_field(&self.body)
            .encode_field(&self.total_difficulty)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (header, decoder) = decoder.decode_field("header")?;
        let (body, decoder) = decoder.decode_field("body")?;
        let (total_difficulty, decoder) = decoder.decode_field("totalDifficulty")?;
        decoder.finish_unchecked();
        Ok(NewBlock {
            header,
            body,
            total_difficulty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_block_headers_by_number_roundtrips() {
        let msg = GetBlockHeaders {
            id: 7,
            start_block: HashOrNumber::Number(42),
            limit: 10,
            skip: 0,
            reverse: false,
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = GetBlockHeaders::decode(&buf).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.start_block, HashOrNumber::Number(42));
    }

    #[test]
    fn get_block_headers_by_hash_roundtrips() {
        let msg = GetBlockHeaders {
            id: 1,
            start_block: HashOrNumber::Hash(BlockHash::from([9; 32])),
            limit: 1,
            skip: 0,
            reverse: true,
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = GetBlockHeaders::decode(&buf).unwrap();
        assert_eq!(decoded.start_block, HashOrNumber::Hash(BlockHash::from([9; 32])));
        assert!(decoded.reverse);
    }

    #[test]
    fn block_headers_response_is_capped() {
        let header = sample_header();
        let headers: Vec<_> = std::iter::repeat(header).take(200).collect();
        let msg = BlockHeaders::new(1, headers);
        assert_eq!(msg.headers.len(), MAX_HEADERS_PER_REQUEST as usize);
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            parent_hash: Default::default(),
            ommers_hash: Default::default(),
            coinbase: Default::default(),
            state_root: Default::default(),
            transactions_root: Default::default(),
            receipts_root: Default::default(),
            logs_bloom: Default::default(),
            difficulty: Default::default(),
            number: 1,
            gas_limit: 30_000_000,
            gas_used: 0,
            timestamp: 0,
            extra_data: Default::default(),
            mix_hash: Default::default(),
            nonce: 0,
            base_fee_per_gas: None,
        }
    }
}
