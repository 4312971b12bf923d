use bytes::BufMut;
use ethlink_common::fork::ForkId;
use ethlink_common::{BlockHash, U256};
use ethlink_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::message::RLPxMessage;
use crate::rlpx::utils::{snappy_compress, snappy_decompress};

/// The `eth` protocol version this implementation speaks. Peers offering a different
/// version in HELLO's capability list are simply not negotiated onto this sub-protocol.
pub const ETH_VERSION: u32 = 68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub eth_version: u32,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub block_hash: BlockHash,
    pub genesis: BlockHash,
    pub fork_id: ForkId,
}

impl RLPxMessage for StatusMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Encoder::new(&mut encoded)
            .encode_field(&self.eth_version)
            .encode_field(&self.network_id)
            .encode_field(&self.total_difficulty)
            .encode_field(&self.block_hash)
            .encode_field(&self.genesis)
            .encode_field(&self.fork_id)
            .finish()?;
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed)?;
        let (eth_version, decoder) = decoder.decode_field("protocolVersion")?;
        let (network_id, decoder) = decoder.decode_field("networkId")?;
        let (total_difficulty, decoder) = decoder.decode_field("totalDifficulty")?;
        let (block_hash, decoder) = decoder.decode_field("blockHash")?;
        let (genesis, decoder) = decoder.decode_field("genesis")?;
        let (fork_id, decoder) = decoder.decode_field("forkId")?;
        decoder.finish_unchecked();
        Ok(StatusMessage {
            eth_version,
            network_id,
            total_difficulty,
            block_hash,
            genesis,
            fork_id,
        })
    }
}
