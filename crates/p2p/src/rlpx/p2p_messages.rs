use bytes::BufMut;
use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Capability, Decoder, Encoder},
};

use super::message::RLPxMessage;
use super::utils::{pubkey2id, snappy_compress, snappy_decompress};
use ethlink_common::node::NodeId;

pub const RLPX_VERSION: u8 = 5;
pub const CLIENT_ID: &str = "ethlink/0.1.0";

#[derive(Debug, Clone)]
pub struct HelloMessage {
    pub capabilities: Vec<Capability>,
    pub node_id: NodeId,
    pub listen_port: u16,
}

impl HelloMessage {
    pub fn new(capabilities: Vec<Capability>, node_id: NodeId, listen_port: u16) -> Self {
        Self {
            capabilities,
            node_id,
            listen_port,
        }
    }
}

impl RLPxMessage for HelloMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        Encoder::new(buf)
            .encode_field(&RLPX_VERSION)
            .encode_field(&CLIENT_ID)
            .encode_field(&self.capabilities)
            .encode_field(&self.listen_port)
            .encode_field(&self.node_id)
            .finish()
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decoder = Decoder::new(msg_data)?;
        let (_protocol_version, decoder): (u8, _) = decoder.decode_field("protocolVersion")?;
        let (_client_id, decoder): (String, _) = decoder.decode_field("clientId")?;
        let (capabilities, decoder): (Vec<Capability>, _) = decoder.decode_field("capabilities")?;
        let (listen_port, decoder): (u16, _) = decoder.decode_field("listenPort")?;
        let (node_id, decoder): (NodeId, _) = decoder.decode_field("nodeId")?;
        decoder.finish_unchecked();
        Ok(Self::new(capabilities, node_id, listen_port))
    }
}

/// Reasons a side may give for closing the connection, per §4.3's closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    DisconnectRequested = 0x00,
    NetworkError = 0x01,
    ProtocolError = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleVersion = 0x06,
    InvalidIdentity = 0x07,
    ClientQuitting = 0x08,
    UnexpectedIdentity = 0x09,
    SameIdentity = 0x0a,
    Timeout = 0x0b,
    SubprotocolError = 0x10,
}

impl DisconnectReason {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use DisconnectReason::*;
        Some(match byte {
            0x00 => DisconnectRequested,
            0x01 => NetworkError,
            0x02 => ProtocolError,
            0x03 => UselessPeer,
            0x04 => TooManyPeers,
            0x05 => AlreadyConnected,
            0x06 => IncompatibleVersion,
            0x07 => InvalidIdentity,
            0x08 => ClientQuitting,
            0x09 => UnexpectedIdentity,
            0x0a => SameIdentity,
            0x0b => Timeout,
            0x10 => SubprotocolError,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DisconnectMessage {
    pub reason: Option<DisconnectReason>,
}

impl DisconnectMessage {
    pub fn new(reason: Option<DisconnectReason>) -> Self {
        Self { reason }
    }
}

impl RLPxMessage for DisconnectMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        match self.reason {
            Some(reason) => {
                Encoder::new(&mut encoded).encode_field(&(reason as u8)).finish()?;
            }
            None => Vec::<u8>::new().encode(&mut encoded),
        }
        let compressed = snappy_compress(encoded)?;
        buf.put_slice(&compressed);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed = snappy_decompress(msg_data)?;
        let reason = match decompressed.len() {
            0 => None,
            1 => DisconnectReason::from_byte(decompressed[0]),
            _ => {
                let decoder = Decoder::new(&decompressed)?;
                let (reason_byte, _): (Option<u8>, _) = decoder.decode_optional_field();
                reason_byte.and_then(DisconnectReason::from_byte)
            }
        };
        Ok(Self::new(reason))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PingMessage;

impl RLPxMessage for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Vec::<u8>::new().encode(&mut encoded);
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        snappy_decompress(msg_data)?;
        Ok(Self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PongMessage;

impl RLPxMessage for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded = Vec::new();
        Vec::<u8>::new().encode(&mut encoded);
        buf.put_slice(&snappy_compress(encoded)?);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        snappy_decompress(msg_data)?;
        Ok(Self)
    }
}

/// Convenience re-export so call sites needn't import `pubkey2id` directly just to build a
/// `HelloMessage` from a `k256::PublicKey`.
pub fn hello_from_public_key(
    capabilities: Vec<Capability>,
    public_key: &k256::PublicKey,
    listen_port: u16,
) -> HelloMessage {
    HelloMessage::new(capabilities, pubkey2id(public_key), listen_port)
}
