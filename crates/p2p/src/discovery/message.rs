use bytes::{Bytes, BytesMut};
use ethlink_common::node::{Endpoint, NodeId, NodeRecord};
use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

/// UDP discovery opcodes. The high nibble is reserved for this implementation; ENR
/// request/response (0x05/0x06) are accepted but answered with `NodeRecord::default()`
/// since this node tracks no ENR payload of its own beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ping = 0x01,
    Pong = 0x02,
    FindNode = 0x03,
    Neighbours = 0x04,
    EnrRequest = 0x05,
    EnrResponse = 0x06,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::FindNode),
            0x04 => Some(Self::Neighbours),
            0x05 => Some(Self::EnrRequest),
            0x06 => Some(Self::EnrResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    Neighbours(NeighboursMessage),
    EnrRequest(EnrRequestMessage),
    EnrResponse(EnrResponseMessage),
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::Ping(_) => PacketType::Ping,
            Message::Pong(_) => PacketType::Pong,
            Message::FindNode(_) => PacketType::FindNode,
            Message::Neighbours(_) => PacketType::Neighbours,
            Message::EnrRequest(_) => PacketType::EnrRequest,
            Message::EnrResponse(_) => PacketType::EnrResponse,
        }
    }

    fn encode_payload(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Message::Ping(msg) => msg.encode(buf),
            Message::Pong(msg) => msg.encode(buf),
            Message::FindNode(msg) => msg.encode(buf),
            Message::Neighbours(msg) => msg.encode(buf),
            Message::EnrRequest(msg) => msg.encode(buf),
            Message::EnrResponse(msg) => msg.encode(buf),
        }
    }

    fn decode_payload(packet_type: PacketType, payload: &[u8]) -> Result<Self, RLPDecodeError> {
        Ok(match packet_type {
            PacketType::Ping => Message::Ping(PingMessage::decode(payload)?),
            PacketType::Pong => Message::Pong(PongMessage::decode(payload)?),
            PacketType::FindNode => Message::FindNode(FindNodeMessage::decode(payload)?),
            PacketType::Neighbours => Message::Neighbours(NeighboursMessage::decode(payload)?),
            PacketType::EnrRequest => Message::EnrRequest(EnrRequestMessage::decode(payload)?),
            PacketType::EnrResponse => Message::EnrResponse(EnrResponseMessage::decode(payload)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub version: u8,
    pub from: Endpoint,
    pub to: Endpoint,
    pub expiration: u64,
    pub enr_seq: Option<u64>,
}

impl RLPEncode for PingMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.version)
            .encode_field(&self.from)
            .encode_field(&self.to)
            .encode_field(&self.expiration)
            .encode_optional_field(&self.enr_seq)
            .finish()
            .ok();
    }
}

impl RLPDecode for PingMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (version, decoder) = decoder.decode_field("version")?;
        let (from, decoder) = decoder.decode_field("from")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (enr_seq, decoder) = decoder.decode_optional_field();
        let remaining = decoder.finish_unchecked();
        Ok((
            PingMessage {
                version,
                from,
                to,
                expiration,
                enr_seq,
            },
            remaining,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    pub to: Endpoint,
    pub ping_hash: ethlink_common::H256,
    pub expiration: u64,
    pub enr_seq: Option<u64>,
}

impl RLPEncode for PongMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.to)
            .encode_field(&self.ping_hash)
            .encode_field(&self.expiration)
            .encode_optional_field(&self.enr_seq)
            .finish()
            .ok();
    }
}

impl RLPDecode for PongMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (ping_hash, decoder) = decoder.decode_field("ping_hash")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (enr_seq, decoder) = decoder.decode_optional_field();
        let remaining = decoder.finish_unchecked();
        Ok((
            PongMessage {
                to,
                ping_hash,
                expiration,
                enr_seq,
            },
            remaining,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNodeMessage {
    pub target: NodeId,
    pub expiration: u64,
}

impl RLPEncode for FindNodeMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.target)
            .encode_field(&self.expiration)
            .finish()
            .ok();
    }
}

impl RLPDecode for FindNodeMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (target, decoder) = decoder.decode_field("target")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let remaining = decoder.finish_unchecked();
        Ok((
            FindNodeMessage {
                target,
                expiration,
            },
            remaining,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighboursMessage {
    pub nodes: Vec<ethlink_common::node::Node>,
    pub expiration: u64,
}

impl RLPEncode for NeighboursMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nodes)
            .encode_field(&self.expiration)
            .finish()
            .ok();
    }
}

impl RLPDecode for NeighboursMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nodes, decoder) = decoder.decode_field("nodes")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let remaining = decoder.finish_unchecked();
        Ok((NeighboursMessage { nodes, expiration }, remaining))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrRequestMessage {
    pub expiration: u64,
}

impl RLPEncode for EnrRequestMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.expiration)
            .finish()
            .ok();
    }
}

impl RLPDecode for EnrRequestMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let remaining = decoder.finish_unchecked();
        Ok((EnrRequestMessage { expiration }, remaining))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrResponseMessage {
    pub request_hash: ethlink_common::H256,
    pub record: NodeRecord,
}

impl RLPEncode for EnrResponseMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.request_hash)
            .encode_field(&self.record)
            .finish()
            .ok();
    }
}

impl RLPDecode for EnrResponseMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (request_hash, decoder) = decoder.decode_field("request_hash")?;
        let (record, decoder) = decoder.decode_field("record")?;
        let remaining = decoder.finish_unchecked();
        Ok((
            EnrResponseMessage {
                request_hash,
                record,
            },
            remaining,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketDecodeError {
    #[error("packet shorter than the 98-byte hash+signature+type header")]
    TooShort,
    #[error("packet hash does not match signature || type || payload")]
    HashMismatch,
    #[error("packet signature does not recover to a valid public key")]
    BadSignature,
    #[error("malformed rlp payload: {0}")]
    Rlp(#[from] RLPDecodeError),
    #[error("unknown packet type byte {0:#x}")]
    UnknownType(u8),
}

/// A signed discovery packet: `hash(32) || signature(65) || packet-type(1) || rlp-payload`,
/// where `hash = keccak256(signature || packet-type || rlp-payload)`.
pub struct Packet;

impl Packet {
    pub fn encode(signing_key: &SigningKey, message: &Message) -> Bytes {
        let mut payload = BytesMut::new();
        message.encode_payload(&mut payload);

        let mut signed_data = BytesMut::with_capacity(1 + payload.len());
        signed_data.extend_from_slice(&[message.packet_type() as u8]);
        signed_data.extend_from_slice(&payload);

        let digest = Keccak256::digest(&signed_data);
        let (signature, recovery_id): (Signature, RecoveryId) = signing_key
            .sign_prehash_recoverable(&digest)
            .expect("ecdsa signing over a 32-byte prehash cannot fail");

        let mut signature_bytes = [0u8; 65];
        signature_bytes[..64].copy_from_slice(&signature.to_bytes());
        signature_bytes[64] = recovery_id.to_byte();

        let mut out = BytesMut::with_capacity(32 + 65 + signed_data.len());
        let hash = Keccak256::digest([&signature_bytes[..], &signed_data].concat());
        out.extend_from_slice(&hash);
        out.extend_from_slice(&signature_bytes);
        out.extend_from_slice(&signed_data);
        out.freeze()
    }

    /// Verifies hash and signature, recovers the sender's [`NodeId`], and decodes the payload.
    pub fn decode(data: &[u8]) -> Result<(NodeId, Message), PacketDecodeError> {
        if data.len() < 32 + 65 + 1 {
            return Err(PacketDecodeError::TooShort);
        }
        let (hash, rest) = data.split_at(32);
        let (signature_bytes, rest) = rest.split_at(65);
        let expected_hash = Keccak256::digest([signature_bytes, rest].concat());
        if hash != expected_hash.as_slice() {
            return Err(PacketDecodeError::HashMismatch);
        }

        let packet_type_byte = rest[0];
        let payload = &rest[1..];
        let packet_type =
            PacketType::from_byte(packet_type_byte).ok_or(PacketDecodeError::UnknownType(packet_type_byte))?;

        let digest = Keccak256::digest(rest);
        let signature = Signature::from_slice(&signature_bytes[..64])
            .map_err(|_| PacketDecodeError::BadSignature)?;
        let recovery_id =
            RecoveryId::from_byte(signature_bytes[64]).ok_or(PacketDecodeError::BadSignature)?;
        let verifying_key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
            .map_err(|_| PacketDecodeError::BadSignature)?;
        let node_id = ethlink_common::signer::node_id_from_verifying_key(&verifying_key);

        let message = Message::decode_payload(packet_type, payload)?;
        Ok((node_id, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use std::net::{IpAddr, Ipv4Addr};

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: port,
            tcp_port: port,
        }
    }

    #[test]
    fn ping_roundtrips_through_a_signed_packet() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let msg = Message::Ping(PingMessage {
            version: 4,
            from: endpoint(30303),
            to: endpoint(30304),
            expiration: 1_700_000_000,
            enr_seq: None,
        });
        let packet = Packet::encode(&key, &msg);
        let (node_id, decoded) = Packet::decode(&packet).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(
            node_id,
            ethlink_common::signer::node_id_from_signing_key(&key)
        );
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let msg = Message::FindNode(FindNodeMessage {
            target: NodeId::zero(),
            expiration: 1_700_000_000,
        });
        let mut packet = Packet::encode(&key, &msg).to_vec();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        assert!(matches!(
            Packet::decode(&packet),
            Err(PacketDecodeError::HashMismatch)
        ));
    }
}
