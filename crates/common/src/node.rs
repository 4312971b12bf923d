use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use bytes::{BufMut, Bytes};
use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use thiserror::Error;

use crate::H512;

/// A node's identity: the uncompressed secp256k1 public key, no `0x04` prefix.
/// Derived once from the node's private key and immutable for the process lifetime.
pub type NodeId = H512;

/// `(ip, udp discovery port, tcp RLPx port)`. The two ports are usually equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Endpoint {
    pub fn tcp_address(&self) -> Option<SocketAddr> {
        (self.tcp_port != 0).then_some(SocketAddr::new(self.ip, self.tcp_port))
    }

    pub fn udp_address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

impl RLPEncode for Endpoint {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .finish()
            .ok();
    }
}

impl RLPDecode for Endpoint {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let remaining = decoder.finish()?;
        Ok((
            Endpoint {
                ip,
                udp_port,
                tcp_port,
            },
            remaining,
        ))
    }
}

/// A candidate peer, as known to the routing table: identity plus advertised endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub node_id: NodeId,
}

impl Node {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            ip: self.ip,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
        }
    }

    pub fn enode_url(&self) -> String {
        format!(
            "enode://{}@{}:{}",
            hex::encode(self.node_id.as_bytes()),
            self.ip,
            self.tcp_port
        )
    }
}

impl RLPEncode for Node {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .encode_field(&self.node_id)
            .finish()
            .ok();
    }
}

impl RLPDecode for Node {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let (node_id, decoder) = decoder.decode_field("node_id")?;
        let remaining = decoder.finish_unchecked();
        Ok((
            Node {
                ip,
                udp_port,
                tcp_port,
                node_id,
            },
            remaining,
        ))
    }
}

/// An [ENR record](https://github.com/ethereum/devp2p/blob/master/enr.md), as returned by
/// ENRResponse. Only `seq` and the raw key/value pairs are kept; the discovery layer only
/// needs the record to confirm a peer's identity, not its full contents.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct NodeRecord {
    pub signature: Bytes,
    pub seq: u64,
    pub pairs: Vec<(Bytes, Bytes)>,
}

impl RLPEncode for NodeRecord {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut encoder = Encoder::new(buf)
            .encode_field(&self.signature)
            .encode_field(&self.seq);
        for (key, value) in &self.pairs {
            encoder = encoder.encode_field(key).encode_field(value);
        }
        encoder.finish().ok();
    }
}

impl RLPDecode for NodeRecord {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (signature, decoder) = decoder.decode_field("signature")?;
        let (seq, mut decoder) = decoder.decode_field("seq")?;
        let mut pairs = Vec::new();
        while decoder.get_encoded_item().is_ok() {
            let (key, next): (Bytes, _) = decoder.decode_field("key")?;
            let (value, next): (Bytes, _) = next.decode_field("value")?;
            pairs.push((key, value));
            decoder = next;
        }
        let remaining = decoder.finish_unchecked();
        Ok((
            NodeRecord {
                signature,
                seq,
                pairs,
            },
            remaining,
        ))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootNodeParseError {
    #[error("enode URL must start with \"enode://\"")]
    MissingScheme,
    #[error("malformed node id in enode URL")]
    BadNodeId,
    #[error("malformed address in enode URL")]
    BadAddress,
}

/// A bootnode configured on the command line, parsed from its `enode://` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootNode {
    pub node_id: NodeId,
    pub socket_address: SocketAddr,
}

impl FromStr for BootNode {
    type Err = BootNodeParseError;

    fn from_str(input: &str) -> Result<BootNode, BootNodeParseError> {
        let rest = input
            .strip_prefix("enode://")
            .ok_or(BootNodeParseError::MissingScheme)?;
        let (id_hex, addr) = rest.split_once('@').ok_or(BootNodeParseError::BadNodeId)?;
        let node_id = NodeId::from_str(id_hex).map_err(|_| BootNodeParseError::BadNodeId)?;
        let socket_address: SocketAddr = addr
            .split('?')
            .next()
            .unwrap_or(addr)
            .parse()
            .map_err(|_| BootNodeParseError::BadAddress)?;
        Ok(BootNode {
            node_id,
            socket_address,
        })
    }
}

impl fmt::Display for BootNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enode://{}@{}",
            hex::encode(self.node_id.as_bytes()),
            self.socket_address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bootnode_from_string() {
        let input = "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@18.138.108.67:30303";
        let bootnode = BootNode::from_str(input).unwrap();
        assert_eq!(bootnode.socket_address.port(), 30303);
        assert_eq!(bootnode.to_string(), input);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(
            BootNode::from_str("18.138.108.67:30303"),
            Err(BootNodeParseError::MissingScheme)
        );
    }
}
