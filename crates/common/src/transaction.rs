use bytes::Bytes;
use ethlink_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::{Address, H256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    Call(Address),
    Create,
}

impl RLPEncode for TxKind {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            TxKind::Call(addr) => addr.encode(buf),
            TxKind::Create => Bytes::new().encode(buf),
        }
    }
}

impl RLPDecode for TxKind {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = ethlink_rlp::decode::decode_bytes(rlp)?;
        if bytes.is_empty() {
            Ok((TxKind::Create, rest))
        } else {
            Ok((TxKind::Call(Address::from_slice(bytes)), rest))
        }
    }
}

/// A transaction as it travels the wire and sits in the pool. Only the two gas-pricing
/// schemes actually in use pre/at the Ethash era are modeled: Legacy and EIP-1559.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Legacy(LegacyTransaction),
    Eip1559(Eip1559Transaction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub access_list: Vec<(Address, Vec<H256>)>,
    pub signature_y_parity: bool,
    pub r: U256,
    pub s: U256,
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::Legacy(_) => TxType::Legacy,
            Transaction::Eip1559(_) => TxType::Eip1559,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.nonce,
            Transaction::Eip1559(tx) => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.gas_limit,
            Transaction::Eip1559(tx) => tx.gas_limit,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Transaction::Legacy(tx) => tx.value,
            Transaction::Eip1559(tx) => tx.value,
        }
    }

    /// The max total a sender could pay per unit of gas for this tx.
    pub fn max_fee_per_gas(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.gas_price,
            Transaction::Eip1559(tx) => tx.max_fee_per_gas,
        }
    }

    /// The priority fee ("tip") paid to the block producer per unit of gas.
    pub fn max_priority_fee_per_gas(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.gas_price,
            Transaction::Eip1559(tx) => tx.max_priority_fee_per_gas,
        }
    }

    /// The tip actually paid given a block's base fee: `min(priority_fee, max_fee - base_fee)`.
    pub fn effective_tip(&self, base_fee_per_gas: u64) -> u64 {
        let max_fee = self.max_fee_per_gas();
        if max_fee < base_fee_per_gas {
            return 0;
        }
        self.max_priority_fee_per_gas()
            .min(max_fee - base_fee_per_gas)
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Transaction::Legacy(tx) => &tx.data,
            Transaction::Eip1559(tx) => &tx.data,
        }
    }

    /// RLP encoding used both for hashing and for signature recovery (the signature itself
    /// is excluded from the preimage for EIP-1559, included for Legacy per EIP-155).
    fn signing_preimage(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Transaction::Legacy(tx) => {
                Encoder::new(&mut buf)
                    .encode_field(&tx.nonce)
                    .encode_field(&tx.gas_price)
                    .encode_field(&tx.gas_limit)
                    .encode_field(&tx.to)
                    .encode_field(&tx.value)
                    .encode_field(&tx.data)
                    .finish()
                    .ok();
            }
            Transaction::Eip1559(tx) => {
                buf.push(0x02);
                Encoder::new(&mut buf)
                    .encode_field(&tx.chain_id)
                    .encode_field(&tx.nonce)
                    .encode_field(&tx.max_priority_fee_per_gas)
                    .encode_field(&tx.max_fee_per_gas)
                    .encode_field(&tx.gas_limit)
                    .encode_field(&tx.to)
                    .encode_field(&tx.value)
                    .encode_field(&tx.data)
                    .finish()
                    .ok();
            }
        }
        buf
    }

    pub fn compute_hash(&self) -> H256 {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        H256(Keccak256::digest(&buf).into())
    }

    /// Recovers the sender address from the ECDSA signature. This is the only place this
    /// crate touches `k256` directly outside the handshake layer.
    pub fn recover_sender(&self) -> Result<Address, TransactionError> {
        let preimage = self.signing_preimage();
        let digest = Keccak256::digest(&preimage);
        let (sig, recovery_id) = self.ecdsa_signature()?;
        let verifying_key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
            .map_err(|_| TransactionError::InvalidSignature)?;
        let encoded = k256::elliptic_curve::sec1::ToEncodedPoint::to_encoded_point(
            &k256::PublicKey::from(verifying_key),
            false,
        );
        let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
        Ok(Address::from_slice(&hash[12..]))
    }

    fn ecdsa_signature(&self) -> Result<(EcdsaSignature, RecoveryId), TransactionError> {
        let (r, s, parity) = match self {
            Transaction::Legacy(tx) => {
                let parity = if tx.v >= U256::from(35) {
                    ((tx.v - U256::from(35)) % 2) == U256::from(1)
                } else {
                    tx.v == U256::from(28)
                };
                (tx.r, tx.s, parity)
            }
            Transaction::Eip1559(tx) => (tx.r, tx.s, tx.signature_y_parity),
        };
        let mut bytes = [0u8; 64];
        r.to_big_endian(&mut bytes[..32]);
        s.to_big_endian(&mut bytes[32..]);
        let sig = EcdsaSignature::from_slice(&bytes).map_err(|_| TransactionError::InvalidSignature)?;
        let recovery_id = RecoveryId::from_byte(parity as u8).ok_or(TransactionError::InvalidSignature)?;
        Ok((sig, recovery_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("malformed or unrecoverable transaction signature")]
    InvalidSignature,
}

impl RLPEncode for Transaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Transaction::Legacy(tx) => {
                Encoder::new(buf)
                    .encode_field(&tx.nonce)
                    .encode_field(&tx.gas_price)
                    .encode_field(&tx.gas_limit)
                    .encode_field(&tx.to)
                    .encode_field(&tx.value)
                    .encode_field(&tx.data)
                    .encode_field(&tx.v)
                    .encode_field(&tx.r)
                    .encode_field(&tx.s)
                    .finish()
                    .ok();
            }
            Transaction::Eip1559(tx) => {
                let mut payload = Vec::new();
                Encoder::new(&mut payload)
                    .encode_field(&tx.chain_id)
                    .encode_field(&tx.nonce)
                    .encode_field(&tx.max_priority_fee_per_gas)
                    .encode_field(&tx.max_fee_per_gas)
                    .encode_field(&tx.gas_limit)
                    .encode_field(&tx.to)
                    .encode_field(&tx.value)
                    .encode_field(&tx.data)
                    .encode_field(&tx.access_list)
                    .encode_field(&tx.signature_y_parity)
                    .encode_field(&tx.r)
                    .encode_field(&tx.s)
                    .finish()
                    .ok();
                // EIP-2718 typed transaction: type byte followed by the payload, itself
                // treated as an opaque byte string at the RLP-list level it's embedded in.
                let mut typed = vec![0x02u8];
                typed.extend_from_slice(&payload);
                Bytes::from(typed).encode(buf);
            }
        }
    }
}

impl RLPDecode for Transaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if let Some(&first_byte) = rlp.first() {
            if first_byte == 0x02 {
                let (bytes, rest) = ethlink_rlp::decode::decode_bytes(rlp)?;
                let payload = &bytes[1..];
                let decoder = Decoder::new(payload)?;
                let (chain_id, decoder) = decoder.decode_field("chain_id")?;
                let (nonce, decoder) = decoder.decode_field("nonce")?;
                let (max_priority_fee_per_gas, decoder) =
                    decoder.decode_field("max_priority_fee_per_gas")?;
                let (max_fee_per_gas, decoder) = decoder.decode_field("max_fee_per_gas")?;
                let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
                let (to, decoder) = decoder.decode_field("to")?;
                let (value, decoder) = decoder.decode_field("value")?;
                let (data, decoder) = decoder.decode_field("data")?;
                let (access_list, decoder) = decoder.decode_field("access_list")?;
                let (signature_y_parity, decoder) = decoder.decode_field("y_parity")?;
                let (r, decoder) = decoder.decode_field("r")?;
                let (s, decoder) = decoder.decode_field("s")?;
                decoder.finish_unchecked();
                return Ok((
                    Transaction::Eip1559(Eip1559Transaction {
                        chain_id,
                        nonce,
                        max_priority_fee_per_gas,
                        max_fee_per_gas,
                        gas_limit,
                        to,
                        value,
                        data,
                        access_list,
                        signature_y_parity,
                        r,
                        s,
                    }),
                    rest,
                ));
            }
        }
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (gas_price, decoder) = decoder.decode_field("gas_price")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (v, decoder) = decoder.decode_field("v")?;
        let (r, decoder) = decoder.decode_field("r")?;
        let (s, decoder) = decoder.decode_field("s")?;
        let remaining = decoder.finish_unchecked();
        Ok((
            Transaction::Legacy(LegacyTransaction {
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                data,
                v,
                r,
                s,
            }),
            remaining,
        ))
    }
}
