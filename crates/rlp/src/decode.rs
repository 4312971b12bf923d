use bytes::{Bytes, BytesMut};
use ethereum_types::U256;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::constants::{RLP_EMPTY_LIST, RLP_NULL};
use crate::error::RLPDecodeError;

pub trait RLPDecode: Sized {
    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (result, rest) = Self::decode_unfinished(rlp)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(result)
    }

    /// Decodes the value, returning it along with the unconsumed suffix of `rlp`.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            RLP_NULL => false,
            0x01 => true,
            _ => return Err(RLPDecodeError::MalformedData),
        };
        Ok((value, &rlp[1..]))
    }
}

macro_rules! impl_rlp_decode_for_uint {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                if bytes.len() > core::mem::size_of::<$t>() {
                    return Err(RLPDecodeError::MalformedData);
                }
                if !bytes.is_empty() && bytes[0] == 0 {
                    return Err(RLPDecodeError::MalformedData);
                }
                let mut padded = [0u8; core::mem::size_of::<$t>()];
                padded[core::mem::size_of::<$t>() - bytes.len()..].copy_from_slice(bytes);
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        }
    };
}

impl_rlp_decode_for_uint!(u8);
impl_rlp_decode_for_uint!(u16);
impl_rlp_decode_for_uint!(u32);
impl_rlp_decode_for_uint!(u64);
impl_rlp_decode_for_uint!(u128);
impl_rlp_decode_for_uint!(usize);

impl RLPDecode for () {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if first != RLP_NULL {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((), &rlp[1..]))
    }
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let array: [u8; N] = bytes.try_into().map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((array, rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

impl RLPDecode for BytesMut {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((BytesMut::from(bytes), rest))
    }
}

impl RLPDecode for Vec<u8> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((bytes.to_vec(), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((s, rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() > 32 {
            return Err(RLPDecodeError::MalformedData);
        }
        if !bytes.is_empty() && bytes[0] == 0 {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((U256::from_big_endian(bytes), rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (mut payload, rest) = get_list_payload(rlp)?;
        let mut result = Vec::new();
        while !payload.is_empty() {
            let (item, remaining) = T::decode_unfinished(payload)?;
            result.push(item);
            payload = remaining;
        }
        Ok((result, rest))
    }
}

impl<T: RLPDecode> RLPDecode for Option<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&RLP_NULL) {
            return Ok((None, &rlp[1..]));
        }
        let (value, rest) = T::decode_unfinished(rlp)?;
        Ok((Some(value), rest))
    }
}

impl<S: RLPDecode, T: RLPDecode> RLPDecode for (S, T) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = get_list_payload(rlp)?;
        let (first, payload) = S::decode_unfinished(payload)?;
        let (second, payload) = T::decode_unfinished(payload)?;
        if !payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second), rest))
    }
}

impl<S: RLPDecode, T: RLPDecode, U: RLPDecode> RLPDecode for (S, T, U) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = get_list_payload(rlp)?;
        let (first, payload) = S::decode_unfinished(payload)?;
        let (second, payload) = T::decode_unfinished(payload)?;
        let (third, payload) = U::decode_unfinished(payload)?;
        if !payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second, third), rest))
    }
}

impl RLPDecode for Ipv4Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 4] = bytes.try_into().map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((Ipv4Addr::from(octets), rest))
    }
}

impl RLPDecode for Ipv6Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 16] = bytes.try_into().map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((Ipv6Addr::from(octets), rest))
    }
}

impl RLPDecode for IpAddr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        match bytes.len() {
            4 => {
                let octets: [u8; 4] = bytes.try_into().unwrap();
                Ok((IpAddr::V4(Ipv4Addr::from(octets)), rest))
            }
            16 => {
                let octets: [u8; 16] = bytes.try_into().unwrap();
                Ok((IpAddr::V6(Ipv6Addr::from(octets)), rest))
            }
            _ => Err(RLPDecodeError::MalformedData),
        }
    }
}

macro_rules! impl_rlp_decode_for_h {
    ($t:ty) => {
        impl RLPDecode for ethereum_types::$t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                Ok((
                    <ethereum_types::$t>::from_slice(
                        &static_left_pad::<{ <ethereum_types::$t>::len_bytes() }>(bytes)?,
                    ),
                    rest,
                ))
            }
        }
    };
}

impl_rlp_decode_for_h!(H32);
impl_rlp_decode_for_h!(H64);
impl_rlp_decode_for_h!(H128);
impl_rlp_decode_for_h!(Address);
impl_rlp_decode_for_h!(H256);
impl_rlp_decode_for_h!(H264);
impl_rlp_decode_for_h!(H512);

impl RLPDecode for ethereum_types::Signature {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 65 {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((ethereum_types::Signature::from_slice(bytes), rest))
    }
}

impl RLPDecode for ethereum_types::Bloom {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (array, rest) = <[u8; 256]>::decode_unfinished(rlp)?;
        Ok((ethereum_types::Bloom(array), rest))
    }
}

/// Left-pads `bytes` to a fixed-size array, erroring if it doesn't fit.
pub fn static_left_pad<const N: usize>(bytes: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if bytes.len() > N {
        return Err(RLPDecodeError::MalformedData);
    }
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// Returns true if the first byte indicates a string-like (non-list) RLP item.
pub fn is_encoded_as_bytes(rlp: &[u8]) -> Result<bool, RLPDecodeError> {
    let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
    Ok(first < RLP_EMPTY_LIST)
}

/// Decodes a single RLP string item, returning the contained bytes and the remainder of the input.
pub fn decode_bytes(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0..=0x7f => Ok((&rlp[..1], &rlp[1..])),
        0x80..=0xb7 => {
            let len = (first - RLP_NULL) as usize;
            let bytes = rlp.get(1..1 + len).ok_or(RLPDecodeError::InvalidLength)?;
            if len == 1 && bytes[0] < RLP_NULL {
                return Err(RLPDecodeError::MalformedData);
            }
            Ok((bytes, &rlp[1 + len..]))
        }
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let len_bytes = rlp
                .get(1..1 + len_of_len)
                .ok_or(RLPDecodeError::InvalidLengthPrefix)?;
            let len = bytes_to_usize(len_bytes)?;
            if len < 56 {
                return Err(RLPDecodeError::MalformedData);
            }
            let start = 1 + len_of_len;
            let bytes = rlp
                .get(start..start + len)
                .ok_or(RLPDecodeError::InvalidLength)?;
            Ok((bytes, &rlp[start + len..]))
        }
        _ => Err(RLPDecodeError::UnexpectedList),
    }
}

/// Returns the payload of a list item (the encoded elements, without the length prefix)
/// and the remainder of the input after the list.
pub fn get_list_payload(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0xc0..=0xf7 => {
            let len = (first - RLP_EMPTY_LIST) as usize;
            let payload = rlp.get(1..1 + len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((payload, &rlp[1 + len..]))
        }
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            let len_bytes = rlp
                .get(1..1 + len_of_len)
                .ok_or(RLPDecodeError::InvalidLengthPrefix)?;
            let len = bytes_to_usize(len_bytes)?;
            if len < 56 {
                return Err(RLPDecodeError::MalformedData);
            }
            let start = 1 + len_of_len;
            let payload = rlp
                .get(start..start + len)
                .ok_or(RLPDecodeError::InvalidLength)?;
            Ok((payload, &rlp[start + len..]))
        }
        _ => Err(RLPDecodeError::UnexpectedString),
    }
}

fn bytes_to_usize(bytes: &[u8]) -> Result<usize, RLPDecodeError> {
    if bytes.len() > core::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLengthPrefix);
    }
    let mut padded = [0u8; core::mem::size_of::<usize>()];
    padded[core::mem::size_of::<usize>() - bytes.len()..].copy_from_slice(bytes);
    Ok(usize::from_be_bytes(padded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use hex_literal::hex;

    #[test]
    fn decode_bool() {
        assert_eq!(bool::decode(&[0x01]).unwrap(), true);
        assert_eq!(bool::decode(&[RLP_NULL]).unwrap(), false);
    }

    #[test]
    fn decode_u8() {
        assert_eq!(u8::decode(&[RLP_NULL]).unwrap(), 0);
        assert_eq!(u8::decode(&[0x7f]).unwrap(), 0x7f);
        assert_eq!(u8::decode(&[RLP_NULL + 1, 0x90]).unwrap(), 0x90);
    }

    #[test]
    fn decode_string() {
        let rlp = [RLP_NULL + 3, b'd', b'o', b'g'];
        assert_eq!(String::decode(&rlp).unwrap(), "dog");
    }

    #[test]
    fn decode_address() {
        let rlp = hex!("94ef2d6d194084c2de36e0dabfce45d046b37d1106");
        let expected = Address::from(hex!("ef2d6d194084c2de36e0dabfce45d046b37d1106"));
        assert_eq!(Address::decode(&rlp).unwrap(), expected);
    }

    #[test]
    fn decode_u256() {
        let rlp = [0x80 + 1, 128];
        assert_eq!(U256::decode(&rlp).unwrap(), U256::from(128));
    }

    #[test]
    fn decode_list_of_strings() {
        let rlp = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let decoded: Vec<String> = RLPDecode::decode(&rlp).unwrap();
        assert_eq!(decoded, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn decode_tuple() {
        let rlp = [0xc0 + 2, 0x01, 0x02];
        let (a, b): (u8, u8) = RLPDecode::decode(&rlp).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn decode_malformed_length() {
        assert!(u8::decode(&[]).is_err());
    }
}
