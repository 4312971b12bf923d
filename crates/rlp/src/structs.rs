use bytes::BufMut;

use crate::decode::{get_list_payload, RLPDecode};
use crate::encode::{encode_length, RLPEncode};
use crate::error::{RLPDecodeError, RLPEncodeError};

/// Cursor over the payload of an RLP list, used to decode its elements field by field.
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(rlp: &'a [u8]) -> Result<Self, RLPDecodeError> {
        let (payload, remaining) = get_list_payload(rlp)?;
        Ok(Self { payload, remaining })
    }

    /// Decodes the next field, returning it along with a decoder for what's left of the list.
    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (value, payload) = T::decode_unfinished(self.payload)
            .map_err(|err| field_decode_error::<T>(name, err))?;
        Ok((
            value,
            Self {
                payload,
                remaining: self.remaining,
            },
        ))
    }

    /// Decodes the next field as optional: if decoding fails, returns `None` and leaves the
    /// decoder untouched, since there's no reliable way to tell "absent" from "malformed" here.
    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        match T::decode_unfinished(self.payload) {
            Ok((value, payload)) => (
                Some(value),
                Self {
                    payload,
                    remaining: self.remaining,
                },
            ),
            Err(_) => (None, self),
        }
    }

    /// Returns the still-undecoded remainder of the current field's payload, without
    /// consuming it from the list.
    pub fn get_encoded_item(&self) -> Result<&'a [u8], RLPDecodeError> {
        if self.payload.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(self.payload)
    }

    /// Finishes decoding, erroring if the list payload was not fully consumed.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if !self.payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(self.remaining)
    }

    /// Finishes decoding, silently discarding any unconsumed payload.
    ///
    /// Per devp2p, implementations must ignore additional list elements they don't recognize,
    /// so this is the right call at the end of decoding forward-compatible messages like Hello.
    pub fn finish_unchecked(self) -> &'a [u8] {
        self.remaining
    }
}

/// Builder for encoding a sequence of fields as an RLP list.
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    pub fn encode_optional_field<T: RLPEncode>(mut self, opt_value: &Option<T>) -> Self {
        match opt_value {
            Some(value) => value.encode(&mut self.temp_buf),
            None => self.temp_buf.put_u8(crate::constants::RLP_NULL),
        }
        self
    }

    /// Encodes a list of pre-encoded key/value byte pairs, used for ENR-style records where
    /// each entry is already RLP-encoded bytes rather than a typed value.
    pub fn encode_key_value_list<T: RLPEncode>(mut self, list: &[(T, T)]) -> Self {
        let mut total_len = 0;
        for (k, v) in list {
            total_len += k.length() + v.length();
        }
        encode_length(total_len, &mut self.temp_buf);
        for (k, v) in list {
            k.encode(&mut self.temp_buf);
            v.encode(&mut self.temp_buf);
        }
        self
    }

    pub fn finish(self) -> Result<(), RLPEncodeError> {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
        Ok(())
    }
}

fn field_decode_error<T>(field_name: &str, err: RLPDecodeError) -> RLPDecodeError {
    let type_name = core::any::type_name::<T>();
    RLPDecodeError::Field(field_name.to_string(), type_name, Box::new(err))
}

/// A devp2p subprotocol capability name and version, as carried in the Hello message's
/// capabilities list, e.g. `("eth", 68)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    pub protocol: String,
    pub version: u8,
}

impl Capability {
    pub fn new(protocol: impl Into<String>, version: u8) -> Self {
        Self {
            protocol: protocol.into(),
            version,
        }
    }

    pub fn is_eth(&self) -> bool {
        self.protocol == "eth"
    }
}

impl RLPEncode for Capability {
    fn encode(&self, buf: &mut dyn BufMut) {
        (self.protocol.as_str(), self.version).encode(buf)
    }
}

impl RLPDecode for Capability {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, remaining) = get_list_payload(rlp)?;
        let (protocol, payload) = String::decode_unfinished(payload)?;
        let (version, payload) = u8::decode_unfinished(payload)?;
        if !payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((Capability { protocol, version }, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_field_roundtrip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u8)
            .encode_field(&"hello")
            .finish()
            .unwrap();

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder): (u8, _) = decoder.decode_field("a").unwrap();
        let (b, decoder): (String, _) = decoder.decode_field("b").unwrap();
        decoder.finish().unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "hello");
    }

    #[test]
    fn decode_optional_field_falls_back_to_none() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).encode_field(&1u8).finish().unwrap();
        let decoder = Decoder::new(&buf).unwrap();
        let (value, _): (Option<String>, _) = decoder.decode_optional_field();
        assert_eq!(value, None);
    }

    #[test]
    fn finish_unchecked_discards_trailing_fields() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u8)
            .encode_field(&2u8)
            .finish()
            .unwrap();
        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder): (u8, _) = decoder.decode_field("a").unwrap();
        assert_eq!(a, 1);
        decoder.finish_unchecked();
    }

    #[test]
    fn capability_roundtrip() {
        let cap = Capability::new("eth", 68);
        let mut buf = Vec::new();
        cap.encode(&mut buf);
        let decoded = Capability::decode(&buf).unwrap();
        assert_eq!(decoded, cap);
    }
}
