use alloy_primitives::B256;

use crate::bytes::{decode_u64, encode_u64};
use crate::error::Error;

const MAX_RLP_DEPTH: usize = 16;

mod consts {
    pub const SINGLE_BYTE_MAX: u8 = 0x7f;
    pub const SHORT_STRING_PREFIX: u8 = 0x80;
    pub const LONG_STRING_PREFIX: u8 = 0xb7;
    pub const SHORT_STRING_MAX: u8 = 0xb7;
    pub const LONG_STRING_MAX: u8 = 0xbf;
    pub const SHORT_LIST_PREFIX: u8 = 0xc0;
    pub const LONG_LIST_PREFIX: u8 = 0xf7;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn u64(value: u64) -> Self {
        RlpItem::Bytes(encode_u64(value))
    }

    pub fn hash(hash: &B256) -> Self {
        RlpItem::Bytes(hash.to_vec())
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            RlpItem::Bytes(bytes) => encode_bytes(bytes),
            RlpItem::List(items) => {
                let mut payload: Vec<u8> = Vec::new();
                for item in items {
                    payload.extend(item.encode());
                }
                encode_list_payload(&payload)
            }
        }
    }

    pub fn into_list(self) -> Result<Vec<RlpItem>, Error> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(Error::Rlp("expected list, got bytes".to_string())),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        match self {
            RlpItem::Bytes(bytes) => Ok(bytes),
            RlpItem::List(_) => Err(Error::Rlp("expected bytes, got list".to_string())),
        }
    }

    pub fn into_u64(self) -> Result<u64, Error> {
        let bytes = self.into_bytes()?;
        decode_u64(&bytes).ok_or(Error::InvalidLength {
            field: "u64",
            expected: 8,
            got: bytes.len(),
        })
    }

    pub fn into_b256(self, field: &'static str) -> Result<B256, Error> {
        let bytes = self.into_bytes()?;
        if bytes.len() != 32 {
            return Err(Error::InvalidLength {
                field,
                expected: 32,
                got: bytes.len(),
            });
        }
        Ok(B256::from_slice(&bytes))
    }
}

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] <= consts::SINGLE_BYTE_MAX {
        vec![bytes[0]]
    } else if bytes.len() < 56 {
        let mut result: Vec<u8> = vec![consts::SHORT_STRING_PREFIX + bytes.len() as u8];
        result.extend_from_slice(bytes);
        result
    } else {
        let len_bytes: Vec<u8> = encode_u64(bytes.len() as u64);
        let mut result: Vec<u8> = vec![consts::LONG_STRING_PREFIX + len_bytes.len() as u8];
        result.extend(len_bytes);
        result.extend_from_slice(bytes);
        result
    }
}

pub fn encode_list_payload(payload: &[u8]) -> Vec<u8> {
    if payload.len() < 56 {
        let mut result: Vec<u8> = vec![consts::SHORT_LIST_PREFIX + payload.len() as u8];
        result.extend_from_slice(payload);
        result
    } else {
        let len_bytes: Vec<u8> = encode_u64(payload.len() as u64);
        let mut result: Vec<u8> = vec![consts::LONG_LIST_PREFIX + len_bytes.len() as u8];
        result.extend(len_bytes);
        result.extend_from_slice(payload);
        result
    }
}

/// Decode exactly one item; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<RlpItem, Error> {
    let (item, consumed) = decode_with_depth(data, 0)?;
    if consumed != data.len() {
        return Err(Error::Rlp(format!(
            "{} trailing bytes after item",
            data.len() - consumed
        )));
    }
    Ok(item)
}

fn decode_with_depth(data: &[u8], depth: usize) -> Result<(RlpItem, usize), Error> {
    if depth > MAX_RLP_DEPTH {
        return Err(Error::Rlp("RLP nesting too deep".to_string()));
    }

    let Some(&first) = data.first() else {
        return Err(Error::Rlp("empty data".to_string()));
    };

    if first <= consts::SINGLE_BYTE_MAX {
        return Ok((RlpItem::Bytes(vec![first]), 1));
    }

    let (is_list, header_len, len) = if first <= consts::SHORT_STRING_MAX {
        (false, 1, (first - consts::SHORT_STRING_PREFIX) as usize)
    } else if first <= consts::LONG_STRING_MAX {
        let len_of_len = (first - consts::LONG_STRING_PREFIX) as usize;
        (false, 1 + len_of_len, read_length(data, len_of_len)?)
    } else if first <= consts::LONG_LIST_PREFIX {
        (true, 1, (first - consts::SHORT_LIST_PREFIX) as usize)
    } else {
        let len_of_len = (first - consts::LONG_LIST_PREFIX) as usize;
        (true, 1 + len_of_len, read_length(data, len_of_len)?)
    };

    let end = header_len
        .checked_add(len)
        .ok_or_else(|| Error::Rlp("length overflow".to_string()))?;
    if data.len() < end {
        return Err(Error::Rlp("data too short".to_string()));
    }
    let payload = &data[header_len..end];

    if is_list {
        let items = decode_list_payload(payload, depth + 1)?;
        Ok((RlpItem::List(items), end))
    } else {
        Ok((RlpItem::Bytes(payload.to_vec()), end))
    }
}

fn read_length(data: &[u8], len_of_len: usize) -> Result<usize, Error> {
    if data.len() < 1 + len_of_len {
        return Err(Error::Rlp("data too short for length".to_string()));
    }
    decode_u64(&data[1..1 + len_of_len])
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| Error::Rlp("length does not fit".to_string()))
}

fn decode_list_payload(payload: &[u8], depth: usize) -> Result<Vec<RlpItem>, Error> {
    let mut items: Vec<RlpItem> = Vec::new();
    let mut offset: usize = 0;

    while offset < payload.len() {
        let (item, consumed) = decode_with_depth(&payload[offset..], depth)?;
        items.push(item);
        offset += consumed;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_empty_bytes() {
        let item = RlpItem::Bytes(vec![]);
        let encoded = item.encode();
        assert_eq!(encoded, vec![0x80]);
        assert_eq!(decode(&encoded).unwrap(), item);
    }

    #[test]
    fn test_encode_decode_nested_list() {
        let item = RlpItem::List(vec![
            RlpItem::List(vec![RlpItem::Bytes(vec![1])]),
            RlpItem::Bytes(b"dog".to_vec()),
        ]);
        let encoded = item.encode();
        assert_eq!(decode(&encoded).unwrap(), item);
    }

    #[test]
    fn test_long_string() {
        let long_data = vec![0xAA; 100];
        let encoded = RlpItem::Bytes(long_data.clone()).encode();
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(decode(&encoded).unwrap().into_bytes().unwrap(), long_data);
    }

    #[test]
    fn test_matches_chain_encoding() {
        let header = chain::BlockHeader::genesis(42);
        let item = decode(&header.rlp_encode()).unwrap();
        assert_eq!(item.encode(), header.rlp_encode());
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x83, b'a']).is_err());
        assert!(decode(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_u64_and_hash_helpers() {
        assert_eq!(RlpItem::u64(1024).into_u64().unwrap(), 1024);
        let h = B256::repeat_byte(7);
        assert_eq!(RlpItem::hash(&h).into_b256("hash").unwrap(), h);
        assert!(RlpItem::Bytes(vec![1; 31]).into_b256("hash").is_err());
    }
}
