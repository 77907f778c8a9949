use alloy_primitives::B256;
use chain::{BlockBody, BlockHeader};

use crate::error::Error;
use crate::rlp::{self, RlpItem};

pub const STATUS_MSG: u8 = 0x00;
pub const NEW_BLOCK_HASHES_MSG: u8 = 0x01;
pub const TX_MSG: u8 = 0x02;
pub const GET_BLOCK_HEADERS_MSG: u8 = 0x03;
pub const BLOCK_HEADERS_MSG: u8 = 0x04;
pub const GET_BLOCK_BODIES_MSG: u8 = 0x05;
pub const BLOCK_BODIES_MSG: u8 = 0x06;
pub const NEW_BLOCK_MSG: u8 = 0x07;
pub const GET_NODE_DATA_MSG: u8 = 0x0d;
pub const NODE_DATA_MSG: u8 = 0x0e;
pub const GET_RECEIPTS_MSG: u8 = 0x0f;
pub const RECEIPTS_MSG: u8 = 0x10;

/// Opaque peer identifier (public key of the remote node).
pub type PeerId = [u8; 64];

/// A typed message as carried by the transport.
///
/// Inbound, `peer` is the sender. Outbound, it is set to the local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pMessage {
    pub kind: u8,
    pub peer: PeerId,
    pub data: Vec<u8>,
}

/// Origin of a header range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(B256),
    Number(u64),
}

/// GetBlockHeaders payload: `[origin, amount, skip, reverse]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockHeadersData {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl GetBlockHeadersData {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let origin = match self.origin {
            HashOrNumber::Hash(hash) => RlpItem::hash(&hash),
            HashOrNumber::Number(number) => RlpItem::u64(number),
        };
        let reverse = if self.reverse { vec![1u8] } else { vec![] };
        let item = RlpItem::List(vec![
            origin,
            RlpItem::u64(self.amount),
            RlpItem::u64(self.skip),
            RlpItem::Bytes(reverse),
        ]);
        snappy_compress(&item.encode())
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let items = decode_list(data)?;
        if items.len() < 4 {
            return Err(Error::message(
                "GetBlockHeaders",
                format!("expected 4 fields, got {}", items.len()),
            ));
        }
        let mut items = items.into_iter();
        let start = next(&mut items)?.into_bytes()?;
        let origin = if start.len() == 32 {
            HashOrNumber::Hash(B256::from_slice(&start))
        } else {
            HashOrNumber::Number(RlpItem::Bytes(start).into_u64()?)
        };
        let amount = next(&mut items)?.into_u64()?;
        let skip = next(&mut items)?.into_u64()?;
        let reverse_bytes = next(&mut items)?.into_bytes()?;
        let reverse = reverse_bytes.first().is_some_and(|b| *b != 0);

        Ok(Self {
            origin,
            amount,
            skip,
            reverse,
        })
    }
}

/// BlockHeaders payload: `[header₁, header₂, ...]`.
pub fn encode_block_headers(headers: &[BlockHeader]) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    for header in headers {
        payload.extend(header.rlp_encode());
    }
    snappy_compress(&rlp::encode_list_payload(&payload))
}

pub fn decode_block_headers(data: &[u8]) -> Result<Vec<BlockHeader>, Error> {
    decode_list(data)?
        .into_iter()
        .map(decode_header)
        .collect()
}

/// GetBlockBodies payload: `[hash₁, hash₂, ...]`.
pub fn encode_hashes(hashes: &[B256]) -> Result<Vec<u8>, Error> {
    let item = RlpItem::List(hashes.iter().map(RlpItem::hash).collect());
    snappy_compress(&item.encode())
}

pub fn decode_hashes(data: &[u8]) -> Result<Vec<B256>, Error> {
    decode_list(data)?
        .into_iter()
        .map(|item| item.into_b256("block hash"))
        .collect()
}

/// BlockBodies payload. A missing body is an empty string in its slot so
/// positions line up with the requested hashes.
pub fn encode_block_bodies(bodies: &[Option<BlockBody>]) -> Result<Vec<u8>, Error> {
    let items = bodies
        .iter()
        .map(|body| match body {
            Some(body) => RlpItem::List(vec![
                RlpItem::u64(body.number),
                RlpItem::List(
                    body.transactions
                        .iter()
                        .map(|tx| RlpItem::Bytes(tx.clone()))
                        .collect(),
                ),
            ]),
            None => RlpItem::Bytes(vec![]),
        })
        .collect();
    snappy_compress(&RlpItem::List(items).encode())
}

pub fn decode_block_bodies(data: &[u8]) -> Result<Vec<Option<BlockBody>>, Error> {
    decode_list(data)?
        .into_iter()
        .map(|item| match item {
            RlpItem::Bytes(bytes) if bytes.is_empty() => Ok(None),
            item => decode_body(item).map(Some),
        })
        .collect()
}

fn decode_header(item: RlpItem) -> Result<BlockHeader, Error> {
    let fields = item.into_list()?;
    if fields.len() != 6 {
        return Err(Error::message(
            "header",
            format!("expected 6 fields, got {}", fields.len()),
        ));
    }
    let mut fields = fields.into_iter();
    Ok(BlockHeader {
        parent_hash: next(&mut fields)?.into_b256("parent_hash")?,
        number: next(&mut fields)?.into_u64()?,
        timestamp: next(&mut fields)?.into_u64()?,
        state_root: next(&mut fields)?.into_b256("state_root")?,
        transactions_root: next(&mut fields)?.into_b256("transactions_root")?,
        extra_data: next(&mut fields)?.into_bytes()?,
    })
}

fn decode_body(item: RlpItem) -> Result<BlockBody, Error> {
    let fields = item.into_list()?;
    if fields.len() != 2 {
        return Err(Error::message(
            "body",
            format!("expected 2 fields, got {}", fields.len()),
        ));
    }
    let mut fields = fields.into_iter();
    let number = next(&mut fields)?.into_u64()?;
    let transactions = next(&mut fields)?
        .into_list()?
        .into_iter()
        .map(RlpItem::into_bytes)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockBody::new(number, transactions))
}

fn next(iter: &mut impl Iterator<Item = RlpItem>) -> Result<RlpItem, Error> {
    iter.next()
        .ok_or_else(|| Error::Rlp("unexpected end of RLP fields".to_string()))
}

fn decode_list(compressed: &[u8]) -> Result<Vec<RlpItem>, Error> {
    let decompressed = snap::raw::Decoder::new()
        .decompress_vec(compressed)
        .map_err(|e| Error::Snappy(format!("decompress failed: {}", e)))?;
    rlp::decode(&decompressed)?.into_list()
}

fn snappy_compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| Error::Snappy(format!("compress failed: {}", e)))
}
