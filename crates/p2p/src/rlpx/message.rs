use bytes::BufMut;
use ethlink_rlp::error::{RLPDecodeError, RLPEncodeError};
use ethlink_rlp::encode::RLPEncode;
use std::fmt::Display;

use super::eth::{
    BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetPooledTransactions,
    GetReceipts, NewBlock, NewBlockHashes, NewPooledTransactionHashes, PooledTransactions,
    Receipts, StatusMessage, Transactions,
};
use super::p2p_messages::{DisconnectMessage, HelloMessage, PingMessage, PongMessage};

pub trait RLPxMessage: Sized {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError>;

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError>;
}

/// Every RLPx message this node can send or receive, across the base p2p wire protocol
/// (message codes 0x00-0x03) and the `eth/68` sub-protocol (codes 0x10 and up, offset by
/// the capability's position in HELLO — here `eth` is the only capability, so its offset
/// is fixed at 0x10).
#[derive(Debug)]
pub enum Message {
    Hello(HelloMessage),
    Disconnect(DisconnectMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    Status(StatusMessage),
    NewBlockHashes(NewBlockHashes),
    Transactions(Transactions),
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(BlockHeaders),
    GetBlockBodies(GetBlockBodies),
    BlockBodies(BlockBodies),
    NewBlock(Box<NewBlock>),
    NewPooledTransactionHashes(NewPooledTransactionHashes),
    GetPooledTransactions(GetPooledTransactions),
    PooledTransactions(PooledTransactions),
    GetReceipts(GetReceipts),
    Receipts(Receipts),
}

impl Message {
    pub fn decode(msg_id: u8, msg_data: &[u8]) -> Result<Message, RLPDecodeError> {
        match msg_id {
            0x00 => Ok(Message::Hello(HelloMessage::decode(msg_data)?)),
            0x01 => Ok(Message::Disconnect(DisconnectMessage::decode(msg_data)?)),
            0x02 => Ok(Message::Ping(PingMessage::decode(msg_data)?)),
            0x03 => Ok(Message::Pong(PongMessage::decode(msg_data)?)),
            // `eth` offsets from https://github.com/ethereum/devp2p/blob/master/caps/eth.md,
            // added to the capability's base offset (0x10, since `eth` is our only
            // capability besides the base p2p wire protocol).
            0x10 => Ok(Message::Status(StatusMessage::decode(msg_data)?)),
            0x11 => Ok(Message::NewBlockHashes(NewBlockHashes::decode(msg_data)?)),
            0x12 => Ok(Message::Transactions(Transactions::decode(msg_data)?)),
            0x13 => Ok(Message::GetBlockHeaders(GetBlockHeaders::decode(msg_data)?)),
            0x14 => Ok(Message::BlockHeaders(BlockHeaders::decode(msg_data)?)),
            0x15 => Ok(Message::GetBlockBodies(GetBlockBodies::decode(msg_data)?)),
            0x16 => Ok(Message::BlockBodies(BlockBodies::decode(msg_data)?)),
            0x17 => Ok(Message::NewBlock(Box::new(NewBlock::decode(msg_data)?))),
            0x18 => Ok(Message::NewPooledTransactionHashes(
                NewPooledTransactionHashes::decode(msg_data)?,
            )),
            0x19 => Ok(Message::GetPooledTransactions(GetPooledTransactions::decode(
                msg_data,
            )?)),
            0x1a => Ok(Message::PooledTransactions(PooledTransactions::decode(
                msg_data,
            )?)),
            0x1b => Ok(Message::GetReceipts(GetReceipts::decode(msg_data)?)),
            0x1c => Ok(Message::Receipts(Receipts::decode(msg_data)?)),
            _ => Err(RLPDecodeError::MalformedData),
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        match self {
            Message::Hello(msg) => {
                0x00_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Disconnect(msg) => {
                0x01_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Ping(msg) => {
                0x02_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Pong(msg) => {
                0x03_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Status(msg) => {
                0x10_u8.encode(buf);
                msg.encode(buf)
            }
            Message::NewBlockHashes(msg) => {
                0x11_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Transactions(msg) => {
                0x12_u8.encode(buf);
                msg.encode(buf)
            }
            Message::GetBlockHeaders(msg) => {
                0x13_u8.encode(buf);
                msg.encode(buf)
            }
            Message::BlockHeaders(msg) => {
                0x14_u8.encode(buf);
                msg.encode(buf)
            }
            Message::GetBlockBodies(msg) => {
                0x15_u8.encode(buf);
                msg.encode(buf)
            }
            Message::BlockBodies(msg) => {
                0x16_u8.encode(buf);
                msg.encode(buf)
            }
            Message::NewBlock(msg) => {
                0x17_u8.encode(buf);
                msg.encode(buf)
            }
            Message::NewPooledTransactionHashes(msg) => {
                0x18_u8.encode(buf);
                msg.encode(buf)
            }
            Message::GetPooledTransactions(msg) => {
                0x19_u8.encode(buf);
                msg.encode(buf)
            }
            Message::PooledTransactions(msg) => {
                0x1a_u8.encode(buf);
                msg.encode(buf)
            }
            Message::GetReceipts(msg) => {
                0x1b_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Receipts(msg) => {
                0x1c_u8.encode(buf);
                msg.encode(buf)
            }
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Hello(_) => "p2p:Hello".fmt(f),
            Message::Disconnect(_) => "p2p:Disconnect".fmt(f),
            Message::Ping(_) => "p2p:Ping".fmt(f),
            Message::Pong(_) => "p2p:Pong".fmt(f),
            Message::Status(_) => "eth:Status".fmt(f),
            Message::NewBlockHashes(_) => "eth:NewBlockHashes".fmt(f),
            Message::Transactions(_) => "eth:Transactions".fmt(f),
            Message::GetBlockHeaders(_) => "eth:GetBlockHeaders".fmt(f),
            Message::BlockHeaders(_) => "eth:BlockHeaders".fmt(f),
            Message::GetBlockBodies(_) => "eth:GetBlockBodies".fmt(f),
            Message::BlockBodies(_) => "eth:BlockBodies".fmt(f),
            Message::NewBlock(_) => "eth:NewBlock".fmt(f),
            Message::NewPooledTransactionHashes(_) => "eth:NewPooledTransactionHashes".fmt(f),
            Message::GetPooledTransactions(_) => "eth:GetPooledTransactions".fmt(f),
            Message::PooledTransactions(_) => "eth:PooledTransactions".fmt(f),
            Message::GetReceipts(_) => "eth:GetReceipts".fmt(f),
            Message::Receipts(_) => "eth:Receipts".fmt(f),
        }
    }
}
