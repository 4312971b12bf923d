pub mod connection;
pub mod error;
pub mod eth;
mod frame;
mod handshake;
pub mod message;
pub mod p2p_messages;
pub mod utils;

pub use connection::{recover_initiator_node_id, RLPxConnection};
pub use error::RLPxError;
pub use message::Message;
