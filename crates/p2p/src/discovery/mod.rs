pub mod message;
pub mod server;
pub mod table;

pub use message::{Message, Packet, PacketDecodeError};
pub use server::{DiscoveryConfig, DiscoveryService};
pub use table::{KademliaTable, PeerRecord};
