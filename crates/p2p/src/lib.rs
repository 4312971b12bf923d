pub mod discovery;
pub mod events;
pub mod network;
pub mod node;
pub mod rlpx;
pub mod sync;

pub use events::{Event, EventBus};
pub use network::{NetworkCore, Peer};
pub use node::{DialError, P2PNode, P2PNodeConfig};
pub use rlpx::{Message, RLPxError};
pub use sync::{SyncConfig, Synchronizer};
