pub mod chain;
pub mod error;
pub mod executor;
pub mod pow;
pub mod state;
pub mod store;

pub use chain::{Chain, ChainState};
pub use error::{ChainError, ExecutorError};
pub use executor::{BlockBuilder, Executor, HeaderFields, InMemoryExecutor};
pub use state::{Account, InMemoryStateView, StateView};
pub use store::{InMemoryStore, Store};
