use ethlink_chain::{ChainError, ExecutorError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}
