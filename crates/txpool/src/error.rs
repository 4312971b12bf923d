use thiserror::Error;

/// Rejections from the validation pipeline. Local behavior only: a remote peer is never
/// penalised for a gossiped tx that turns out to be rejected, unless the caller decides the
/// peer is spamming and bans it itself.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("transaction signature is malformed or does not recover to a valid sender")]
    InvalidSignature,
    #[error("encoded transaction size {0} exceeds the 128 KiB pool limit")]
    EncodedSizeExceeded(usize),
    #[error("pool is full")]
    PoolFull,
    #[error("sender already has the maximum number of pooled transactions")]
    AccountQuota,
    #[error("effective tip is below the pool's minimum accepted tip")]
    Underpriced,
    #[error("gas limit {tx_gas_limit} exceeds the latest header's gas limit {header_gas_limit}")]
    GasLimitExceeded {
        tx_gas_limit: u64,
        header_gas_limit: u64,
    },
    #[error("transaction nonce {tx_nonce} is below the account's current nonce {account_nonce}")]
    NonceTooLow {
        account_nonce: u64,
        tx_nonce: u64,
    },
    #[error("account balance is insufficient for value plus gas_limit * max_fee_per_gas")]
    InsufficientBalance,
    #[error("replacement transaction does not bump tip and max fee by at least 10%")]
    ReplacementUnderpriced,
}
