use ethlink_chain::pow::MINIMUM_DIFFICULTY;
use ethlink_common::block::{Block, BlockBody, BlockHeader};
use ethlink_common::{Address, Bloom, H256, U256};

/// A minimal dev-mode genesis: no premined accounts, minimum Ethash difficulty, an empty
/// body. Real network genesis parameters (chain spec, allocations) are out of scope.
pub fn dev_genesis() -> Block {
    let header = BlockHeader {
        parent_hash: H256::zero(),
        ommers_hash: H256::zero(),
        coinbase: Address::zero(),
        state_root: H256::zero(),
        transactions_root: H256::zero(),
        receipts_root: H256::zero(),
        logs_bloom: Bloom::zero(),
        difficulty: U256::from(MINIMUM_DIFFICULTY),
        number: 0,
        gas_limit: 30_000_000,
        gas_used: 0,
        timestamp: 0,
        extra_data: Default::default(),
        mix_hash: H256::zero(),
        nonce: 0,
        base_fee_per_gas: None,
    };
    Block {
        header,
        body: BlockBody::default(),
    }
}
