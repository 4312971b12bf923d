use std::collections::HashMap;

use ethlink_common::{Address, U256};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
}

/// The slice of world state the TxPool and Miner need: per-account nonce and balance at
/// some committed height. Out of scope: the real trie-backed implementation lives behind
/// the executor the embedder plugs in; this port is all the core touches.
pub trait StateView: Send + Sync {
    fn get_account(&self, address: Address) -> Account;
}

/// Reference `StateView` backed by a plain map, used by tests and dev-mode runs where no
/// real state trie is wired in.
#[derive(Default, Clone)]
pub struct InMemoryStateView {
    accounts: HashMap<Address, Account>,
}

impl InMemoryStateView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }
}

impl StateView for InMemoryStateView {
    fn get_account(&self, address: Address) -> Account {
        self.accounts.get(&address).copied().unwrap_or_default()
    }
}
