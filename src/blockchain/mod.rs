// Blockchain module
//
// This module contains the ledger integrity engine:
// - Hashing and participant addresses
// - Transactions and their validity screens
// - Accounts (wallets) and the account book
// - Blocks and the time-budgeted proof of work
// - The chain with fork resolution

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use account::{Account, AccountBook};
pub use block::{Block, MiningOutcome, MiningRules, MiningState};
pub use chain::{AppendOutcome, Blockchain, ChainError};
pub use crypto::Address;
pub use transaction::{Transaction, TransactionError};
