//! A single-process proof-of-work ledger.
//!
//! Transactions are grouped into blocks, blocks are hash-chained and sealed by a
//! time-budgeted nonce search, and the chain validates itself and resolves competing
//! branches by length.

pub mod blockchain;
pub mod config;

pub use blockchain::{
    Account, AccountBook, Address, AppendOutcome, Block, Blockchain, ChainError, MiningOutcome,
    MiningRules, MiningState, Transaction, TransactionError,
};
pub use config::{ChainConfig, ConfigError};
