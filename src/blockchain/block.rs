use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use std::iter;
use std::time::{Duration, Instant};

use super::account::Account;
use super::crypto::{meets_difficulty, sha256_hex};
use super::transaction::Transaction;

/// Reward fixed on every block at construction unless overridden
pub const DEFAULT_BLOCK_REWARD: f64 = 50.0;

/// Largest serialized payload, in bytes, a block may be sealed with
pub const MAX_BLOCK_SIZE: u64 = 1000;

/// Seconds per block at a throughput of one million transactions
const TARGET_BLOCK_SECONDS: f64 = 600.0;
const THROUGHPUT_UNIT: f64 = 1_000_000.0;

/// Where a block is in its mining lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiningState {
    Unmined,
    Mining,
    Mined,
    /// The time budget ran out; carries the difficulty suggested for the next attempt
    DifficultyAdjustPending { difficulty: usize },
}

/// Parameters of a single nonce search
#[derive(Debug, Clone)]
pub struct MiningRules {
    /// Required leading zero characters in the digest
    pub difficulty: usize,

    pub max_block_size: u64,

    /// Upper bound on the throughput-derived time budget
    pub time_cap: Option<Duration>,

    /// Keep the submitted transactions behind the reward instead of clearing the payload
    pub keep_transactions: bool,
}

impl MiningRules {
    pub fn new(difficulty: usize) -> Self {
        MiningRules {
            difficulty,
            max_block_size: MAX_BLOCK_SIZE,
            time_cap: None,
            keep_transactions: false,
        }
    }
}

/// Result of `Block::mine`
#[derive(Debug, Clone)]
pub enum MiningOutcome {
    Mined {
        digest: String,
        nonce: u64,
        /// Reward paid from the miner to itself
        reward: Transaction,
        elapsed: Duration,
    },
    TimedOut {
        elapsed: Duration,
        /// Difficulty after adjustment
        difficulty: usize,
    },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, assigned when the block is placed
    index: usize,

    /// Transactions carried by the block
    transactions: Vec<Transaction>,

    /// Digest of the preceding block
    previous_hash: String,

    /// Cached digest of this block
    hash: String,

    /// Proof of work (nonce)
    nonce: u64,

    reward: f64,

    state: MiningState,
}

impl Block {
    /// Creates a new unmined block paying the default reward
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `previous_hash` - The digest of the block this one extends
    pub fn new(transactions: Vec<Transaction>, previous_hash: impl Into<String>) -> Self {
        Self::with_reward(transactions, previous_hash, DEFAULT_BLOCK_REWARD)
    }

    /// Creates a new unmined block with an explicit reward
    pub fn with_reward(transactions: Vec<Transaction>, previous_hash: impl Into<String>, reward: f64) -> Self {
        let mut block = Block {
            index: 0,
            transactions,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
            reward,
            state: MiningState::Unmined,
        };

        block.hash = block.calculate_hash();
        block
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    /// The cached digest; `calculate_hash` is authoritative
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn reward(&self) -> f64 {
        self.reward
    }

    pub fn state(&self) -> MiningState {
        self.state
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Calculates the digest of the block from its current contents
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        digest_of(&self.previous_hash, self.nonce, self.reward, &self.transactions)
    }

    /// Serialized size of the transaction payload
    pub fn size(&self) -> u64 {
        bincode::serialized_size(&self.transactions).unwrap_or(u64::MAX)
    }

    /// Searches for a nonce at `difficulty` within the throughput-derived time budget
    pub fn mine(&mut self, difficulty: usize, miner: &Account) -> MiningOutcome {
        self.mine_with(&MiningRules::new(difficulty), miner)
    }

    /// Searches for a nonce satisfying `rules`
    ///
    /// On success the block is sealed: the reward transaction from `miner` to itself is
    /// prepended and, unless `rules.keep_transactions` is set, the payload is then cleared.
    /// The digest is searched over that sealed payload so the stored digest always matches
    /// `calculate_hash`. When the time budget runs out the block's contents are left as they
    /// were and the adjusted difficulty is reported.
    pub fn mine_with(&mut self, rules: &MiningRules, miner: &Account) -> MiningOutcome {
        let target = target_mining_time(self.transactions.len());
        let budget = rules.time_cap.map_or(target, |cap| cap.min(target));

        let within_size = self.size() <= rules.max_block_size;
        if !within_size {
            warn!(
                "Block payload of {} bytes exceeds the {} byte cap",
                self.size(),
                rules.max_block_size
            );
        }

        let reward = miner.reward_transaction(self.reward);
        let sealed: Vec<Transaction> = if rules.keep_transactions {
            iter::once(reward.clone())
                .chain(self.transactions.iter().cloned())
                .collect()
        } else {
            Vec::new()
        };

        self.state = MiningState::Mining;

        let mut rng = rand::thread_rng();
        let start = Instant::now();

        while start.elapsed() <= budget {
            let nonce: u64 = rng.gen();
            let digest = digest_of(&self.previous_hash, nonce, self.reward, &sealed);

            if within_size && meets_difficulty(&digest, rules.difficulty) {
                let elapsed = start.elapsed();
                info!("Block mined: {} (nonce {}, {:?})", digest, nonce, elapsed);

                self.nonce = nonce;
                self.hash = digest.clone();
                self.transactions = sealed;
                self.state = MiningState::Mined;

                return MiningOutcome::Mined {
                    digest,
                    nonce,
                    reward,
                    elapsed,
                };
            }
        }

        let elapsed = start.elapsed();
        // The loop only exits just past the budget, so neither branch of the retarget fires here
        let difficulty = adjust_difficulty(elapsed, budget, rules.difficulty);
        self.state = MiningState::DifficultyAdjustPending { difficulty };

        warn!(
            "Block mining failed after {:?}, adjusting difficulty to {}",
            elapsed, difficulty
        );

        MiningOutcome::TimedOut { elapsed, difficulty }
    }

    #[cfg(test)]
    pub(crate) fn set_reward(&mut self, reward: f64) {
        self.reward = reward;
    }

    #[cfg(test)]
    pub(crate) fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }

    #[cfg(test)]
    pub(crate) fn refresh_hash(&mut self) {
        self.hash = self.calculate_hash();
    }
}

/// Wall-clock budget for mining a block of `transaction_count` transactions
///
/// Scales inversely with throughput: 600 seconds at one million transactions. An empty
/// block has no finite target.
pub fn target_mining_time(transaction_count: usize) -> Duration {
    if transaction_count == 0 {
        return Duration::MAX;
    }

    let seconds = TARGET_BLOCK_SECONDS / (transaction_count as f64 / THROUGHPUT_UNIT);
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Raises difficulty when mining took under half the target, lowers it past double
pub fn adjust_difficulty(elapsed: Duration, target: Duration, current: usize) -> usize {
    if elapsed < target / 2 {
        current + 1
    } else if target.checked_mul(2).map_or(false, |limit| elapsed > limit) {
        current.saturating_sub(1)
    } else {
        current
    }
}

// Digest over the previous hash, nonce, reward and the hashed fields of each transaction
fn digest_of(previous_hash: &str, nonce: u64, reward: f64, transactions: &[Transaction]) -> String {
    let transactions: Vec<serde_json::Value> = transactions
        .iter()
        .map(|transaction| {
            json!({
                "sender": transaction.sender(),
                "recipient": transaction.recipient(),
                "amount": transaction.amount(),
                "sender_sent": transaction.sender_sent(),
            })
        })
        .collect();

    let block_data = json!({
        "previous_hash": previous_hash,
        "nonce": nonce,
        "reward": reward,
        "transactions": transactions,
    });

    sha256_hex(block_data.to_string().as_bytes())
}
