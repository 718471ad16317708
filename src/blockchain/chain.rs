use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::account::Account;
use super::block::{Block, MiningOutcome};
use super::crypto::ZERO_DIGEST;
use super::transaction::{Transaction, NOMINAL_FEE};
use crate::config::ChainConfig;

/// Integrity failures reported by `Blockchain::validate`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Block {index} hash is invalid")]
    DigestMismatch { index: usize },

    #[error("Block {index} previous hash is invalid")]
    BrokenLink { index: usize },
}

impl ChainError {
    /// Position of the offending block
    pub fn index(&self) -> usize {
        match self {
            ChainError::DigestMismatch { index } | ChainError::BrokenLink { index } => *index,
        }
    }
}

/// What `Blockchain::append` did with a block
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// Pushed onto the tip of the main chain
    Extended { index: usize, digest: String },

    /// Held on a side branch rooted at `ancestor`
    Forked {
        ancestor: usize,
        index: usize,
        digest: String,
    },

    /// Completed a branch longer than the main chain, which was rolled back to `ancestor`
    Reorganized {
        ancestor: usize,
        displaced: usize,
        index: usize,
        digest: String,
    },

    /// Duplicate of a block already known; discarded
    Stale { digest: String },

    /// The mining budget ran out; the block was not appended
    MiningTimedOut { difficulty: usize },
}

impl AppendOutcome {
    /// Whether the block now sits on the main chain
    pub fn is_on_main_chain(&self) -> bool {
        matches!(
            self,
            AppendOutcome::Extended { .. } | AppendOutcome::Reorganized { .. }
        )
    }
}

#[derive(Debug)]
struct ChainState {
    /// Main chain, genesis first
    blocks: Vec<Block>,

    /// Digest -> position in `blocks`
    by_hash: HashMap<String, usize>,

    /// Ancestor position -> competing branches growing from it
    forks: HashMap<usize, Vec<Vec<Block>>>,

    difficulty: usize,

    miner: Account,

    /// Digests whose reward the miner has already been paid
    credited: HashSet<String>,
}

/// Represents the blockchain
///
/// Cloning yields another handle to the same chain. Every read and write of the block
/// storage and digest index happens under a single chain-wide lock, including mining.
#[derive(Debug, Clone)]
pub struct Blockchain {
    state: Arc<Mutex<ChainState>>,
    config: Arc<ChainConfig>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block and default settings
    pub fn new() -> Self {
        Self::with_config(ChainConfig::default())
    }

    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, reward, miner account and mining limits
    pub fn with_config(config: ChainConfig) -> Self {
        let genesis = Self::genesis_block();
        let by_hash = HashMap::from([(genesis.hash().to_string(), 0)]);
        let miner = Account::with_balance(config.miner_name.as_str(), config.miner_balance);

        info!("Created genesis block {}", genesis.hash());

        Blockchain {
            state: Arc::new(Mutex::new(ChainState {
                blocks: vec![genesis],
                by_hash,
                forks: HashMap::new(),
                difficulty: config.difficulty,
                miner,
                credited: HashSet::new(),
            })),
            config: Arc::new(config),
        }
    }

    /// The fixed first block; never validated against a predecessor
    fn genesis_block() -> Block {
        let transactions = vec![Transaction::new("Alice", "Bob", 50.0, NOMINAL_FEE)];
        Block::new(transactions, ZERO_DIGEST)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Mines `block` at the current difficulty and places it
    ///
    /// A mined block extends the tip, opens or grows a fork branch, or completes a branch
    /// that outgrows the main chain and triggers a reorganization. Duplicates are discarded.
    /// If mining times out the chain adopts the adjusted difficulty and the block is dropped;
    /// callers wanting to retry must append again.
    pub fn append(&self, mut block: Block) -> AppendOutcome {
        let mut state = self.state.lock();
        let rules = self.config.mining_rules(state.difficulty);

        match block.mine_with(&rules, &state.miner) {
            MiningOutcome::TimedOut { difficulty, .. } => {
                state.difficulty = difficulty;
                AppendOutcome::MiningTimedOut { difficulty }
            }
            MiningOutcome::Mined { .. } => {
                let outcome = state.place(block);
                match outcome {
                    AppendOutcome::Extended { index, .. } => state.credit_rewards(index),
                    AppendOutcome::Reorganized { ancestor, .. } => state.credit_rewards(ancestor + 1),
                    _ => {}
                }
                outcome
            }
        }
    }

    /// Checks every block after genesis for a stale digest or a broken link
    ///
    /// # Returns
    ///
    /// The first failure found, walking from index 1
    pub fn validate(&self) -> Result<(), ChainError> {
        let state = self.state.lock();

        for (offset, pair) in state.blocks.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let index = offset + 1;

            if current.hash() != current.calculate_hash() {
                return Err(ChainError::DigestMismatch { index });
            }

            if current.previous_hash() != previous.hash() {
                return Err(ChainError::BrokenLink { index });
            }
        }

        Ok(())
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false otherwise
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(err) => {
                error!("{}", err);
                false
            }
        }
    }

    /// Number of blocks on the main chain, genesis included
    pub fn len(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Whether the main chain holds no blocks; the genesis block is never removed
    pub fn is_empty(&self) -> bool {
        self.state.lock().blocks.is_empty()
    }

    pub fn last_block_digest(&self) -> String {
        let state = self.state.lock();
        state.tip().hash().to_string()
    }

    pub fn last_block(&self) -> Block {
        self.state.lock().tip().clone()
    }

    pub fn block_at(&self, index: usize) -> Option<Block> {
        self.state.lock().blocks.get(index).cloned()
    }

    /// Gets the entire main chain
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    /// Position of the main-chain block with `digest`
    pub fn position_of(&self, digest: &str) -> Option<usize> {
        self.state.lock().by_hash.get(digest).copied()
    }

    pub fn difficulty(&self) -> usize {
        self.state.lock().difficulty
    }

    /// Snapshot of the mining-reward account
    pub fn miner(&self) -> Account {
        self.state.lock().miner.clone()
    }

    /// Number of side branches currently held
    pub fn fork_count(&self) -> usize {
        self.state.lock().forks.values().map(Vec::len).sum()
    }

    /// Builds an unmined block on the current tip paying the configured reward
    pub fn new_block(&self, transactions: Vec<Transaction>) -> Block {
        Block::with_reward(transactions, self.last_block_digest(), self.config.mining_reward)
    }
}

impl ChainState {
    fn tip(&self) -> &Block {
        // blocks always holds at least the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    fn tip_index(&self) -> usize {
        self.blocks.len() - 1
    }

    /// Places a mined block on the main chain or a side branch
    fn place(&mut self, block: Block) -> AppendOutcome {
        let digest = block.hash().to_string();

        // A digest commits to its predecessor, so a repeat can never claim a later slot
        if self.by_hash.contains_key(&digest) || self.in_fork(&digest) {
            warn!("Discarding stale block {}", digest);
            return AppendOutcome::Stale { digest };
        }

        match self.by_hash.get(block.previous_hash()).copied() {
            Some(parent) if parent == self.tip_index() => self.extend(block),
            Some(parent) => self.open_fork(parent, block),
            None => match self.find_fork_parent(block.previous_hash()) {
                Some((ancestor, slot, position)) => self.grow_fork(ancestor, slot, position, block),
                None => {
                    warn!(
                        "Block {} does not link to a known block (previous {})",
                        digest,
                        block.previous_hash()
                    );
                    self.extend(block)
                }
            },
        }
    }

    fn extend(&mut self, mut block: Block) -> AppendOutcome {
        let index = self.blocks.len();
        let digest = block.hash().to_string();

        block.set_index(index);
        self.by_hash.insert(digest.clone(), index);
        self.blocks.push(block);

        AppendOutcome::Extended { index, digest }
    }

    // The block competes with the main-chain block already at parent + 1
    fn open_fork(&mut self, parent: usize, mut block: Block) -> AppendOutcome {
        let index = parent + 1;
        let digest = block.hash().to_string();

        block.set_index(index);
        self.forks.entry(parent).or_default().push(vec![block]);

        info!("Block {} forks the chain at index {}", digest, index);

        AppendOutcome::Forked {
            ancestor: parent,
            index,
            digest,
        }
    }

    fn grow_fork(&mut self, ancestor: usize, slot: usize, position: usize, mut block: Block) -> AppendOutcome {
        let index = ancestor + position + 2;
        let digest = block.hash().to_string();
        let tip_index = self.tip_index();

        block.set_index(index);

        let branches = self.forks.entry(ancestor).or_default();
        let slot = if position + 1 == branches[slot].len() {
            slot
        } else {
            // Parent sits mid-branch: start a new branch sharing its prefix
            let prefix = branches[slot][..=position].to_vec();
            branches.push(prefix);
            branches.len() - 1
        };
        branches[slot].push(block);

        if index > tip_index {
            let branch = branches.swap_remove(slot);
            return self.reorganize(ancestor, branch, digest);
        }

        AppendOutcome::Forked {
            ancestor,
            index,
            digest,
        }
    }

    /// Rolls the main chain back to `ancestor` and re-extends it with `branch`
    fn reorganize(&mut self, ancestor: usize, branch: Vec<Block>, digest: String) -> AppendOutcome {
        let displaced = self.blocks.split_off(ancestor + 1);
        for block in &displaced {
            self.by_hash.remove(block.hash());
        }

        // Branches rooted on displaced blocks lose their ancestor
        self.forks.retain(|&root, _| root <= ancestor);

        let displaced_count = displaced.len();
        if !displaced.is_empty() {
            self.forks.entry(ancestor).or_default().push(displaced);
        }

        for block in branch {
            self.by_hash.insert(block.hash().to_string(), block.index());
            self.blocks.push(block);
        }

        let index = self.tip_index();
        info!(
            "Switched to fork at index {}: {} block(s) displaced, new tip {} at index {}",
            ancestor, displaced_count, digest, index
        );

        AppendOutcome::Reorganized {
            ancestor,
            displaced: displaced_count,
            index,
            digest,
        }
    }

    /// Pays the miner for main-chain blocks from `from` onwards not yet rewarded
    fn credit_rewards(&mut self, from: usize) {
        let mut total = 0.0;
        let mut count = 0;

        for block in &self.blocks[from..] {
            if self.credited.insert(block.hash().to_string()) {
                total += block.reward();
                count += 1;
            }
        }

        if count == 0 {
            return;
        }

        // One transaction per call; rewards promoted together share a timestamp
        let reward = self.miner.reward_transaction(total);
        self.miner.receive(&[reward]);
        debug!("Credited {} for {} block(s) to {}", total, count, self.miner.name());
    }

    fn in_fork(&self, digest: &str) -> bool {
        self.forks
            .values()
            .flatten()
            .flatten()
            .any(|block| block.hash() == digest)
    }

    /// Locates a branch block with `digest` as (ancestor, branch slot, position in branch)
    fn find_fork_parent(&self, digest: &str) -> Option<(usize, usize, usize)> {
        self.forks.iter().find_map(|(&ancestor, branches)| {
            branches.iter().enumerate().find_map(|(slot, branch)| {
                branch
                    .iter()
                    .position(|block| block.hash() == digest)
                    .map(|position| (ancestor, slot, position))
            })
        })
    }
}
