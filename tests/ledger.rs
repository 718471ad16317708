use std::sync::Arc;
use std::thread;

use pow_ledger::blockchain::crypto::ZERO_DIGEST;
use pow_ledger::{
    Account, AccountBook, Address, AppendOutcome, Block, Blockchain, ChainConfig, ChainError,
    MiningOutcome, Transaction,
};

fn fast_chain() -> Blockchain {
    Blockchain::with_config(ChainConfig {
        difficulty: 1,
        mining_time_cap_ms: 5_000,
        ..ChainConfig::default()
    })
}

#[test]
fn genesis_then_one_block() {
    let chain = fast_chain();
    assert!(chain.is_valid());
    assert_eq!(chain.len(), 1);

    let genesis = chain.block_at(0).unwrap();
    let seeded = &genesis.transactions()[0];
    assert_eq!(seeded.sender().as_str(), "Alice");
    assert_eq!(seeded.recipient().as_str(), "Bob");
    assert_eq!(seeded.amount(), 50.0);

    let block = Block::new(
        vec![Transaction::new("Alice", "Bob", 10.0, 0.1)],
        chain.last_block_digest(),
    );
    let outcome = chain.append(block);

    assert!(outcome.is_on_main_chain());
    assert_eq!(chain.len(), 2);
    assert!(chain.is_valid());
    assert!(chain.last_block_digest().starts_with('0'));
}

#[test]
fn wrong_previous_hash_breaks_validation_at_new_block() {
    let chain = fast_chain();
    chain.append(chain.new_block(Vec::new()));

    chain.append(Block::new(
        vec![Transaction::new("Alice", "Bob", 50.0, 0.1)],
        "not-the-last-digest",
    ));

    assert!(!chain.is_valid());
    assert_eq!(chain.validate().map_err(|err| err.index()), Err(2));
    assert!(matches!(chain.validate(), Err(ChainError::BrokenLink { .. })));
}

#[test]
fn identical_blocks_hash_identically() {
    let build = || {
        Block::with_reward(
            vec![Transaction::with_history("Alice", "Bob", 10.0, 0.05, vec![10.0])],
            ZERO_DIGEST,
            50.0,
        )
    };

    assert_eq!(build().calculate_hash(), build().calculate_hash());
}

#[test]
fn mined_digest_has_required_prefix() {
    for difficulty in 0..=3 {
        let mut block = Block::new(vec![Transaction::new("Alice", "Bob", 1.0, 0.0)], ZERO_DIGEST);

        match block.mine(difficulty, &Account::new("Miner")) {
            MiningOutcome::Mined { digest, .. } => {
                assert!(digest.chars().take(difficulty).all(|c| c == '0'));
                assert_eq!(digest, block.calculate_hash());
            }
            other => panic!("difficulty {} did not mine: {:?}", difficulty, other),
        }
    }
}

#[test]
fn three_way_send_credits_each_recipient() {
    let book = AccountBook::new();
    let sender = book.open("Sender", 90.0);
    let recipients: Vec<Address> = ["R1", "R2", "R3"].iter().map(|name| book.open(*name, 0.0)).collect();

    let transactions = book.send(&sender, 60.0, &recipients);

    assert_eq!(transactions.len(), 3);
    assert_eq!(book.balance(&sender), Some(30.0));
    for recipient in &recipients {
        let account = book.get(recipient).unwrap();
        assert_eq!(account.balance(), 20.0);
        assert_eq!(account.received()[0].amount(), 20.0);
    }
}

#[test]
fn overdrawn_send_is_refused() {
    let mut account = Account::with_balance("Sender", 40.0);

    assert!(account.send(40.5, &[Address::from("Recipient")]).is_empty());
    assert_eq!(account.balance(), 40.0);
}

#[test]
fn concurrent_appends_keep_chain_consistent() {
    let chain = Arc::new(fast_chain());
    let workers = 4;
    let blocks_per_worker = 3;

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let chain = Arc::clone(&chain);
            thread::spawn(move || {
                (0..blocks_per_worker)
                    .map(|n| {
                        let amount = (worker * blocks_per_worker + n + 1) as f64;
                        let transactions = vec![Transaction::new("Alice", "Bob", amount, 0.05)];
                        chain.append(chain.new_block(transactions))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let outcomes: Vec<AppendOutcome> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    let extended = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, AppendOutcome::Extended { .. }))
        .count();
    let forked = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, AppendOutcome::Forked { .. }))
        .count();

    assert_eq!(outcomes.len(), workers * blocks_per_worker);
    assert_eq!(extended + forked, outcomes.len());
    assert_eq!(chain.len(), extended + 1);
    assert_eq!(chain.fork_count(), forked);
    assert!(chain.is_valid());

    for index in 0..chain.len() {
        let block = chain.block_at(index).unwrap();
        assert_eq!(block.index(), index);
        assert_eq!(chain.position_of(block.hash()), Some(index));
    }
}
