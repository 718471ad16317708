use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use std::path::PathBuf;
use std::thread;

use pow_ledger::{AccountBook, Address, AppendOutcome, Blockchain, ChainConfig};

/// Runs a small ledger scenario against an in-memory chain
#[derive(Debug, Parser)]
#[command(name = "pow_ledger", version, about)]
struct Args {
    /// TOML file with chain settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Threads appending blocks concurrently after the scripted transfers
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

// Load the configuration, falling back to defaults if the file cannot be used
fn load_config(path: Option<&PathBuf>) -> ChainConfig {
    let Some(path) = path else {
        return ChainConfig::default();
    };

    match ChainConfig::from_file(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(err) => {
            warn!("Failed to load configuration from {}: {}", path.display(), err);
            warn!("Using default configuration instead");
            ChainConfig::default()
        }
    }
}

// Send from one account and submit the emitted transactions as a block
fn transfer(chain: &Blockchain, book: &AccountBook, from: &Address, amount: f64, to: &[Address]) {
    let transactions = book.send(from, amount, to);
    if transactions.is_empty() {
        warn!("Transfer of {} from {} was refused", amount, from);
        return;
    }

    for transaction in &transactions {
        if let Err(err) = transaction.validate() {
            warn!("Transaction {} -> {} flagged: {}", transaction.sender(), transaction.recipient(), err);
        }
    }

    report(&chain.append(chain.new_block(transactions)));
}

fn report(outcome: &AppendOutcome) {
    match outcome {
        AppendOutcome::Extended { index, digest } => info!("Block {} appended: {}", index, digest),
        AppendOutcome::Forked { ancestor, index, .. } => {
            info!("Block for index {} held on a fork from {}", index, ancestor)
        }
        AppendOutcome::Reorganized { ancestor, displaced, .. } => {
            info!("Reorganized from index {}, {} block(s) displaced", ancestor, displaced)
        }
        AppendOutcome::Stale { digest } => info!("Stale block {} discarded", digest),
        AppendOutcome::MiningTimedOut { difficulty } => {
            warn!("Mining timed out, difficulty is now {}", difficulty)
        }
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let chain = Blockchain::with_config(load_config(args.config.as_ref()));

    let book = AccountBook::new();
    let alice = book.open("Alice", 100.0);
    let bob = book.open("Bob", 50.0);
    let charlie = book.open("Charlie", 0.0);

    transfer(&chain, &book, &alice, 25.0, &[bob.clone()]);
    transfer(&chain, &book, &bob, 10.0, &[charlie.clone()]);
    transfer(&chain, &book, &alice, 30.0, &[bob.clone(), charlie.clone()]);

    let handles: Vec<_> = (0..args.threads)
        .map(|worker| {
            let chain = chain.clone();
            thread::spawn(move || {
                let block = chain.new_block(Vec::new());
                info!("Worker {} submitting a block", worker);
                chain.append(block)
            })
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(outcome) => report(&outcome),
            Err(_) => warn!("A worker thread panicked"),
        }
    }

    for account in book.accounts() {
        info!(
            "{}: balance {}, received {}, sent {}",
            account.name(),
            account.balance(),
            account.total_received(),
            account.total_sent()
        );
    }

    info!("Chain:\n{}", serde_json::to_string_pretty(&chain.blocks())?);
    info!(
        "Chain length {}, forks held {}, difficulty {}, valid: {}",
        chain.len(),
        chain.fork_count(),
        chain.difficulty(),
        chain.is_valid()
    );

    Ok(())
}
