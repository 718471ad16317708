use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::sync::Arc;

use super::crypto::Address;
use super::transaction::{Transaction, NOMINAL_FEE};

/// A named wallet: balance, received-transaction log and per-counterparty sent amounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account's name, unique within a ledger
    name: Address,

    /// Never driven negative by `send`
    balance: f64,

    /// Append-only log of credited transactions
    received: Vec<Transaction>,

    /// Amounts sent to each counterparty, in send order
    sent: BTreeMap<Address, Vec<f64>>,
}

impl Account {
    /// Creates an empty account
    pub fn new(name: impl Into<Address>) -> Self {
        Self::with_balance(name, 0.0)
    }

    /// Creates an account with an opening balance
    pub fn with_balance(name: impl Into<Address>, balance: f64) -> Self {
        Account {
            name: name.into(),
            balance,
            received: Vec::new(),
            sent: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &Address {
        &self.name
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Received transactions, oldest first
    pub fn received(&self) -> &[Transaction] {
        &self.received
    }

    pub fn sent_map(&self) -> &BTreeMap<Address, Vec<f64>> {
        &self.sent
    }

    /// Amounts recorded as sent to `counterparty`
    pub fn sent_to(&self, counterparty: &Address) -> &[f64] {
        self.sent.get(counterparty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Credits the account from an external source
    ///
    /// The credit is recorded as a received transaction from `source` carrying the nominal fee.
    ///
    /// # Arguments
    ///
    /// * `amount` - The amount to credit
    /// * `source` - Label used as the sender of the synthetic transaction
    pub fn add_funds(&mut self, amount: f64, source: impl Into<Address>) {
        let transaction = Transaction::new(source, self.name.clone(), amount, NOMINAL_FEE);

        self.balance += amount;
        self.merge_sender_sent(&transaction);
        self.received.push(transaction);

        debug!("Added {} to {} (balance {})", amount, self.name, self.balance);
    }

    /// Sends `amount` to one or more recipients
    ///
    /// A single recipient receives the whole amount; several recipients share it evenly
    /// through a split multi-recipient transaction. The last emitted transaction carries the
    /// per-output amounts as its sender history.
    ///
    /// # Returns
    ///
    /// The emitted transactions, or an empty vector if the send was refused. A refused send
    /// leaves the account untouched.
    pub fn send(&mut self, amount: f64, recipients: &[Address]) -> Vec<Transaction> {
        if recipients.is_empty() || amount <= 0.0 {
            warn!("Refusing send of {} from {} to {} recipients", amount, self.name, recipients.len());
            return Vec::new();
        }

        if self.balance < amount {
            warn!(
                "Insufficient balance in {}: required {}, available {}",
                self.name, amount, self.balance
            );
            return Vec::new();
        }

        let mut transactions = match recipients {
            [recipient] => vec![Transaction::new(self.name.clone(), recipient.clone(), amount, NOMINAL_FEE)],
            _ => Transaction::with_recipients(self.name.clone(), recipients.to_vec(), amount, NOMINAL_FEE).split(),
        };

        let outputs: Vec<f64> = transactions.iter().map(Transaction::amount).collect();

        // Split shares need not sum back to `amount` exactly, so debit it once
        self.balance -= amount;
        for transaction in &transactions {
            self.sent
                .entry(transaction.recipient().clone())
                .or_default()
                .push(transaction.amount());
        }

        if let Some(last) = transactions.last_mut() {
            last.set_sender_sent(outputs);
        }

        info!("{} sent {} across {} transaction(s)", self.name, amount, transactions.len());

        transactions
    }

    /// Builds the reward transaction a miner pays to itself when a block is sealed
    pub fn reward_transaction(&self, reward: f64) -> Transaction {
        Transaction::with_history(self.name.clone(), self.name.clone(), reward, NOMINAL_FEE, vec![reward])
    }

    /// Credits every transaction addressed to this account
    ///
    /// Transactions already present in the received log are skipped, so replaying a batch
    /// never double counts.
    ///
    /// # Returns
    ///
    /// The number of transactions credited
    pub fn receive(&mut self, transactions: &[Transaction]) -> usize {
        let mut credited = 0;

        for transaction in transactions {
            if transaction.recipient() != &self.name {
                continue;
            }

            if self.received.contains(transaction) {
                warn!("{} already processed a transaction from {}", self.name, transaction.sender());
                continue;
            }

            self.balance += transaction.amount();
            self.merge_sender_sent(transaction);
            self.received.push(transaction.clone());
            credited += 1;
        }

        credited
    }

    /// Received transactions created within `[start, end]`
    pub fn transactions_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Transaction> {
        self.received
            .iter()
            .filter(|t| t.timestamp() >= start && t.timestamp() <= end)
            .cloned()
            .collect()
    }

    /// Received transactions, most recent first, optionally truncated to `limit`
    pub fn history(&self, limit: Option<usize>) -> Vec<Transaction> {
        let limit = limit.unwrap_or(self.received.len());
        self.received.iter().rev().take(limit).cloned().collect()
    }

    pub fn transaction_count(&self) -> usize {
        self.received.len()
    }

    /// Sum of every amount in the sent map
    pub fn total_sent(&self) -> f64 {
        self.sent.values().flatten().sum()
    }

    /// Sum of every received amount
    pub fn total_received(&self) -> f64 {
        self.received.iter().map(Transaction::amount).sum()
    }

    // Batch history pairs positionally with the recipient list it was produced for
    fn merge_sender_sent(&mut self, transaction: &Transaction) {
        for (recipient, amount) in transaction.recipient_list().iter().zip(transaction.sender_sent()) {
            self.sent.entry(recipient.clone()).or_default().push(*amount);
        }
    }
}

/// Concurrent registry of accounts that routes emitted transactions to their recipients
#[derive(Debug, Clone, Default)]
pub struct AccountBook {
    accounts: Arc<DashMap<Address, Account>>,
}

impl AccountBook {
    /// Creates an empty account book
    pub fn new() -> Self {
        AccountBook {
            accounts: Arc::new(DashMap::new()),
        }
    }

    /// Registers an account, replacing any account with the same name
    ///
    /// # Returns
    ///
    /// The account's address
    pub fn open(&self, name: impl Into<Address>, balance: f64) -> Address {
        let account = Account::with_balance(name, balance);
        let address = account.name().clone();
        self.accounts.insert(address.clone(), account);
        address
    }

    /// Gets a snapshot of an account
    pub fn get(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).map(|entry| entry.value().clone())
    }

    pub fn balance(&self, address: &Address) -> Option<f64> {
        self.accounts.get(address).map(|entry| entry.balance())
    }

    /// Credits a known account from an external source
    ///
    /// # Returns
    ///
    /// false if the account is unknown
    pub fn add_funds(&self, address: &Address, amount: f64, source: impl Into<Address>) -> bool {
        match self.accounts.get_mut(address) {
            Some(mut account) => {
                account.add_funds(amount, source);
                true
            }
            None => false,
        }
    }

    /// Sends from a known account and delivers the emitted transactions
    ///
    /// # Returns
    ///
    /// The emitted transactions, empty if the sender is unknown or the send was refused
    pub fn send(&self, from: &Address, amount: f64, recipients: &[Address]) -> Vec<Transaction> {
        let transactions = match self.accounts.get_mut(from) {
            Some(mut sender) => sender.send(amount, recipients),
            None => {
                warn!("Unknown sender account {}", from);
                return Vec::new();
            }
        };

        // The sender's shard guard is released before recipients are locked
        self.deliver(&transactions);
        transactions
    }

    /// Hands each transaction to its recipient's account
    ///
    /// # Returns
    ///
    /// The number of transactions credited
    pub fn deliver(&self, transactions: &[Transaction]) -> usize {
        let mut credited = 0;

        for transaction in transactions {
            match self.accounts.get_mut(transaction.recipient()) {
                Some(mut account) => credited += account.receive(std::slice::from_ref(transaction)),
                None => warn!("No account for recipient {}", transaction.recipient()),
            }
        }

        credited
    }

    /// Gets snapshots of all accounts
    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(|entry| entry.value().clone()).collect()
    }
}
