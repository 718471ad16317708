use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::Address;

/// Flat fee attached to wallet-issued transactions
pub const NOMINAL_FEE: f64 = 0.05;

/// Reasons a transaction fails validation, in the order they are checked
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0} (must be positive)")]
    NonPositiveAmount(f64),

    #[error("Sender history covers {covered}, less than amount {amount}")]
    InsufficientHistory { covered: f64, amount: f64 },

    #[error("Sender and recipient are both {0}")]
    SelfTransfer(Address),

    #[error("Recipient {0} is not in the recipient list")]
    RecipientNotListed(Address),

    #[error("Sender history variance {variance} exceeds 0.1 x mean {mean}")]
    StructuringPattern { variance: f64, mean: f64 },

    #[error("Amount {amount} is above the historical band threshold {threshold}")]
    OutsideHistoricalBand { amount: f64, threshold: f64 },
}

/// A transfer of value from one participant to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    sender: Address,

    /// Empty when the transfer was requested for a recipient list
    recipient: Address,

    amount: f64,

    fee: f64,

    /// Creation time, stamped by the constructors
    timestamp: DateTime<Utc>,

    /// Recipients of a multi-recipient send, in request order
    #[serde(default)]
    recipient_list: Vec<Address>,

    /// Per-output amounts of the send batch that produced this transaction
    #[serde(default)]
    sender_sent: Vec<f64>,
}

impl Transaction {
    /// Creates a single-recipient transaction with no sender history
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, amount: f64, fee: f64) -> Self {
        Self::with_history(sender, recipient, amount, fee, Vec::new())
    }

    /// Creates a single-recipient transaction carrying the sender's batch history
    pub fn with_history(
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        amount: f64,
        fee: f64,
        sender_sent: Vec<f64>,
    ) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            fee,
            timestamp: Utc::now(),
            recipient_list: Vec::new(),
            sender_sent,
        }
    }

    /// Creates a multi-recipient transaction; `split` turns it into one transfer per recipient
    pub fn with_recipients(sender: impl Into<Address>, recipients: Vec<Address>, amount: f64, fee: f64) -> Self {
        Transaction {
            recipient_list: recipients,
            ..Self::new(sender, Address::default(), amount, fee)
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn recipient_list(&self) -> &[Address] {
        &self.recipient_list
    }

    pub fn sender_sent(&self) -> &[f64] {
        &self.sender_sent
    }

    /// Overrides the creation time
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    pub fn set_recipient_list(&mut self, recipients: Vec<Address>) {
        self.recipient_list = recipients;
    }

    pub fn set_sender_sent(&mut self, sender_sent: Vec<f64>) {
        self.sender_sent = sender_sent;
    }

    /// Runs every validity rule, stopping at the first failure
    ///
    /// # Returns
    ///
    /// Ok(()) if the transaction is acceptable, otherwise the rule that rejected it
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.amount <= 0.0 {
            return Err(TransactionError::NonPositiveAmount(self.amount));
        }

        let covered: f64 = self.sender_sent.iter().sum();
        if covered < self.amount {
            return Err(TransactionError::InsufficientHistory {
                covered,
                amount: self.amount,
            });
        }

        if self.sender == self.recipient {
            return Err(TransactionError::SelfTransfer(self.sender.clone()));
        }

        if !self.recipient_list.is_empty() && !self.recipient_list.contains(&self.recipient) {
            return Err(TransactionError::RecipientNotListed(self.recipient.clone()));
        }

        // Structuring screen over the population variance of the batch
        let count = self.sender_sent.len();
        if count >= 3 {
            let mean = covered / count as f64;
            let variance = self
                .sender_sent
                .iter()
                .map(|sent| (sent - mean) * (sent - mean))
                .sum::<f64>()
                / count as f64;

            if variance > 0.1 * mean {
                return Err(TransactionError::StructuringPattern { variance, mean });
            }
        }

        // Band screen: amount must stay within the lowest tenth of the historical spread
        if count >= 5 {
            let min = self.sender_sent.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.sender_sent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let threshold = min + 0.1 * (max - min);

            if self.amount > threshold {
                return Err(TransactionError::OutsideHistoricalBand {
                    amount: self.amount,
                    threshold,
                });
            }
        }

        Ok(())
    }

    /// Checks all validity rules
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    #[cfg(test)]
    pub(crate) fn set_amount(&mut self, amount: f64) {
        self.amount = amount;
    }

    /// Splits a multi-recipient transaction into one transaction per recipient
    ///
    /// Each output carries `amount / N`, the original sender, fee and sender history,
    /// in recipient-list order. An empty recipient list yields no outputs.
    pub fn split(&self) -> Vec<Transaction> {
        if self.recipient_list.is_empty() {
            return Vec::new();
        }

        let share = self.amount / self.recipient_list.len() as f64;

        self.recipient_list
            .iter()
            .map(|recipient| {
                Transaction::with_history(
                    self.sender.clone(),
                    recipient.clone(),
                    share,
                    self.fee,
                    self.sender_sent.clone(),
                )
            })
            .collect()
    }
}

/// Value equality used for replay detection: sender, recipient, amount, fee and creation time
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender
            && self.recipient == other.recipient
            && self.amount == other.amount
            && self.fee == other.fee
            && self.timestamp == other.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn addresses(names: &[&str]) -> Vec<Address> {
        names.iter().map(|name| Address::from(*name)).collect()
    }

    #[test]
    fn test_new_transaction() {
        let transaction = Transaction::new("Alice", "Bob", 100.0, 1.0);

        assert_eq!(transaction.sender().as_str(), "Alice");
        assert_eq!(transaction.recipient().as_str(), "Bob");
        assert_eq!(transaction.amount(), 100.0);
        assert_eq!(transaction.fee(), 1.0);
        assert!(transaction.recipient_list().is_empty());
        assert!(transaction.sender_sent().is_empty());
    }

    #[test]
    fn test_with_recipients_leaves_recipient_empty() {
        let recipients = addresses(&["Bob", "Charlie"]);
        let transaction = Transaction::with_recipients("Alice", recipients.clone(), 100.0, 1.0);

        assert!(transaction.recipient().is_empty());
        assert_eq!(transaction.recipient_list(), recipients.as_slice());
    }

    #[test]
    fn test_timestamp_override() {
        let mut transaction = Transaction::new("Alice", "Bob", 100.0, 1.0);
        let date = Utc.with_ymd_and_hms(2023, 4, 23, 11, 0, 0).unwrap();

        transaction.set_timestamp(date);
        assert_eq!(transaction.timestamp(), date);
    }

    #[test]
    fn test_valid_transaction() {
        let transaction = Transaction::with_history("Alice", "Bob", 100.0, 1.0, vec![100.0]);
        assert!(transaction.is_valid());
    }

    #[test]
    fn test_non_positive_amount_is_invalid() {
        let zero = Transaction::with_history("Alice", "Bob", 0.0, 1.0, vec![10.0]);
        let negative = Transaction::with_history("Alice", "Bob", -5.0, 1.0, vec![10.0]);

        assert_eq!(zero.validate(), Err(TransactionError::NonPositiveAmount(0.0)));
        assert!(!negative.is_valid());
    }

    #[test]
    fn test_amount_not_covered_by_history_is_invalid() {
        let transaction = Transaction::new("Alice", "Bob", 100.0, 1.0);

        assert_eq!(
            transaction.validate(),
            Err(TransactionError::InsufficientHistory {
                covered: 0.0,
                amount: 100.0
            })
        );
    }

    #[test]
    fn test_self_transfer_is_invalid() {
        let transaction = Transaction::with_history("Alice", "Alice", 10.0, 1.0, vec![10.0]);

        assert_eq!(
            transaction.validate(),
            Err(TransactionError::SelfTransfer(Address::from("Alice")))
        );
    }

    #[test]
    fn test_first_failing_rule_is_reported() {
        // Also a structuring pattern, but the self-send rule runs first
        let transaction =
            Transaction::with_history("Alice", "Alice", 1000.0, 1.0, vec![500.0, 400.0, 200.0]);

        assert_eq!(
            transaction.validate(),
            Err(TransactionError::SelfTransfer(Address::from("Alice")))
        );
    }

    #[test]
    fn test_recipient_must_be_listed() {
        let mut transaction = Transaction::with_history("Alice", "Dave", 10.0, 0.0, vec![10.0]);
        transaction.set_recipient_list(addresses(&["Bob", "Charlie"]));

        assert_eq!(
            transaction.validate(),
            Err(TransactionError::RecipientNotListed(Address::from("Dave")))
        );

        transaction.set_recipient_list(addresses(&["Bob", "Dave"]));
        assert!(transaction.is_valid());
    }

    #[test]
    fn test_structuring_screen() {
        // mean 25, variance 0
        let uniform = Transaction::with_history("Alice", "Bob", 25.0, 0.0, vec![25.0, 25.0, 25.0]);
        assert!(uniform.is_valid());

        // mean 366.67, variance ~15555
        let spread =
            Transaction::with_history("Alice", "Bob", 100.0, 0.0, vec![500.0, 400.0, 200.0]);
        assert!(matches!(
            spread.validate(),
            Err(TransactionError::StructuringPattern { .. })
        ));
    }

    #[test]
    fn test_band_screen_rejects_amounts_above_threshold() {
        // min 10, max 12 -> threshold 10.2, variance 0.56 <= 1.08
        let history = vec![10.0, 11.0, 12.0, 11.0, 10.0];

        let inside = Transaction::with_history("Alice", "Bob", 10.1, 0.0, history.clone());
        assert!(inside.is_valid());

        let outside = Transaction::with_history("Alice", "Bob", 11.0, 0.0, history);
        match outside.validate() {
            Err(TransactionError::OutsideHistoricalBand { amount, threshold }) => {
                assert_eq!(amount, 11.0);
                assert!((threshold - 10.2).abs() < 1e-9);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_split_transaction() {
        let recipients = addresses(&["recipient1", "recipient2", "recipient3"]);
        let sender_sent = vec![1000.0, 2000.0, 1500.0];
        let mut transaction = Transaction::with_history("sender", "", 4500.0, 0.0, sender_sent.clone());
        transaction.set_recipient_list(recipients.clone());

        let outputs = transaction.split();

        assert_eq!(outputs.len(), recipients.len());
        for (output, recipient) in outputs.iter().zip(&recipients) {
            assert_eq!(output.sender(), transaction.sender());
            assert_eq!(output.recipient(), recipient);
            assert_eq!(output.amount(), 1500.0);
            assert_eq!(output.fee(), transaction.fee());
            assert_eq!(output.sender_sent(), sender_sent.as_slice());
            assert!(output.recipient_list().is_empty());
        }
    }

    #[test]
    fn test_split_preserves_total_amount() {
        let transaction = Transaction::with_recipients("Alice", addresses(&["a", "b", "c"]), 100.0, 0.05);
        let total: f64 = transaction.split().iter().map(Transaction::amount).sum();

        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_without_recipients_is_empty() {
        let transaction = Transaction::new("Alice", "Bob", 10.0, 0.0);
        assert!(transaction.split().is_empty());
    }

    #[test]
    fn test_equality_includes_timestamp() {
        let first = Transaction::new("Alice", "Bob", 10.0, 0.05);
        let copy = first.clone();
        assert_eq!(first, copy);

        let mut later = first.clone();
        later.set_timestamp(first.timestamp() + chrono::Duration::seconds(1));
        assert_ne!(first, later);

        // History is not part of the identity
        let mut annotated = first.clone();
        annotated.set_sender_sent(vec![10.0]);
        assert_eq!(first, annotated);
    }
}
