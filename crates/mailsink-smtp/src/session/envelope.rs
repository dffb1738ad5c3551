//! Per-transaction envelope.

use crate::types::{Address, ReversePath};

/// Sender and recipients of one mail transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path from `MAIL FROM`, if a transaction was started.
    pub sender: Option<ReversePath>,
    /// Recipients in the order they were accepted.
    pub recipients: Vec<Address>,
}

impl Envelope {
    /// Creates an envelope with a sender and recipients.
    #[must_use]
    pub const fn new(sender: ReversePath, recipients: Vec<Address>) -> Self {
        Self {
            sender: Some(sender),
            recipients,
        }
    }

    /// Clears sender and recipients.
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    /// Returns `true` when no transaction data is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.recipients.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut envelope = Envelope::new(
            ReversePath::Null,
            vec![Address::new("c@d.com").unwrap()],
        );
        assert!(!envelope.is_empty());

        envelope.reset();
        assert!(envelope.is_empty());
        assert_eq!(envelope, Envelope::default());
    }
}
