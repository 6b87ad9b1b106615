//! Normalized double-entry ledger records produced by the importers.
//!
//! The directive set is intentionally closed: importers only ever emit the
//! variants below, and the validator runs on every transaction before it is
//! appended to a result sequence.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ImportError;

/// A signed monetary quantity in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: impl Into<String>) -> Self {
        Amount {
            number,
            currency: currency.into(),
        }
    }

    /// The exact opposite leg, same currency.
    pub fn negated(&self) -> Self {
        Amount {
            number: -self.number,
            currency: self.currency.clone(),
        }
    }
}

/// Acquisition cost attached to a security lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub number: Decimal,
    pub currency: String,
    pub date: NaiveDate,
}

/// One leg of a balanced ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: String,
    pub units: Amount,
    pub cost: Option<Cost>,
    pub price: Option<Amount>,
    pub meta: BTreeMap<String, String>,
}

impl Posting {
    pub fn simple(account: impl Into<String>, units: Amount) -> Self {
        Posting {
            account: account.into(),
            units,
            cost: None,
            price: None,
            meta: BTreeMap::new(),
        }
    }

    /// Build the canonical two-leg form: `units` on `debit`, its negation on
    /// `credit`. Per-currency zero sum holds by construction.
    pub fn pair(debit: impl Into<String>, credit: impl Into<String>, units: Amount) -> [Posting; 2] {
        let negated = units.negated();
        [
            Posting::simple(debit, units),
            Posting::simple(credit, negated),
        ]
    }
}

/// Provenance/confidence marker on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    /// Confirmed (`*`)
    Okay,
    /// Needs manual review (`!`)
    Warning,
    /// Internal transfer (`T`)
    Transfer,
}

impl Flag {
    pub fn symbol(self) -> char {
        match self {
            Flag::Okay => '*',
            Flag::Warning => '!',
            Flag::Transfer => 'T',
        }
    }
}

/// Source location plus free-form annotations (`comment`, `uuid`, `date_visa`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub filename: String,
    pub line: usize,
    pub extra: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(filename: impl Into<String>, line: usize) -> Self {
        Metadata {
            filename: filename.into(),
            line,
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// A classified statement line, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub meta: Metadata,
    pub date: NaiveDate,
    pub flag: Flag,
    pub payee: String,
    pub narration: String,
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<String>,
    pub postings: Vec<Posting>,
}

/// Asserts the balance of `account` at the start of `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceAssertion {
    pub meta: Metadata,
    pub date: NaiveDate,
    pub account: String,
    pub amount: Amount,
}

/// The closed set of records importers emit or inspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Directive {
    Open {
        date: NaiveDate,
        account: String,
    },
    Commodity {
        date: NaiveDate,
        currency: String,
        meta: BTreeMap<String, String>,
    },
    Transaction(Transaction),
    Balance(BalanceAssertion),
    Price {
        date: NaiveDate,
        currency: String,
        amount: Amount,
    },
}

impl Directive {
    pub fn date(&self) -> NaiveDate {
        match self {
            Directive::Open { date, .. } => *date,
            Directive::Commodity { date, .. } => *date,
            Directive::Transaction(t) => t.date,
            Directive::Balance(b) => b.date,
            Directive::Price { date, .. } => *date,
        }
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Directive::Transaction(t) => Some(t),
            _ => None,
        }
    }
}

/// Hierarchical account path helpers.
pub mod account {
    /// Last component of a colon-separated account path.
    pub fn leaf(name: &str) -> &str {
        name.rsplit(':').next().unwrap_or(name)
    }

    /// First component (`Assets`, `Expenses`, ...).
    pub fn root(name: &str) -> &str {
        name.split(':').next().unwrap_or(name)
    }

    /// Short display name used in transfer narrations.
    ///
    /// `Caisse` stays as-is, `Cash` leaves keep their parent for context, and
    /// category accounts drop the top-level type component.
    pub fn short(name: &str) -> String {
        let l = leaf(name);
        if l == "Caisse" {
            return "Caisse".to_string();
        }
        let parts: Vec<&str> = name.split(':').collect();
        if l == "Cash" && parts.len() >= 2 {
            return parts[parts.len() - 2..].join(":");
        }
        if matches!(parts[0], "Expenses" | "Income" | "Equity") && parts.len() > 1 {
            return parts[1..].join(":");
        }
        l.to_string()
    }
}

/// Structural invariants every transaction must satisfy before emission.
pub fn validate(txn: &Transaction) -> Result<(), ImportError> {
    if txn.postings.is_empty() {
        return Err(ImportError::Assertion(format!(
            "no postings in transaction dated {} ('{}')",
            txn.date, txn.payee
        )));
    }
    for posting in &txn.postings {
        if posting.account.trim().is_empty() {
            return Err(ImportError::Assertion(format!(
                "empty account in transaction dated {} ('{}')",
                txn.date, txn.payee
            )));
        }
    }
    Ok(())
}

/// Non-strict validation: log the offending entry and report validity, letting
/// the caller append it anyway (best effort with a visible warning).
pub fn check_before_add(txn: &Transaction) -> bool {
    match validate(txn) {
        Ok(()) => true,
        Err(err) => {
            log::error!("{err}: {txn:#?}");
            false
        }
    }
}
