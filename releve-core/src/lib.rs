//! releve-core: ledger data model, locale decoding, rule tables and entry
//! validation shared by the statement importers.

pub mod decode;
pub mod error;
pub mod ledger;
pub mod rules;

pub use decode::{DecimalSep, ThousandsSep, strpdate, to_decimal};
pub use error::{ImportError, Result};
pub use ledger::{
    Amount, BalanceAssertion, Cost, Directive, Flag, Metadata, Posting, Transaction,
    check_before_add, validate,
};
pub use rules::{RuleTable, capitalize};
