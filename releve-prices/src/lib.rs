//! Quote sources for commodities held in the ledger.
//!
//! Each adapter wraps one provider behind [`PriceSource`]. Fetch failures are
//! logged and surface as `None` so a broken provider never aborts a price
//! update run covering many tickers.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod amf;
pub mod eod;
pub mod yahoo;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Api(String),

    #[error("no quote for ticker '{0}'")]
    NotFound(String),

    #[error("bad field in provider response: {0}")]
    Decode(String),
}

impl From<releve_core::ImportError> for PriceError {
    fn from(err: releve_core::ImportError) -> Self {
        PriceError::Decode(err.to_string())
    }
}

/// One quote, in the provider's own timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePrice {
    pub price: Decimal,
    pub time: DateTime<FixedOffset>,
    pub currency: String,
}

pub trait PriceSource {
    fn name(&self) -> &str;

    /// Latest available quote for `ticker`; logs and returns `None` on any
    /// provider failure.
    fn get_latest_price(&self, ticker: &str) -> Option<SourcePrice>;
}

/// Look up a source adapter by its configured name.
pub fn by_name(name: &str) -> Option<Box<dyn PriceSource>> {
    match name {
        "yahoo" => Some(Box::new(yahoo::Source::new())),
        "eod" => Some(Box::new(eod::Source::new())),
        "amf" => Some(Box::new(amf::Source::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name() {
        assert!(by_name("yahoo").is_some());
        assert!(by_name("eod").is_some());
        assert!(by_name("amf").is_some());
        assert!(by_name("bloomberg").is_none());
    }
}
