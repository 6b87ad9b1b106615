//! Importer for securities purchase notes.
//!
//! The broker's note arrives as a JSON document extracted upstream from the
//! PDF: a settlement total plus one line per lot (ISIN, quantity, unit price,
//! trade date, all in French locale). The whole note becomes one transaction
//! dated at the earliest lot date, with a cost and price on every security
//! leg. The settlement total exceeds the sum of the lots by the broker's
//! fees, so the difference is plugged on the fee account and the cash leg
//! closes the entry.

use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use releve_core::{
    Amount, Cost, DecimalSep, Directive, Flag, ImportError, Metadata, Posting, Result,
    ThousandsSep, Transaction, check_before_add, strpdate, to_decimal,
};

use crate::importers::{Importer, basename};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(Decimal),
    Text(String),
}

impl RawNumber {
    fn decode(&self) -> Result<Decimal> {
        match self {
            RawNumber::Number(d) => Ok(*d),
            RawNumber::Text(s) => to_decimal(s, ThousandsSep::Space, DecimalSep::Comma),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Lot {
    isin: String,
    quantity: RawNumber,
    price: RawNumber,
    date: String,
}

#[derive(Debug, Deserialize)]
struct TradeNote {
    total: RawNumber,
    lots: Vec<Lot>,
}

pub struct TradeImporter {
    account_securities: String,
    account_cash: String,
    account_fees: String,
    currency: String,
    re_identify: Regex,
}

impl TradeImporter {
    pub fn new(
        account_securities: impl Into<String>,
        account_cash: impl Into<String>,
        account_fees: impl Into<String>,
        currency: impl Into<String>,
        filename_pattern: &str,
    ) -> Result<Self> {
        let re_identify = RegexBuilder::new(filename_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                ImportError::Assertion(format!("bad pattern '{filename_pattern}': {e}"))
            })?;
        Ok(TradeImporter {
            account_securities: account_securities.into(),
            account_cash: account_cash.into(),
            account_fees: account_fees.into(),
            currency: currency.into(),
            re_identify,
        })
    }

    /// ISIN -> commodity symbol, from the `isin` metadata of the commodities
    /// already declared in the ledger.
    fn commodity_table(existing: &[Directive]) -> HashMap<String, String> {
        let mut table = HashMap::new();
        for entry in existing {
            if let Directive::Commodity { currency, meta, .. } = entry {
                if let Some(isin) = meta.get("isin") {
                    if !isin.is_empty() {
                        table.insert(isin.clone(), currency.clone());
                    }
                }
            }
        }
        table
    }
}

impl Importer for TradeImporter {
    fn name(&self) -> String {
        "trade-note".to_string()
    }

    fn identify(&self, filename: &str) -> bool {
        self.re_identify.is_match(basename(filename))
    }

    fn file_account(&self) -> &str {
        &self.account_securities
    }

    fn extract(&self, path: &Path, existing: &[Directive]) -> Result<Vec<Directive>> {
        let commodities = Self::commodity_table(existing);
        let filename = path.display().to_string();
        let note: TradeNote = serde_json::from_str(&std::fs::read_to_string(path)?)?;

        let total = note.total.decode()?;
        let mut purchased = Decimal::ZERO;
        let mut date_min: Option<chrono::NaiveDate> = None;
        let mut legs: Vec<(String, Decimal, Decimal)> = Vec::new();

        for lot in &note.lots {
            let commodity = commodities.get(&lot.isin).ok_or_else(|| {
                ImportError::Assertion(format!("no commodity declared for isin {}", lot.isin))
            })?;
            let quantity = lot.quantity.decode()?;
            let price = lot.price.decode()?;
            let date = strpdate(&lot.date, "%d/%m/%Y")?;
            date_min = Some(match date_min {
                Some(d) if d <= date => d,
                _ => date,
            });
            purchased += quantity * price;
            legs.push((commodity.clone(), quantity, price));
        }
        let date = date_min.ok_or_else(|| {
            ImportError::Assertion(format!("no lots in trade note {filename}"))
        })?;

        let mut postings: Vec<Posting> = legs
            .into_iter()
            .map(|(commodity, quantity, price)| Posting {
                account: self.account_securities.clone(),
                units: Amount::new(quantity, commodity),
                cost: Some(Cost {
                    number: price,
                    currency: self.currency.clone(),
                    date,
                }),
                price: Some(Amount::new(price, &self.currency)),
                meta: Default::default(),
            })
            .collect();
        // the broker nets its fees into the settlement total
        postings.push(Posting::simple(
            &self.account_fees,
            Amount::new((total - purchased).round_dp(2), &self.currency),
        ));
        postings.push(Posting::simple(
            &self.account_cash,
            Amount::new(-total, &self.currency),
        ));

        let transac = Transaction {
            meta: Metadata::new(&filename, 1),
            date,
            flag: Flag::Warning,
            payee: "placement".to_string(),
            narration: String::new(),
            tags: BTreeSet::new(),
            links: BTreeSet::new(),
            postings,
        };
        check_before_add(&transac);
        Ok(vec![Directive::Transaction(transac)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::PathBuf;
    use std::str::FromStr;

    struct TempPath(PathBuf);

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_note(content: &str) -> TempPath {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "releve-trade-{}-{:p}.json",
            std::process::id(),
            content.as_ptr()
        ));
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        TempPath(p)
    }

    fn importer() -> TradeImporter {
        TradeImporter::new(
            "Assets:Titre:Generation-vie",
            "Assets:Titre:Generation-vie:Cash",
            "Expenses:Frais-bancaires",
            "EUR",
            r"avis-operation.*\.json",
        )
        .unwrap()
    }

    fn commodities() -> Vec<Directive> {
        let mut meta = BTreeMap::new();
        meta.insert("isin".to_string(), "FR0000000001".to_string());
        let mut meta2 = BTreeMap::new();
        meta2.insert("isin".to_string(), "LU0000000002".to_string());
        vec![
            Directive::Commodity {
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                currency: "FOND1".to_string(),
                meta,
            },
            Directive::Commodity {
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                currency: "FOND2".to_string(),
                meta: meta2,
            },
        ]
    }

    const NOTE: &str = r#"{
        "total": "1 010,00",
        "lots": [
            {"isin": "FR0000000001", "quantity": "10", "price": "50,00", "date": "15/03/2024"},
            {"isin": "LU0000000002", "quantity": "5", "price": "100,00", "date": "12/03/2024"}
        ]
    }"#;

    #[test]
    fn test_identify() {
        let imp = importer();
        assert!(imp.identify("/mnt/docs/avis-operation-2024.json"));
        assert!(!imp.identify("export-operations-01-03-2024.csv"));
    }

    #[test]
    fn test_aggregate_dated_at_earliest_lot() {
        let f = write_note(NOTE);
        let entries = importer().extract(&f.0, &commodities()).unwrap();
        assert_eq!(entries.len(), 1);
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(t.payee, "placement");
        assert_eq!(t.flag, Flag::Warning);
    }

    #[test]
    fn test_lots_carry_cost_and_price() {
        let f = write_note(NOTE);
        let entries = importer().extract(&f.0, &commodities()).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.postings[0].units, Amount::new(Decimal::from(10), "FOND1"));
        let cost = t.postings[0].cost.as_ref().unwrap();
        assert_eq!(cost.number, Decimal::from_str("50.00").unwrap());
        assert_eq!(cost.currency, "EUR");
        assert_eq!(cost.date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(
            t.postings[0].price,
            Some(Amount::new(Decimal::from_str("50.00").unwrap(), "EUR"))
        );
    }

    #[test]
    fn test_fee_plug_and_cash_leg() {
        let f = write_note(NOTE);
        let entries = importer().extract(&f.0, &commodities()).unwrap();
        let t = entries[0].as_transaction().unwrap();
        // lots are worth 1000.00, settlement is 1010.00
        let fee = &t.postings[t.postings.len() - 2];
        assert_eq!(fee.account, "Expenses:Frais-bancaires");
        assert_eq!(fee.units.number, Decimal::from_str("10.00").unwrap());
        let cash = t.postings.last().unwrap();
        assert_eq!(cash.account, "Assets:Titre:Generation-vie:Cash");
        assert_eq!(cash.units.number, Decimal::from_str("-1010.00").unwrap());
    }

    #[test]
    fn test_unknown_isin_is_fatal() {
        let f = write_note(
            r#"{"total": "100,00", "lots": [
                {"isin": "XX0000000009", "quantity": "1", "price": "100,00", "date": "15/03/2024"}
            ]}"#,
        );
        let err = importer().extract(&f.0, &commodities()).unwrap_err();
        assert!(matches!(err, ImportError::Assertion(_)));
    }
}
