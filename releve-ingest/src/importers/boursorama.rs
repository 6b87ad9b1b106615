//! Boursorama checking-account CSV importer.
//!
//! Shapes in priority order: internal transfer (configured markers), cash
//! withdrawal, card payment, then a generic fallback that keeps the row with
//! a warning flag instead of dropping it. Card payments are dated at the
//! transaction date captured from the detail text, not the settlement date.
//!
//! When a card sub-account is configured, card payments post against it and
//! same-settlement-date totals accumulate in an explicit per-date accumulator,
//! flushed at end of file into one settlement transfer per date (linked
//! `card-<date>` for reconciliation).

use chrono::{Days, NaiveDate};
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use releve_core::{
    Amount, BalanceAssertion, DecimalSep, Directive, Flag, ImportError, Metadata, Posting, Result,
    RuleTable, ThousandsSep, Transaction, check_before_add, strpdate, to_decimal,
};

use crate::cursor::{RowCursor, decode_latin1};
use crate::importers::sg::TransferMarker;
use crate::importers::{ErrorFlag, Importer, basename, transfer_narration};

const SCHEMA: [&str; 10] = [
    "dateOp",
    "dateVal",
    "label",
    "category",
    "categoryParent",
    "amount",
    "comment",
    "accountNum",
    "accountLabel",
    "accountbalance",
];
const HEADER_SKIP: usize = 2;

pub struct BoursoramaImporter {
    currency: String,
    account_root: String,
    account_cash: Option<String>,
    account_card: Option<String>,
    cat_default: String,
    account_id: String,
    counterparty_rules: RuleTable,
    category_rules: RuleTable,
    transfer_markers: Vec<TransferMarker>,
    re_identify: Regex,
    re_withdrawal: Regex,
    re_card_guard: Regex,
    re_card: Regex,
}

impl BoursoramaImporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        currency: impl Into<String>,
        account_root: impl Into<String>,
        account_cash: Option<String>,
        account_card: Option<String>,
        cat_default: impl Into<String>,
        account_id: impl Into<String>,
        counterparty_rules: RuleTable,
        category_rules: RuleTable,
        transfer_markers: Vec<TransferMarker>,
    ) -> Result<Self> {
        let build = |p: &str| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ImportError::Assertion(format!("bad pattern '{p}': {e}")))
        };
        Ok(BoursoramaImporter {
            currency: currency.into(),
            account_root: account_root.into(),
            account_cash,
            account_card,
            cat_default: cat_default.into(),
            account_id: account_id.into(),
            counterparty_rules,
            category_rules,
            transfer_markers,
            re_identify: build(r"export-operations-\d\d-\d\d-\d\d\d\d.*\.csv")?,
            re_withdrawal: build(r"^RETRAIT DAB")?,
            re_card_guard: build(r"^CARTE \d\d/\d\d/\d\d")?,
            re_card: build(r"^CARTE (?P<date>\d\d/\d\d/\d\d)\s(?P<desc>.*?)(?:\d\sCB|\sCB)\*\d+")?,
        })
    }

    fn amount(&self, raw: &str) -> Result<Decimal> {
        to_decimal(raw, ThousandsSep::Space, DecimalSep::Comma)
    }

    fn transaction(
        &self,
        meta: Metadata,
        date: NaiveDate,
        flag: Flag,
        payee: &str,
        narration: &str,
        postings: Vec<Posting>,
    ) -> Transaction {
        Transaction {
            meta,
            date,
            flag,
            payee: payee.trim().to_string(),
            narration: narration.to_string(),
            tags: BTreeSet::new(),
            links: BTreeSet::new(),
            postings,
        }
    }

    /// Flush the per-settlement-date card totals into one transfer per date.
    fn flush_settlements(
        &self,
        filename: &str,
        settlements: BTreeMap<NaiveDate, Decimal>,
        entries: &mut Vec<Directive>,
    ) {
        let card = match &self.account_card {
            Some(card) => card,
            None => return,
        };
        for (date, total) in settlements {
            let narration = if total < Decimal::ZERO {
                transfer_narration(&self.account_root, card)
            } else {
                transfer_narration(card, &self.account_root)
            };
            let mut transac = self.transaction(
                Metadata::new(filename, 0),
                date,
                Flag::Transfer,
                "Virement",
                &narration,
                Posting::pair(&self.account_root, card.as_str(), Amount::new(total, &self.currency))
                    .to_vec(),
            );
            transac.links.insert(format!("card-{date}"));
            check_before_add(&transac);
            entries.push(Directive::Transaction(transac));
        }
    }
}

impl Importer for BoursoramaImporter {
    fn name(&self) -> String {
        format!("boursorama.{}", self.account_id)
    }

    fn identify(&self, filename: &str) -> bool {
        self.re_identify.is_match(basename(filename))
    }

    fn file_account(&self) -> &str {
        &self.account_root
    }

    fn extract(&self, path: &Path, _existing: &[Directive]) -> Result<Vec<Directive>> {
        let content = decode_latin1(&std::fs::read(path)?);
        let filename = path.display().to_string();

        let mut entries: Vec<Directive> = Vec::new();
        let mut flag = ErrorFlag::new(false);
        let mut settlements: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        let mut last_seen: Option<(NaiveDate, String, usize)> = None;

        let cursor = RowCursor::new(
            std::io::Cursor::new(content.into_bytes()),
            &SCHEMA,
            "label",
            HEADER_SKIP,
        );

        for row in cursor {
            let row = row?;
            let meta = Metadata::new(&filename, row.line).with("comment", row.detail());

            let montant = match self.amount(row.get("amount")) {
                Ok(m) => m,
                Err(err) => {
                    flag.row_error(err)?;
                    continue;
                }
            };
            let units = Amount::new(montant, &self.currency);
            let date_releve = match strpdate(row.get("dateOp"), "%Y-%m-%d") {
                Ok(d) => d,
                Err(err) => {
                    flag.row_error(err)?;
                    continue;
                }
            };
            last_seen = Some((
                date_releve,
                row.get("accountbalance").to_string(),
                row.line,
            ));

            // internal transfer, first matching marker wins
            if let Some(marker) = self
                .transfer_markers
                .iter()
                .find(|m| m.matches(row.detail()))
            {
                let narration = if montant < Decimal::ZERO {
                    transfer_narration(&self.account_root, &marker.account)
                } else {
                    transfer_narration(&marker.account, &self.account_root)
                };
                let transac = self.transaction(
                    meta,
                    date_releve,
                    Flag::Warning,
                    "Virement",
                    &narration,
                    Posting::pair(&self.account_root, marker.account.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

            // cash withdrawal
            if self.re_withdrawal.is_match(row.detail()) {
                let transac = match &self.account_cash {
                    Some(cash) => {
                        let narration = if montant < Decimal::ZERO {
                            transfer_narration(&self.account_root, cash)
                        } else {
                            transfer_narration(cash, &self.account_root)
                        };
                        self.transaction(
                            meta,
                            date_releve,
                            Flag::Warning,
                            "Retrait",
                            &narration,
                            Posting::pair(&self.account_root, cash.as_str(), units).to_vec(),
                        )
                    }
                    None => self.transaction(
                        meta,
                        date_releve,
                        Flag::Warning,
                        "Retrait",
                        "",
                        vec![Posting::simple(&self.account_root, units)],
                    ),
                };
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

            // card payment, dated at the captured transaction date
            if self.re_card_guard.is_match(row.detail()) {
                let caps = match self.re_card.captures(row.detail()) {
                    Some(c) => c,
                    None => {
                        flag.row_error(ImportError::PatternMatch {
                            line: row.line,
                            what: "card payment",
                            detail: row.detail().to_string(),
                        })?;
                        continue;
                    }
                };
                let raw_date = &caps["date"];
                let date_card =
                    match strpdate(&format!("{}/20{}", &raw_date[0..5], &raw_date[6..8]), "%d/%m/%Y") {
                        Ok(d) => d,
                        Err(err) => {
                            flag.row_error(err)?;
                            continue;
                        }
                    };
                let payee = self.counterparty_rules.resolve_counterparty(caps["desc"].trim());
                if payee.is_empty() {
                    flag.row_error(ImportError::PatternMatch {
                        line: row.line,
                        what: "card payment",
                        detail: row.detail().to_string(),
                    })?;
                    continue;
                }
                let category = self.category_rules.resolve_category(&payee, &self.cat_default);
                let spend_account = self.account_card.as_deref().unwrap_or(&self.account_root);
                if self.account_card.is_some() {
                    *settlements.entry(date_releve).or_insert(Decimal::ZERO) += montant;
                }
                let meta = meta.with("date_visa", date_card.to_string());
                let transac = self.transaction(
                    meta,
                    date_card,
                    Flag::Warning,
                    &payee,
                    "",
                    Posting::pair(spend_account, category.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

            // generic fallback: keep the row, flag it for review
            log::warn!("{}: unclassified row '{}' kept as generic", row.line, row.detail());
            let payee = self.counterparty_rules.resolve_counterparty(row.detail());
            let category = self.category_rules.resolve_category(&payee, &self.cat_default);
            let transac = self.transaction(
                meta,
                date_releve,
                Flag::Warning,
                &payee,
                "",
                Posting::pair(&self.account_root, category.as_str(), units).to_vec(),
            );
            check_before_add(&transac);
            entries.push(Directive::Transaction(transac));
        }

        self.flush_settlements(&filename, settlements, &mut entries);

        // balances hold at the start of the following day
        if let Some((date, raw_balance, line)) = last_seen {
            match self.amount(&raw_balance) {
                Ok(balance) => entries.push(Directive::Balance(BalanceAssertion {
                    meta: Metadata::new(&filename, line),
                    date: date + Days::new(1),
                    account: self.account_root.clone(),
                    amount: Amount::new(balance, &self.currency),
                })),
                Err(err) => flag.row_error(err)?,
            }
        }

        flag.finish(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempPath(PathBuf);

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_statement(name: &str, rows: &[&str]) -> TempPath {
        let mut lines = vec![
            "dateOp;dateVal;label;category;categoryParent;amount;comment;accountNum;accountLabel;accountbalance".to_string(),
            ";;;;;;;;;".to_string(),
        ];
        lines.extend(rows.iter().map(|s| s.to_string()));
        let mut p = std::env::temp_dir();
        p.push(format!("releve-bourso-{}-{name}", std::process::id()));
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(lines.join("\r\n").as_bytes()).unwrap();
        TempPath(p)
    }

    fn importer(card: Option<&str>) -> BoursoramaImporter {
        BoursoramaImporter::new(
            "EUR",
            "Assets:Banque:Boursorama",
            Some("Assets:Caisse".to_string()),
            card.map(str::to_string),
            "Expenses:Non-affecte",
            "bourso1",
            RuleTable::new(&[("amazon", "Amazon")]).unwrap(),
            RuleTable::new(&[("Amazon", "Expenses:Maison:Equipement")]).unwrap(),
            vec![TransferMarker::new("VIR SEPA M DUPONT", "Assets:Banque:SG").unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_identify() {
        let imp = importer(None);
        assert!(imp.identify("export-operations-01-03-2024_12345.csv"));
        assert!(!imp.identify("PB_Umsatzauskunft_KtoNr123_01-03-2024_1200.csv"));
    }

    #[test]
    fn test_card_payment_dated_at_transaction_date() {
        let f = write_statement(
            "card.csv",
            &[
                "2024-03-05;2024-03-05;CARTE 01/03/24 AMAZON 3 CB*4421;;;-12,34;;00012345;BOURSO;1000,00",
            ],
        );
        let imp = importer(None);
        let entries = imp.extract(&f.0, &[]).unwrap();
        // one card entry plus the trailing balance
        assert_eq!(entries.len(), 2);
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(t.payee, "Amazon");
        assert_eq!(t.postings.len(), 2);
        assert_eq!(t.postings[0].units.number, Decimal::new(-1234, 2));
        assert_eq!(t.postings[1].units.number, Decimal::new(1234, 2));
        assert_eq!(t.postings[1].account, "Expenses:Maison:Equipement");
    }

    #[test]
    fn test_trailing_balance_is_next_day() {
        let f = write_statement(
            "balance.csv",
            &[
                "2024-03-10;2024-03-10;VIR SEPA M DUPONT;;;-100,00;;00012345;BOURSO;900,00",
            ],
        );
        let imp = importer(None);
        let entries = imp.extract(&f.0, &[]).unwrap();
        let balance = entries
            .iter()
            .find_map(|d| match d {
                Directive::Balance(b) => Some(b),
                _ => None,
            })
            .unwrap();
        assert_eq!(balance.date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(balance.amount.number, Decimal::new(90000, 2));
        assert_eq!(balance.account, "Assets:Banque:Boursorama");
    }

    #[test]
    fn test_internal_transfer_marker() {
        let f = write_statement(
            "transfer.csv",
            &[
                "2024-03-10;2024-03-10;VIR SEPA M DUPONT;;;-100,00;;00012345;BOURSO;900,00",
            ],
        );
        let imp = importer(None);
        let entries = imp.extract(&f.0, &[]).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.payee, "Virement");
        assert_eq!(t.postings[1].account, "Assets:Banque:SG");
        assert_eq!(t.narration, "Boursorama => SG");
        assert_eq!(t.postings[0].units.number, -t.postings[1].units.number);
    }

    #[test]
    fn test_settlement_aggregation_per_date() {
        let f = write_statement(
            "settle.csv",
            &[
                "2024-03-05;2024-03-05;CARTE 01/03/24 AMAZON 3 CB*4421;;;-12,34;;0;B;975,00",
                "2024-03-05;2024-03-05;CARTE 02/03/24 AMAZON 3 CB*4421;;;-12,66;;0;B;975,00",
            ],
        );
        let imp = importer(Some("Assets:Banque:Boursorama-Carte"));
        let entries = imp.extract(&f.0, &[]).unwrap();
        let settlements: Vec<&Transaction> = entries
            .iter()
            .filter_map(Directive::as_transaction)
            .filter(|t| t.flag == Flag::Transfer)
            .collect();
        assert_eq!(settlements.len(), 1);
        let s = settlements[0];
        assert_eq!(s.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(s.postings[0].account, "Assets:Banque:Boursorama");
        assert_eq!(s.postings[0].units.number, Decimal::new(-2500, 2));
        assert_eq!(s.postings[1].account, "Assets:Banque:Boursorama-Carte");
        assert_eq!(s.postings[1].units.number, Decimal::new(2500, 2));
        assert!(s.links.contains("card-2024-03-05"));
        // card spends themselves hit the card sub-account
        let card_spend = entries[0].as_transaction().unwrap();
        assert_eq!(card_spend.postings[0].account, "Assets:Banque:Boursorama-Carte");
    }

    #[test]
    fn test_fallback_keeps_row_with_warning() {
        let f = write_statement(
            "fallback.csv",
            &[
                "2024-03-07;2024-03-07;PRLV SEPA ELECTRICITE DE FRANCE;;;-45,00;;0;B;955,00",
            ],
        );
        let imp = importer(None);
        let entries = imp.extract(&f.0, &[]).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.flag, Flag::Warning);
        assert_eq!(t.payee, "Prlv sepa electricite de france");
        assert_eq!(t.postings[1].account, "Expenses:Non-affecte");
    }

    #[test]
    fn test_bad_amount_rejects_whole_file() {
        let f = write_statement(
            "bad.csv",
            &[
                "2024-03-07;2024-03-07;PRLV SEPA EDF;;;-45,00;;0;B;955,00",
                "2024-03-08;2024-03-08;PRLV SEPA GDF;;;abc;;0;B;910,00",
            ],
        );
        let imp = importer(None);
        let err = imp.extract(&f.0, &[]).unwrap_err();
        assert!(matches!(err, ImportError::Rejected(1)));
    }
}
