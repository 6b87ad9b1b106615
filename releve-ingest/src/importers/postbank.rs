//! Postbank (DE) transaction-report CSV importer.
//!
//! The statement's `moyen` column names the payment instrument; an ordered
//! dispatch table maps it to a transaction shape so priority is data, not
//! control flow. German short dates (`dd.mm`) get their year from the
//! statement date with the January rollover rule: a January statement still
//! references December operations of the previous year.
//!
//! The file ends with a footer block in a different schema; its first row
//! carries the statement balance, asserted one day after the as-of date
//! embedded in the filename.

use chrono::{Datelike, Days, NaiveDate};
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::Path;

use releve_core::{
    Amount, BalanceAssertion, DecimalSep, Directive, Flag, ImportError, Metadata, Posting, Result,
    RuleTable, ThousandsSep, Transaction, check_before_add, strpdate, to_decimal,
};

use crate::cursor::{Row, RowCursor, decode_latin1};
use crate::importers::{ErrorFlag, Importer, basename, transfer_narration};

const SCHEMA: [&str; 8] = [
    "date", "valeur", "moyen", "detail", "autorite", "tiers", "montant", "solde",
];
const HEADER_SKIP: usize = 8;
const FOOTER_SCHEMA: [&str; 2] = ["name", "valeur"];
const FOOTER_SKIP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Withdrawal,
    WithdrawalWithFee,
    StandingOrder,
    IncomingTransfer,
    CardDebit,
    CardSettlement,
    Interest,
    DirectDebit,
    Investment,
    Tax,
    Transfer,
}

/// Instrument markers in evaluation order; the first row whose `moyen` value
/// appears in the marker list decides the shape.
const DISPATCH: &[(Shape, &[&str])] = &[
    (Shape::Withdrawal, &["Auszahlung"]),
    (
        Shape::WithdrawalWithFee,
        &[
            "Bargeldausz. GA Ausland",
            "Auszahlung Geldautomat",
            "Bargeldausz. Geldautomat",
        ],
    ),
    (Shape::StandingOrder, &["Dauerauftrag"]),
    (Shape::IncomingTransfer, &["Gutschrift"]),
    (Shape::CardDebit, &["Kartenzahlung"]),
    (Shape::CardSettlement, &["Kreditkartenumsatz"]),
    (Shape::Interest, &["Zinsen", "Zinsen/Entgelt"]),
    (Shape::DirectDebit, &["Lastschrift"]),
    (Shape::Investment, &["Umbuchung"]),
    (Shape::Tax, &["KapSt"]),
    (
        Shape::Transfer,
        &["Überweisung", "Übertrag", "Überweisung neutral"],
    ),
];

pub struct PostbankImporter {
    currency: String,
    account_root: String,
    account_cash: Option<String>,
    account_card: String,
    cat_default: String,
    cat_fee: String,
    counterparty_rules: RuleTable,
    category_rules: RuleTable,
    re_identify: Regex,
    re_statement_date: Regex,
    re_fee: Regex,
    re_atm: Regex,
    re_settlement: Regex,
    re_sepa: Regex,
}

impl PostbankImporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        currency: impl Into<String>,
        account_root: impl Into<String>,
        account_cash: Option<String>,
        account_card: impl Into<String>,
        cat_default: impl Into<String>,
        cat_fee: impl Into<String>,
        counterparty_rules: RuleTable,
        category_rules: RuleTable,
    ) -> Result<Self> {
        let build = |p: &str| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ImportError::Assertion(format!("bad pattern '{p}': {e}")))
        };
        Ok(PostbankImporter {
            currency: currency.into(),
            account_root: account_root.into(),
            account_cash,
            account_card: account_card.into(),
            cat_default: cat_default.into(),
            cat_fee: cat_fee.into(),
            counterparty_rules,
            category_rules,
            re_identify: build(r"PB_Umsatzauskunft_KtoNr\d+_\d\d-\d\d-\d\d\d\d_\d\d\d\d\.csv")?,
            re_statement_date: build(r"PB_Umsatzauskunft_KtoNr\d+_(\d\d-\d\d-\d\d\d\d)_\d+\.csv")?,
            re_fee: build(
                r"Referenz (?:VZ)?\d+(?: \d+)? Mandat (?:\d+|OFFLINE) Einreicher-ID \S\S\w+ (?P<desc>(?P<tiers>.+?)//?.+/.+(?: Terminal \d+)? (?P<date>\d\d\d\d-\d\d-\d\d)T\d\d:\d\d:\d\d (?:Folgenr\.|Verfalld\.) \d+(?: Entgelt (?P<frais>\d+,\d+) EUR)?)",
            )?,
            re_atm: build(r"(?:PGA|KBS) \d+ KRT\d+/\d\d\.\d\d (?P<desc>(?P<date>\d\d\.\d\d) \d\d\.\d\d TA-NR\. \d+ \d+ .*)")?,
            re_settlement: build(r"ABRECHNUNG VOM (?P<date>\d\d\.\d\d\.\d\d)")?,
            re_sepa: build(
                r"Referenz .* Mandat .+ Einreicher-ID \w+ (?P<desc>.*?) \S\S\S\d+ (?P<date>\d\d\.\d\d)",
            )?,
        })
    }

    /// German locale with a trailing currency glyph on the amount column.
    fn amount(&self, raw: &str) -> Result<Decimal> {
        let cleaned = raw.trim().trim_end_matches(|c: char| !c.is_ascii_digit());
        to_decimal(cleaned, ThousandsSep::Point, DecimalSep::Comma)
    }

    /// Year for a `dd.mm` capture: January statements reference the previous
    /// year's December operations.
    fn rollover_year(statement_date: NaiveDate) -> i32 {
        if statement_date.month() == 1 {
            statement_date.year() - 1
        } else {
            statement_date.year()
        }
    }

    fn clean_counterparty(&self, raw: &str) -> String {
        self.counterparty_rules.resolve_counterparty(raw.trim())
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

    /// Principal + optional fee legs against `counter_account`, balanced with
    /// the root posting.
    fn fee_split(
        &self,
        counter_account: &str,
        montant: Decimal,
        fee_capture: Option<&str>,
    ) -> Result<Vec<Posting>> {
        let mut postings = vec![Posting::simple(
            &self.account_root,
            Amount::new(montant, &self.currency),
        )];
        let fee = match fee_capture {
            Some(raw) => -to_decimal(raw, ThousandsSep::Point, DecimalSep::Comma)?,
            None => Decimal::ZERO,
        };
        let principal = montant - fee;
        postings.push(Posting::simple(
            counter_account,
            Amount::new(-principal, &self.currency),
        ));
        if fee != Decimal::ZERO {
            postings.push(Posting::simple(
                &self.cat_fee,
                Amount::new(-fee, &self.currency),
            ));
        }
        Ok(postings)
    }

    fn shape_of(moyen: &str) -> Option<Shape> {
        DISPATCH
            .iter()
            .find(|(_, markers)| markers.contains(&moyen))
            .map(|(shape, _)| *shape)
    }

    fn footer_balance(&self, content: &str, filename: &str) -> Result<Option<Directive>> {
        let caps = match self.re_statement_date.captures(basename(filename)) {
            Some(c) => c,
            None => return Ok(None),
        };
        let as_of = strpdate(caps.get(1).map_or("", |m| m.as_str()), "%d-%m-%Y")?;
        let cursor = RowCursor::new(
            std::io::Cursor::new(content.as_bytes().to_vec()),
            &FOOTER_SCHEMA,
            "name",
            FOOTER_SKIP,
        );
        for row in cursor {
            let row = row?;
            if !row.get("name").to_lowercase().contains("kontostand") {
                continue;
            }
            let montant = self.amount(row.get("valeur"))?;
            return Ok(Some(Directive::Balance(BalanceAssertion {
                meta: Metadata::new(filename, row.line),
                date: as_of + Days::new(1),
                account: self.account_root.clone(),
                amount: Amount::new(montant, &self.currency),
            })));
        }
        Ok(None)
    }

    fn classify_row(
        &self,
        row: &Row,
        filename: &str,
        entries: &mut Vec<Directive>,
    ) -> Result<()> {
        let moyen = row.get("moyen").trim().to_string();
        let shape = Self::shape_of(&moyen).ok_or_else(|| ImportError::UnknownShape {
            line: row.line,
            detail: moyen.clone(),
        })?;

        let meta = Metadata::new(filename, row.line)
            .with("comment", row.detail())
            .with("source", "Postbank csv");
        let montant = self.amount(row.get("montant"))?;
        let units = Amount::new(montant, &self.currency);
        let statement_date = strpdate(row.get("date"), "%d.%m.%Y")?;
        let pattern_err = |what: &'static str| ImportError::PatternMatch {
            line: row.line,
            what,
            detail: row.detail().to_string(),
        };

        match shape {
            Shape::Withdrawal => {
                let caps = self
                    .re_atm
                    .captures(row.detail())
                    .ok_or_else(|| pattern_err("ATM withdrawal"))?;
                let year = Self::rollover_year(statement_date);
                let date = strpdate(&format!("{}.{year}", &caps["date"]), "%d.%m.%Y")?;
                let postings = match &self.account_cash {
                    Some(cash) => Posting::pair(&self.account_root, cash.as_str(), units).to_vec(),
                    None => vec![Posting::simple(&self.account_root, units)],
                };
                let transac =
                    self.transaction(meta, date, Flag::Transfer, "Virement", "", postings);
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::WithdrawalWithFee => {
                let caps = self
                    .re_fee
                    .captures(row.detail())
                    .ok_or_else(|| pattern_err("ATM withdrawal with fee"))?;
                let date = strpdate(&caps["date"], "%Y-%m-%d")?;
                let counter = self
                    .account_cash
                    .as_deref()
                    .unwrap_or(self.cat_default.as_str());
                let postings = self.fee_split(
                    counter,
                    montant,
                    caps.name("frais").map(|m| m.as_str()),
                )?;
                let transac =
                    self.transaction(meta, date, Flag::Transfer, "Virement", "", postings);
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::StandingOrder | Shape::Transfer | Shape::Investment => {
                let field = if shape == Shape::StandingOrder {
                    "tiers"
                } else {
                    "autorite"
                };
                let payee = self.clean_counterparty(row.get(field));
                let category = self.category_rules.resolve_category(&payee, &self.cat_default);
                let transac = self.transaction(
                    meta,
                    statement_date,
                    Flag::Warning,
                    &payee,
                    "",
                    Posting::pair(&self.account_root, category.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::IncomingTransfer => {
                let payee = self.clean_counterparty(row.get("autorite"));
                let category = self.category_rules.resolve_category(&payee, &self.cat_default);
                let transac = self.transaction(
                    meta,
                    statement_date,
                    Flag::Warning,
                    &payee,
                    "",
                    Posting::pair(&self.account_root, category.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::CardDebit => {
                let caps = self
                    .re_fee
                    .captures(row.detail())
                    .ok_or_else(|| pattern_err("card debit"))?;
                let date = strpdate(&caps["date"], "%Y-%m-%d")?;
                let payee = self.clean_counterparty(&caps["tiers"]);
                let category = self.category_rules.resolve_category(&payee, &self.cat_default);
                let postings =
                    self.fee_split(&category, montant, caps.name("frais").map(|m| m.as_str()))?;
                let transac = self.transaction(meta, date, Flag::Warning, &payee, "", postings);
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::CardSettlement => {
                let caps = self
                    .re_settlement
                    .captures(row.detail())
                    .ok_or_else(|| pattern_err("card settlement"))?;
                let date_settled = strpdate(&caps["date"], "%d.%m.%y")?;
                let transac = self.transaction(
                    meta.clone(),
                    statement_date,
                    Flag::Warning,
                    "Virement",
                    &transfer_narration(&self.account_root, &self.account_card),
                    Posting::pair(&self.account_root, self.account_card.as_str(), units.clone())
                        .to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                entries.push(Directive::Balance(BalanceAssertion {
                    meta,
                    date: date_settled + Days::new(1),
                    account: self.account_card.clone(),
                    amount: units,
                }));
            }
            Shape::Interest => {
                let transac = self.transaction(
                    meta,
                    statement_date,
                    Flag::Warning,
                    "Postbank",
                    "interets",
                    Posting::pair(&self.account_root, self.cat_fee.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::Tax => {
                // withholding tax debit, routed through the category rules so
                // the config decides the tax account
                let category = self
                    .category_rules
                    .resolve_category("Impots", &self.cat_default);
                let transac = self.transaction(
                    meta,
                    statement_date,
                    Flag::Warning,
                    "Postbank",
                    "impots",
                    Posting::pair(&self.account_root, category.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
            Shape::DirectDebit => {
                if !self.re_sepa.is_match(row.detail()) {
                    return Err(pattern_err("direct debit"));
                }
                let payee = self.clean_counterparty(row.get("tiers"));
                let category = self.category_rules.resolve_category(&payee, &self.cat_default);
                let transac = self.transaction(
                    meta,
                    statement_date,
                    Flag::Warning,
                    &payee,
                    "",
                    Posting::pair(&self.account_root, category.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
            }
        }
        Ok(())
    }
}

impl Importer for PostbankImporter {
    fn name(&self) -> String {
        "postbank".to_string()
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
        let cursor = RowCursor::new(
            std::io::Cursor::new(content.as_bytes().to_vec()),
            &SCHEMA,
            "detail",
            HEADER_SKIP,
        );

        for row in cursor {
            let row = row?;
            if let Err(err) = self.classify_row(&row, &filename, &mut entries) {
                flag.row_error(err)?;
            }
        }

        if let Some(balance) = self.footer_balance(&content, &filename)? {
            entries.push(balance);
        }

        flag.finish(entries)
    }
}
