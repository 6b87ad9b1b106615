//! Société Générale checking-account CSV importer.
//!
//! SG exports come in two column orders depending on the export screen; the
//! first data row is probed to pick the schema before the real pass. Shapes
//! handled, in priority order: cash withdrawal, internal transfer (configured
//! markers), card payment, then the wire/direct-debit/received-transfer
//! fallback. Card and fallback rows emit a single-leg entry: the counter-leg
//! is unknown at import time and left to the ledger side.

use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::Path;

use releve_core::{
    Amount, DecimalSep, Directive, Flag, ImportError, Metadata, Posting, Result, RuleTable,
    ThousandsSep, Transaction, capitalize, check_before_add, strpdate, to_decimal,
};

use crate::cursor::{DetailMatch, RowCursor, decode_latin1};
use crate::importers::{ErrorFlag, Importer, basename, transfer_narration};

const SCHEMA_1: [&str; 5] = ["date", "libelle", "detail", "montant", "devise"];
const SCHEMA_2: [&str; 5] = ["date", "detail", "montant", "devise", "libelle"];
const HEADER_SKIP: usize = 2;

/// Marker pattern identifying a sibling owned account in the detail text.
#[derive(Debug, Clone)]
pub struct TransferMarker {
    pattern: Regex,
    pub account: String,
}

impl TransferMarker {
    pub fn new(pattern: &str, account: impl Into<String>) -> std::result::Result<Self, regex::Error> {
        Ok(TransferMarker {
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            account: account.into(),
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

pub struct SgImporter {
    currency: String,
    account_root: String,
    account_id: String,
    account_cash: Option<String>,
    counterparty_rules: RuleTable,
    transfer_markers: Vec<TransferMarker>,
    strict: bool,
    re_identify: Regex,
    re_withdrawal: Regex,
    re_card_guard: Regex,
    re_card: Regex,
    re_wire_out: Regex,
    re_debit_payee: Regex,
    re_received_payee: Regex,
    re_received_loose: Regex,
}

impl SgImporter {
    pub fn new(
        currency: impl Into<String>,
        account_root: impl Into<String>,
        account_id: impl Into<String>,
        account_cash: Option<String>,
        counterparty_rules: RuleTable,
        transfer_markers: Vec<TransferMarker>,
        strict: bool,
    ) -> Result<Self> {
        let build = |p: &str| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ImportError::Assertion(format!("bad pattern '{p}': {e}")))
        };
        let account_id = account_id.into();
        let re_identify = build(&format!(
            r"(?:Export_)?{}.*\.csv",
            regex::escape(&account_id)
        ))?;
        Ok(SgImporter {
            currency: currency.into(),
            account_root: account_root.into(),
            account_id,
            account_cash,
            counterparty_rules,
            transfer_markers,
            strict,
            re_identify,
            re_withdrawal: build(r"CARTE \S+ RETRAIT DAB(?: ETRANGER| SG)? (?P<date>\d\d/\d\d)")?,
            // withdrawal rows are consumed before this guard runs, so no
            // negative lookahead on RETRAIT is needed; a row claimed here
            // that re_card cannot parse is a row error, not fallback material
            re_card_guard: build(r"^CARTE \w\d\d\d\d")?,
            re_card: build(
                r"(?:CARTE \w\d\d\d\d) (?:REMBT )?(?P<date>\d\d/\d\d) (?P<desc>.*?)(?:\d+,\d\d|COMMERCE ELECTRONIQUE|$|\s\d+IOPD)",
            )?,
            re_wire_out: build(
                r"VIR EUROPEEN EMIS\s*LOGITEL POUR: (.*?)(?: \d\d \d\d BQ \d+ CPT \S+)*? REF:",
            )?,
            re_debit_payee: build(r"DE:(.+?) ID:")?,
            re_received_payee: build(r" DE: (.+?) (?:(?:MOTIF|REF):) ")?,
            re_received_loose: build(r" DE: (.+)")?,
        })
    }

    /// SG format revisions capitalize after rule replacement.
    fn clean_counterparty(&self, raw: &str) -> String {
        capitalize(self.counterparty_rules.resolve_counterparty(raw).trim())
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

    /// Pick the field order by probing the first data row.
    fn probe_schema(&self, content: &str) -> Result<&'static [&'static str; 5]> {
        let mut cursor = RowCursor::new(
            std::io::Cursor::new(content.as_bytes().to_vec()),
            &SCHEMA_1,
            "detail",
            HEADER_SKIP,
        );
        let row = match cursor.next() {
            Some(r) => r?,
            None => return Err(ImportError::Assertion("empty statement".to_string())),
        };
        if row.get("montant") == self.currency {
            return Ok(&SCHEMA_2);
        }
        if row.get("devise") != self.currency {
            return Err(ImportError::Assertion(format!(
                "statement currency '{}' does not match configured '{}'",
                row.get("devise"),
                self.currency
            )));
        }
        Ok(&SCHEMA_1)
    }
}

impl Importer for SgImporter {
    fn name(&self) -> String {
        format!("sg.{}", self.account_id)
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
        let schema = self.probe_schema(&content)?;

        let mut entries: Vec<Directive> = Vec::new();
        let mut flag = ErrorFlag::new(self.strict);
        let cursor = RowCursor::new(
            std::io::Cursor::new(content.into_bytes()),
            schema,
            "detail",
            HEADER_SKIP,
        );

        for row in cursor {
            let row = row?;
            let meta = Metadata::new(&filename, row.line).with("comment", row.detail());

            let montant = match self.amount(row.get("montant")) {
                Ok(m) => m,
                Err(err) => {
                    flag.row_error(err)?;
                    continue;
                }
            };
            let units = Amount::new(montant, &self.currency);
            let date = match strpdate(row.get("date"), "%d/%m/%Y") {
                Ok(d) => d,
                Err(err) => {
                    flag.row_error(err)?;
                    continue;
                }
            };

            // cash withdrawal
            if row.detail().contains("RETRAIT DAB") {
                if !self.re_withdrawal.is_match(row.detail()) {
                    flag.row_error(ImportError::PatternMatch {
                        line: row.line,
                        what: "withdrawal",
                        detail: row.detail().to_string(),
                    })?;
                    continue;
                }
                let transac = match &self.account_cash {
                    Some(cash) => {
                        let narration = if montant < Decimal::ZERO {
                            transfer_narration(&self.account_root, cash)
                        } else {
                            transfer_narration(cash, &self.account_root)
                        };
                        self.transaction(
                            meta,
                            date,
                            Flag::Warning,
                            "Retrait",
                            &narration,
                            Posting::pair(&self.account_root, cash.as_str(), units).to_vec(),
                        )
                    }
                    None => {
                        let narration = if montant < Decimal::ZERO {
                            format!("retrait {}", releve_core::ledger::account::short(&self.account_root))
                        } else {
                            format!("dépôt {}", releve_core::ledger::account::short(&self.account_root))
                        };
                        self.transaction(
                            meta,
                            date,
                            Flag::Warning,
                            "Retrait",
                            &narration,
                            vec![Posting::simple(&self.account_root, units)],
                        )
                    }
                };
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

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
                    date,
                    Flag::Warning,
                    "Virement",
                    &narration,
                    Posting::pair(&self.account_root, marker.account.as_str(), units).to_vec(),
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

            // card payment
            if self.re_card_guard.is_match(row.detail()) {
                let payee = match self.re_card.captures(row.detail()) {
                    Some(caps) => self.clean_counterparty(&caps["desc"]),
                    None => String::new(),
                };
                if payee.is_empty() {
                    flag.row_error(ImportError::PatternMatch {
                        line: row.line,
                        what: "card payment",
                        detail: row.detail().to_string(),
                    })?;
                    continue;
                }
                let transac = self.transaction(
                    meta,
                    date,
                    Flag::Warning,
                    &payee,
                    "",
                    vec![Posting::simple(&self.account_root, units)],
                );
                check_before_add(&transac);
                entries.push(Directive::Transaction(transac));
                continue;
            }

            // wire / direct debit / received transfer fallback
            let mut payee: Option<String> = None;
            if let Some(caps) = self.re_wire_out.captures(row.detail()) {
                payee = Some(self.clean_counterparty(caps.get(1).map_or("", |m| m.as_str())));
            }
            if row.detail().contains("VIR EUROPEEN EMIS") && payee.is_none() {
                flag.row_error(ImportError::PatternMatch {
                    line: row.line,
                    what: "outgoing wire",
                    detail: row.detail().to_string(),
                })?;
                continue;
            }
            if row.detail().contains("PRELEVEMENT EUROPEEN")
                || row.detail().contains("PRLV EUROPEEN ACC")
            {
                match row.in_detail(&self.re_debit_payee, None) {
                    Some(DetailMatch::One(raw)) => {
                        payee = Some(self.clean_counterparty(raw.trim()));
                    }
                    _ => {
                        flag.row_error(ImportError::PatternMatch {
                            line: row.line,
                            what: "direct debit",
                            detail: row.detail().to_string(),
                        })?;
                        continue;
                    }
                }
            } else if row.detail().contains("VIR RECU") && payee.is_none() {
                payee = match row.in_detail(&self.re_received_payee, None) {
                    Some(DetailMatch::One(raw)) => Some(self.clean_counterparty(&raw)),
                    _ => match row.in_detail(&self.re_received_loose, None) {
                        Some(DetailMatch::One(raw)) => Some(self.clean_counterparty(&raw)),
                        _ => Some("inconnu".to_string()),
                    },
                };
            }
            if row.detail().contains("ECHEANCE PRET") {
                payee = Some("Sg".to_string());
            }
            let payee = payee
                .unwrap_or_else(|| self.clean_counterparty(&capitalize(row.get("libelle"))));
            let transac = self.transaction(
                meta,
                date,
                Flag::Warning,
                &payee,
                "",
                vec![Posting::simple(&self.account_root, units)],
            );
            check_before_add(&transac);
            entries.push(Directive::Transaction(transac));
        }

        flag.finish(entries)
    }
}
