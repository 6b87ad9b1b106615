//! Importer for the JSON export of the mobile expense tracker.
//!
//! The export is an array of account objects, each carrying its transactions.
//! Every transaction has a stable `uuid`; extraction is idempotent because
//! identifiers already present in the committed ledger (or emitted earlier in
//! the same run) are skipped. Transfers appear once per account in the export,
//! so the positive leg is dropped and the negative one becomes the two-sided
//! entry.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use releve_core::{
    Amount, DecimalSep, Directive, Flag, ImportError, Metadata, Posting, Result, ThousandsSep,
    Transaction, capitalize, check_before_add, strpdate, to_decimal,
};

use crate::importers::{ErrorFlag, Importer, basename, transfer_narration};

/// Amounts arrive either as JSON numbers or as locale-formatted strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(Decimal),
    Text(String),
}

impl RawAmount {
    fn decode(&self) -> Result<Decimal> {
        match self {
            RawAmount::Number(d) => Ok(*d),
            RawAmount::Text(s) => to_decimal(s, ThousandsSep::Space, DecimalSep::Comma),
        }
    }
}

/// A category is a single name or a path of segments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCategory {
    One(String),
    Path(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct SplitExport {
    uuid: String,
    amount: RawAmount,
    category: Option<RawCategory>,
    comment: Option<String>,
    #[serde(rename = "transferAccount")]
    transfer_account: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxExport {
    uuid: String,
    date: String,
    amount: RawAmount,
    payee: Option<String>,
    category: Option<RawCategory>,
    comment: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "transferAccount")]
    transfer_account: Option<String>,
    #[serde(default)]
    splits: Vec<SplitExport>,
}

#[derive(Debug, Deserialize)]
struct AccountExport {
    label: String,
    currency: String,
    transactions: Vec<TxExport>,
}

/// Strip the diacritics the tracker's French category names carry.
fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'À' | 'Â' | 'Ä' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Î' | 'Ï' => 'I',
            'Ô' | 'Ö' => 'O',
            'Ù' | 'Û' | 'Ü' => 'U',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Normalize an export category and resolve it against the accounts already
/// opened in the ledger.
///
/// Each segment is capitalized, accents are stripped, and the result must be
/// a substring of exactly one known non-Assets account path ("OST" keeps its
/// historical spelling).
fn map_category(raw: &RawCategory, categories: &[String]) -> Result<String> {
    let joined = match raw {
        RawCategory::One(name) => capitalize(name),
        RawCategory::Path(segments) => segments
            .iter()
            .map(|s| capitalize(s))
            .collect::<Vec<_>>()
            .join(":"),
    };
    let normalized = fold_accents(joined.trim());
    if normalized == "Ost" {
        return Ok("Expenses:OST".to_string());
    }
    categories
        .iter()
        .find(|c| c.contains(&normalized))
        .cloned()
        .ok_or(ImportError::UnknownCategory(normalized))
}

pub struct JsonImporter {
    account_map: HashMap<String, String>,
    file_account: String,
}

impl JsonImporter {
    /// `account_map` translates the tracker's account labels to ledger
    /// account names.
    pub fn new(account_map: HashMap<String, String>) -> Self {
        JsonImporter {
            account_map,
            file_account: "generique".to_string(),
        }
    }

    fn mapped_account(&self, label: &str) -> Result<&str> {
        self.account_map
            .get(label)
            .map(String::as_str)
            .ok_or_else(|| ImportError::Assertion(format!("no account mapping for '{label}'")))
    }
}

impl Importer for JsonImporter {
    fn name(&self) -> String {
        "generic-json".to_string()
    }

    fn identify(&self, filename: &str) -> bool {
        basename(filename).ends_with(".json")
    }

    fn file_account(&self) -> &str {
        &self.file_account
    }

    fn extract(&self, path: &Path, existing: &[Directive]) -> Result<Vec<Directive>> {
        let mut categories: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for entry in existing {
            match entry {
                Directive::Open { account, .. } => {
                    if !account.starts_with("Assets") {
                        categories.push(account.clone());
                    }
                }
                Directive::Transaction(t) => {
                    if let Some(uuid) = t.meta.get("uuid") {
                        seen.insert(uuid.to_string());
                    }
                    for p in &t.postings {
                        if let Some(uuid) = p.meta.get("uuid") {
                            seen.insert(uuid.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        let filename = path.display().to_string();
        let accounts: Vec<AccountExport> =
            serde_json::from_str(&std::fs::read_to_string(path)?)?;

        let mut entries: Vec<Directive> = Vec::new();
        let mut flag = ErrorFlag::new(false);

        for export in &accounts {
            let account_name = self.mapped_account(&export.label)?;
            let currency = export.currency.as_str();
            for (index, tx) in export.transactions.iter().enumerate() {
                if seen.contains(&tx.uuid) {
                    log::warn!("{} already imported, skipped", tx.uuid);
                    continue;
                }
                let meta = Metadata::new(&filename, index).with("uuid", &tx.uuid);
                let date = strpdate(&tx.date, "%Y-%m-%d")?;
                let number = match tx.amount.decode() {
                    Ok(n) => n,
                    Err(err) => {
                        log::error!("bad amount for uuid {}: {err}", tx.uuid);
                        flag.row_error(err)?;
                        continue;
                    }
                };
                let units = Amount::new(number, currency);
                let tags: BTreeSet<String> = tx.tags.iter().cloned().collect();
                let payee = match tx.payee.as_deref() {
                    Some(p) if !p.trim().is_empty() => p.trim().to_string(),
                    _ => "inconnu".to_string(),
                };

                if let Some(label) = &tx.transfer_account {
                    // the mirror row in the other account covers the other
                    // direction; keep only the outgoing side
                    if number > Decimal::ZERO {
                        continue;
                    }
                    let other = self.mapped_account(label)?;
                    let transac = Transaction {
                        meta,
                        date,
                        flag: Flag::Okay,
                        payee: "Virement".to_string(),
                        narration: transfer_narration(account_name, other),
                        tags,
                        links: BTreeSet::new(),
                        postings: Posting::pair(account_name, other, units).to_vec(),
                    };
                    check_before_add(&transac);
                    seen.insert(tx.uuid.clone());
                    entries.push(Directive::Transaction(transac));
                    continue;
                }

                if tx.splits.is_empty() {
                    let category = match &tx.category {
                        Some(raw) => match map_category(raw, &categories) {
                            Ok(c) => c,
                            Err(err) => {
                                flag.row_error(err)?;
                                continue;
                            }
                        },
                        None => {
                            flag.row_error(ImportError::UnknownCategory(format!(
                                "none (uuid {})",
                                tx.uuid
                            )))?;
                            continue;
                        }
                    };
                    let transac = Transaction {
                        meta,
                        date,
                        flag: Flag::Okay,
                        payee,
                        narration: tx.comment.clone().unwrap_or_default(),
                        tags,
                        links: BTreeSet::new(),
                        postings: Posting::pair(account_name, category.as_str(), units).to_vec(),
                    };
                    check_before_add(&transac);
                    seen.insert(tx.uuid.clone());
                    entries.push(Directive::Transaction(transac));
                    continue;
                }

                // split entry: the account leg carries the full amount, each
                // split becomes a counter-leg
                let mut postings = vec![Posting::simple(account_name, units)];
                let mut comments: Vec<String> = Vec::new();
                let mut payee = payee;
                let mut transfer_note: Option<String> = None;
                let mut split_failed = false;
                for split in &tx.splits {
                    let split_number = match split.amount.decode() {
                        Ok(n) => n,
                        Err(err) => {
                            log::error!("bad split amount for uuid {}: {err}", split.uuid);
                            flag.row_error(err)?;
                            split_failed = true;
                            continue;
                        }
                    };
                    let split_units = Amount::new(-split_number, currency);
                    if let Some(label) = &split.transfer_account {
                        let other = self.mapped_account(label)?;
                        let mut leg = Posting::simple(other, split_units);
                        leg.meta.insert("uuid".to_string(), split.uuid.clone());
                        if number < Decimal::ZERO && payee == "inconnu" {
                            payee = "virement".to_string();
                            transfer_note = Some(transfer_narration(account_name, other));
                        }
                        postings.push(leg);
                    } else {
                        if let Some(comment) = &split.comment {
                            comments.push(comment.clone());
                        }
                        let category = match split
                            .category
                            .as_ref()
                            .map(|raw| map_category(raw, &categories))
                            .transpose()
                        {
                            Ok(Some(c)) => c,
                            Ok(None) => {
                                flag.row_error(ImportError::UnknownCategory(format!(
                                    "none (split uuid {})",
                                    split.uuid
                                )))?;
                                split_failed = true;
                                continue;
                            }
                            Err(err) => {
                                flag.row_error(err)?;
                                split_failed = true;
                                continue;
                            }
                        };
                        postings.push(Posting::simple(category, split_units));
                    }
                    seen.insert(split.uuid.clone());
                }
                if split_failed {
                    continue;
                }
                let transac = Transaction {
                    meta,
                    date,
                    flag: Flag::Okay,
                    payee,
                    narration: transfer_note.unwrap_or_else(|| comments.join("/")),
                    tags,
                    links: BTreeSet::new(),
                    postings,
                };
                check_before_add(&transac);
                seen.insert(tx.uuid.clone());
                entries.push(Directive::Transaction(transac));
            }
        }

        flag.finish(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempPath(PathBuf);

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_export(content: &str) -> TempPath {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "releve-json-{}-{:p}.json",
            std::process::id(),
            content.as_ptr()
        ));
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        TempPath(p)
    }

    fn importer() -> JsonImporter {
        let mut map = HashMap::new();
        map.insert("Compte courant".to_string(), "Assets:Banque:SG".to_string());
        map.insert("Livret".to_string(), "Assets:Epargne:Livret".to_string());
        JsonImporter::new(map)
    }

    fn ledger_accounts() -> Vec<Directive> {
        ["Expenses:Courses:Alimentation", "Expenses:Maison", "Assets:Banque:SG"]
            .iter()
            .map(|a| Directive::Open {
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                account: a.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_identify() {
        let imp = importer();
        assert!(imp.identify("/tmp/export-2024.json"));
        assert!(!imp.identify("/tmp/export.csv"));
    }

    #[test]
    fn test_simple_expense_with_category_path() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -12.5,
                 "payee": "Carrefour", "category": ["courses", "alimentation"],
                 "comment": "plein de la semaine"}
            ]}]"#,
        );
        let entries = importer().extract(&f.0, &ledger_accounts()).unwrap();
        assert_eq!(entries.len(), 1);
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.payee, "Carrefour");
        assert_eq!(t.narration, "plein de la semaine");
        assert_eq!(t.meta.get("uuid"), Some("u1"));
        assert_eq!(t.postings[1].account, "Expenses:Courses:Alimentation");
        assert_eq!(t.postings[1].units.number, Decimal::new(125, 1));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -12.5,
                 "category": "maison"}
            ]}]"#,
        );
        let imp = importer();
        let mut ledger = ledger_accounts();
        let first = imp.extract(&f.0, &ledger).unwrap();
        assert_eq!(first.len(), 1);
        ledger.extend(first);
        let second = imp.extract(&f.0, &ledger).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_transfer_keeps_only_outgoing_leg() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -200,
                 "transferAccount": "Livret"},
                {"uuid": "u2", "date": "2024-03-01", "amount": 200,
                 "transferAccount": "Compte courant"}
            ]}]"#,
        );
        let entries = importer().extract(&f.0, &ledger_accounts()).unwrap();
        assert_eq!(entries.len(), 1);
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.payee, "Virement");
        assert_eq!(t.narration, "SG => Livret");
        assert_eq!(t.postings[0].account, "Assets:Banque:SG");
        assert_eq!(t.postings[1].account, "Assets:Epargne:Livret");
        assert_eq!(t.postings[1].units.number, Decimal::new(200, 0));
    }

    #[test]
    fn test_splits_carry_their_own_uuid() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -150,
                 "payee": "Hypermarche",
                 "splits": [
                    {"uuid": "s1", "amount": -100, "category": "alimentation",
                     "comment": "courses"},
                    {"uuid": "s2", "amount": -50, "transferAccount": "Livret"}
                 ]}
            ]}]"#,
        );
        let entries = importer().extract(&f.0, &ledger_accounts()).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.postings.len(), 3);
        assert_eq!(t.postings[0].units.number, Decimal::new(-150, 0));
        assert_eq!(t.postings[1].account, "Expenses:Courses:Alimentation");
        assert_eq!(t.postings[1].units.number, Decimal::new(100, 0));
        assert_eq!(t.postings[2].account, "Assets:Epargne:Livret");
        assert_eq!(t.postings[2].meta.get("uuid"), Some(&"s2".to_string()));
        assert_eq!(t.narration, "courses");
    }

    #[test]
    fn test_accented_category_resolves() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -10,
                 "category": ["courses", "ALIMENTATIÖN"]}
            ]}]"#,
        );
        // fold_accents plus per-segment capitalize lands on the opened account
        let entries = importer().extract(&f.0, &ledger_accounts()).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.postings[1].account, "Expenses:Courses:Alimentation");
    }

    #[test]
    fn test_unknown_category_rejects_file() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -10,
                 "category": "cryptomonnaie"}
            ]}]"#,
        );
        let err = importer().extract(&f.0, &ledger_accounts()).unwrap_err();
        assert!(matches!(err, ImportError::Rejected(1)));
    }

    #[test]
    fn test_ost_special_case() {
        let f = write_export(
            r#"[{"label": "Compte courant", "currency": "EUR", "transactions": [
                {"uuid": "u1", "date": "2024-03-01", "amount": -30, "category": "ost"}
            ]}]"#,
        );
        let entries = importer().extract(&f.0, &ledger_accounts()).unwrap();
        let t = entries[0].as_transaction().unwrap();
        assert_eq!(t.postings[1].account, "Expenses:OST");
    }
}
