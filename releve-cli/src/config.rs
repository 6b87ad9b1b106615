//! TOML configuration: one section per institution, rule tables as ordered
//! pattern/value pairs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use releve_core::RuleTable;
use releve_ingest::Importer;
use releve_ingest::importers::boursorama::BoursoramaImporter;
use releve_ingest::importers::generic_json::JsonImporter;
use releve_ingest::importers::postbank::PostbankImporter;
use releve_ingest::importers::sg::{SgImporter, TransferMarker};
use releve_ingest::importers::trade::TradeImporter;

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub sg: Option<SgSection>,
    pub boursorama: Option<BoursoramaSection>,
    pub postbank: Option<PostbankSection>,
    pub json: Option<JsonSection>,
    pub trade: Option<TradeSection>,
}

#[derive(Debug, Deserialize)]
pub struct SgSection {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub account: String,
    pub account_id: String,
    pub cash: Option<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub counterparties: Vec<(String, String)>,
    #[serde(default)]
    pub transfers: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct BoursoramaSection {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub account: String,
    pub account_id: String,
    pub cash: Option<String>,
    pub card: Option<String>,
    pub default_category: String,
    #[serde(default)]
    pub counterparties: Vec<(String, String)>,
    #[serde(default)]
    pub categories: Vec<(String, String)>,
    #[serde(default)]
    pub transfers: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct PostbankSection {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub account: String,
    pub cash: Option<String>,
    pub card: String,
    pub default_category: String,
    pub fee_category: String,
    #[serde(default)]
    pub counterparties: Vec<(String, String)>,
    #[serde(default)]
    pub categories: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct JsonSection {
    pub accounts: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct TradeSection {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub securities: String,
    pub cash: String,
    pub fees: String,
    pub pattern: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

fn rule_table(pairs: &[(String, String)]) -> Result<RuleTable> {
    RuleTable::new(pairs).context("compiling rule table")
}

fn transfer_markers(pairs: &[(String, String)]) -> Result<Vec<TransferMarker>> {
    pairs
        .iter()
        .map(|(pattern, account)| {
            TransferMarker::new(pattern, account.clone())
                .with_context(|| format!("compiling transfer marker '{pattern}'"))
        })
        .collect()
}

/// Instantiate every importer the config declares.
pub fn build_importers(config: &Config) -> Result<Vec<Box<dyn Importer>>> {
    let mut importers: Vec<Box<dyn Importer>> = Vec::new();
    if let Some(sg) = &config.sg {
        importers.push(Box::new(SgImporter::new(
            sg.currency.clone(),
            sg.account.clone(),
            sg.account_id.clone(),
            sg.cash.clone(),
            rule_table(&sg.counterparties)?,
            transfer_markers(&sg.transfers)?,
            sg.strict,
        )?));
    }
    if let Some(b) = &config.boursorama {
        importers.push(Box::new(BoursoramaImporter::new(
            b.currency.clone(),
            b.account.clone(),
            b.cash.clone(),
            b.card.clone(),
            b.default_category.clone(),
            b.account_id.clone(),
            rule_table(&b.counterparties)?,
            rule_table(&b.categories)?,
            transfer_markers(&b.transfers)?,
        )?));
    }
    if let Some(p) = &config.postbank {
        importers.push(Box::new(PostbankImporter::new(
            p.currency.clone(),
            p.account.clone(),
            p.cash.clone(),
            p.card.clone(),
            p.default_category.clone(),
            p.fee_category.clone(),
            rule_table(&p.counterparties)?,
            rule_table(&p.categories)?,
        )?));
    }
    if let Some(j) = &config.json {
        importers.push(Box::new(JsonImporter::new(j.accounts.clone())));
    }
    if let Some(t) = &config.trade {
        importers.push(Box::new(TradeImporter::new(
            t.securities.clone(),
            t.cash.clone(),
            t.fees.clone(),
            t.currency.clone(),
            &t.pattern,
        )?));
    }
    Ok(importers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [sg]
        account = "Assets:Banque:SG"
        account_id = "00012345678"
        cash = "Assets:Caisse"
        counterparties = [["amazon", "Amazon"]]
        transfers = [["VIREMENT INTERNE", "Assets:Epargne:Livret"]]

        [boursorama]
        account = "Assets:Banque:Boursorama"
        account_id = "bourso1"
        default_category = "Expenses:Non-affecte"

        [json]
        accounts = { "Compte courant" = "Assets:Banque:SG" }
    "#;

    #[test]
    fn test_parse_and_build() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.sg.as_ref().unwrap().currency, "EUR");
        assert!(config.postbank.is_none());
        let importers = build_importers(&config).unwrap();
        let names: Vec<String> = importers.iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec!["sg.00012345678", "boursorama.bourso1", "generic-json"]
        );
    }

    #[test]
    fn test_empty_config_builds_nothing() {
        let config: Config = toml::from_str("").unwrap();
        assert!(build_importers(&config).unwrap().is_empty());
    }

    #[test]
    fn test_bad_rule_pattern_is_an_error() {
        let config: Config = toml::from_str(
            r#"
            [sg]
            account = "Assets:Banque:SG"
            account_id = "1"
            counterparties = [["(", "broken"]]
        "#,
        )
        .unwrap();
        assert!(build_importers(&config).is_err());
    }
}
