use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod render;

use config::{build_importers, load_config};

#[derive(Parser, Debug)]
#[command(name = "releve", version, about = "Statement importers and price sources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify statement files into ledger entries
    Extract {
        /// Statement files (CSV or JSON exports)
        files: Vec<PathBuf>,

        /// Importer configuration
        #[arg(long, default_value = "releve.toml")]
        config: PathBuf,

        /// Write entries here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fetch the latest quotes for a list of tickers
    Prices {
        /// Source adapter: yahoo, eod or amf
        #[arg(long)]
        source: String,

        /// Tickers or ISINs, depending on the source
        tickers: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Extract {
            files,
            config,
            output,
        } => extract(&files, &config, output.as_deref()),
        Command::Prices { source, tickers } => prices(&source, &tickers),
    }
}

fn extract(
    files: &[PathBuf],
    config_path: &std::path::Path,
    output: Option<&std::path::Path>,
) -> Result<()> {
    if files.is_empty() {
        bail!("no statement files given");
    }
    let config = load_config(config_path)?;
    let importers = build_importers(&config)?;
    if importers.is_empty() {
        bail!("no importers configured in {}", config_path.display());
    }

    let mut entries = Vec::new();
    for file in files {
        let filename = file.display().to_string();
        let importer = importers
            .iter()
            .find(|imp| imp.identify(&filename))
            .with_context(|| format!("no importer claims {filename}"))?;
        log::info!("{} -> {}", filename, importer.name());
        let extracted = importer
            .extract(file, &[])
            .with_context(|| format!("extracting {filename}"))?;
        log::info!("{}: {} entries", importer.name(), extracted.len());
        entries.extend(extracted);
    }
    // date order; a balance assertion holds at the start of its day, so on a
    // tie it renders after the transactions that precede it
    entries.sort_by_key(|d| (d.date(), matches!(d, releve_core::Directive::Balance(_))));
    let rendered = render::render(&entries);

    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("write {}", path.display()))?
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn prices(source_name: &str, tickers: &[String]) -> Result<()> {
    if tickers.is_empty() {
        bail!("no tickers given");
    }
    let source = releve_prices::by_name(source_name)
        .with_context(|| format!("unknown price source '{source_name}'"))?;

    let mut missing = 0usize;
    for ticker in tickers {
        match source.get_latest_price(ticker) {
            Some(quote) => println!(
                "{} price {} {} {}",
                quote.time.date_naive(),
                ticker,
                quote.price,
                quote.currency
            ),
            None => {
                println!("; no price available for {ticker}");
                missing += 1;
            }
        }
    }
    if missing > 0 {
        bail!("{missing} ticker(s) without a quote");
    }
    Ok(())
}
