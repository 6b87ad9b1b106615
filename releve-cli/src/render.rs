//! Plain-text rendering of directives, one block per entry.

use std::fmt::Write;

use releve_core::{Amount, Directive, Posting, Transaction};

fn render_amount(amount: &Amount) -> String {
    format!("{} {}", amount.number, amount.currency)
}

fn render_posting(out: &mut String, posting: &Posting) {
    let mut line = format!("  {}  {}", posting.account, render_amount(&posting.units));
    if let Some(cost) = &posting.cost {
        let _ = write!(line, " {{{} {}, {}}}", cost.number, cost.currency, cost.date);
    }
    if let Some(price) = &posting.price {
        let _ = write!(line, " @ {}", render_amount(price));
    }
    out.push_str(&line);
    out.push('\n');
    for (key, value) in &posting.meta {
        let _ = writeln!(out, "    {key}: \"{value}\"");
    }
}

fn render_transaction(out: &mut String, txn: &Transaction) {
    let mut header = format!(
        "{} {} \"{}\" \"{}\"",
        txn.date,
        txn.flag.symbol(),
        txn.payee,
        txn.narration
    );
    for tag in &txn.tags {
        let _ = write!(header, " #{tag}");
    }
    for link in &txn.links {
        let _ = write!(header, " ^{link}");
    }
    out.push_str(&header);
    out.push('\n');
    for (key, value) in &txn.meta.extra {
        let _ = writeln!(out, "  {key}: \"{value}\"");
    }
    for posting in &txn.postings {
        render_posting(out, posting);
    }
}

/// Render a directive sequence in date-stable text form.
pub fn render(directives: &[Directive]) -> String {
    let mut out = String::new();
    for directive in directives {
        match directive {
            Directive::Open { date, account } => {
                let _ = writeln!(out, "{date} open {account}");
            }
            Directive::Commodity {
                date,
                currency,
                meta,
            } => {
                let _ = writeln!(out, "{date} commodity {currency}");
                for (key, value) in meta {
                    let _ = writeln!(out, "  {key}: \"{value}\"");
                }
            }
            Directive::Transaction(txn) => render_transaction(&mut out, txn),
            Directive::Balance(balance) => {
                let _ = writeln!(
                    out,
                    "{} balance {} {}",
                    balance.date,
                    balance.account,
                    render_amount(&balance.amount)
                );
            }
            Directive::Price {
                date,
                currency,
                amount,
            } => {
                let _ = writeln!(out, "{date} price {currency} {}", render_amount(amount));
            }
        }
        out.push('\n');
    }
    out
}
