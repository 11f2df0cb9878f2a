//! Console implementation of the core `Reporter`.

use std::path::Path;

use conduit_core::Reporter;
use conduit_core::transaction::TransactionPlan;
use crossterm::style::Stylize;

use super::table::{plan_table, plan_totals};

/// Line-oriented progress output on stdout.
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    channel_alias: String,
}

impl ConsoleReporter {
    /// Reporter that prints to stdout; channels under `channel_alias` are shortened.
    pub fn new(channel_alias: impl Into<String>) -> Self {
        Self {
            channel_alias: channel_alias.into(),
        }
    }
}

/// `https://host/chan/linux-64/repodata.json` -> `chan/linux-64`
fn short_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches("/repodata.json");
    let mut cut = trimmed.len();
    for _ in 0..2 {
        match trimmed[..cut].rfind('/') {
            Some(i) => cut = i,
            None => return trimmed,
        }
    }
    &trimmed[cut + 1..]
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        println!();
        println!("{}", title.bold());
    }

    fn fetching(&self, _url: &str) {}

    fn fetched(&self, url: &str, from_cache: bool) {
        let source = if from_cache { "cached" } else { "downloaded" };
        println!("  {} {:<40} {}", "✓".green(), short_url(url), source.dark_grey());
    }

    fn unavailable(&self, url: &str, reason: &str) {
        println!("  {} {:<40} {}", "✗".red(), short_url(url), reason.dark_grey());
    }

    fn transaction(&self, plan: &TransactionPlan, prefix: &Path) {
        println!();
        println!("{} {}", "Transaction in".bold(), prefix.display());
        println!();
        println!("{}", plan_table(plan, &self.channel_alias));
        println!();
        println!("  {}", plan_totals(plan).dark_grey());
    }

    fn downloading(&self, name: &str, version: &str) {
        println!("  {} {name} {}", "↓".cyan(), version.dark_grey());
    }

    fn installing(&self, _name: &str, _version: &str) {}

    fn removing(&self, _name: &str, _version: &str) {}

    fn done(&self, name: &str, version: &str, detail: &str) {
        println!(
            "  {} {name} {} {}",
            "✓".green(),
            version.dark_grey(),
            detail.dark_grey()
        );
    }

    fn failed(&self, name: &str, version: &str, reason: &str) {
        println!("  {} {name} {} {}", "✗".red(), version.dark_grey(), reason.red());
    }

    fn info(&self, msg: &str) {
        println!("  {msg}");
    }

    fn success(&self, msg: &str) {
        println!("{}", msg.green().bold());
    }

    fn warning(&self, msg: &str) {
        println!("{} {msg}", "warning:".yellow().bold());
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        println!();
        let operation = action.to_uppercase();
        println!(
            "{}",
            format!("{operation} {count} steps, elapsed {elapsed_secs:.1}s")
                .green()
                .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_url() {
        assert_eq!(
            short_url("https://conda.anaconda.org/conda-forge/linux-64/repodata.json"),
            "conda-forge/linux-64"
        );
        assert_eq!(short_url("noarch/repodata.json"), "noarch");
    }
}
