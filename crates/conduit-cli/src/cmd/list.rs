//! List command

use anyhow::Result;
use conduit_core::{Config, Environment, Error, PrefixData};
use crossterm::style::Stylize;

use crate::ui::table::{channel_label, list_table};

/// List the packages installed in the configured prefix.
pub fn list(config: &Config) -> Result<()> {
    let prefix = config
        .target_prefix
        .clone()
        .ok_or_else(|| Error::Configuration("no target prefix given".into()))?;
    let env = Environment::new(prefix);
    if !env.exists() {
        return Err(Error::Configuration(format!(
            "prefix does not exist: {}",
            env.root().display()
        ))
        .into());
    }
    let ledger = PrefixData::load(&env).map_err(Error::from)?;

    if config.json {
        let rows: Vec<serde_json::Value> = ledger
            .records()
            .map(|r| {
                let pkg = r.package();
                serde_json::json!({
                    "name": pkg.name,
                    "version": pkg.version,
                    "build": pkg.build,
                    "build_number": pkg.build_number,
                    "channel": channel_label(&r.repodata_record.channel, &config.channel_alias),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", "Environment:".bold(), env.root().display());
    println!();
    if ledger.is_empty() {
        println!("  No packages installed.");
        return Ok(());
    }
    println!("{}", list_table(ledger.records(), &config.channel_alias));
    println!();
    println!("  {}", format!("{} packages", ledger.len()).dark_grey());
    Ok(())
}
