//! Table rendering for plans and installed-package listings.

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, Table};
use conduit_core::transaction::{ChangeKind, TransactionPlan};
use conduit_schema::PrefixRecord;
use crossterm::style::Stylize;

/// Channels under this prefix are the implicit defaults and shown blank.
const DEFAULTS_PREFIX: &str = "https://repo.anaconda.com/pkgs/";

/// Short channel label: blank for defaults, alias stripped for named channels.
pub fn channel_label(channel: &str, channel_alias: &str) -> String {
    if channel.starts_with(DEFAULTS_PREFIX) {
        return String::new();
    }
    let alias = channel_alias.trim_end_matches('/');
    channel
        .strip_prefix(alias)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(channel)
        .to_string()
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(header.iter().map(|h| Cell::new(h)).collect::<Vec<_>>());
    table
}

/// `Name Version Build Channel`, one row per record, sorted by name.
pub fn list_table<'a>(
    records: impl IntoIterator<Item = &'a PrefixRecord>,
    channel_alias: &str,
) -> Table {
    let mut rows: Vec<&PrefixRecord> = records.into_iter().collect();
    rows.sort_by(|a, b| a.package().name.cmp(&b.package().name));

    let mut table = table(&["Name", "Version", "Build", "Channel"]);
    for record in rows {
        let pkg = record.package();
        table.add_row(vec![
            pkg.name.clone(),
            pkg.version.clone(),
            pkg.build.clone(),
            channel_label(&record.repodata_record.channel, channel_alias),
        ]);
    }
    table
}

/// One row per changed package.
pub fn plan_table(plan: &TransactionPlan, channel_alias: &str) -> Table {
    let mut table = table(&["Package", "Change", "Version", "Build", "Channel"]);
    for change in &plan.changes {
        let (version, build, channel) = match (&change.old, &change.new) {
            (Some(old), Some(new)) => (
                format!("{} -> {}", old.package.version, new.package.version),
                format!("{} -> {}", old.package.build, new.package.build),
                channel_label(&new.channel, channel_alias),
            ),
            (_, Some(rec)) | (Some(rec), None) => (
                rec.package.version.clone(),
                rec.package.build.clone(),
                channel_label(&rec.channel, channel_alias),
            ),
            (None, None) => continue,
        };
        let kind = change.kind.to_string();
        let kind = match change.kind {
            ChangeKind::Install | ChangeKind::Upgrade => kind.green().to_string(),
            ChangeKind::Remove | ChangeKind::Downgrade => kind.red().to_string(),
            ChangeKind::Change => kind.yellow().to_string(),
        };
        table.add_row(vec![change.name.clone(), kind, version, build, channel]);
    }
    table
}

/// "Install: 2, Upgrade: 1" style totals.
pub fn plan_totals(plan: &TransactionPlan) -> String {
    let kinds = [
        ChangeKind::Install,
        ChangeKind::Remove,
        ChangeKind::Upgrade,
        ChangeKind::Downgrade,
        ChangeKind::Change,
    ];
    kinds
        .iter()
        .filter_map(|kind| {
            let n = plan.changes.iter().filter(|c| c.kind == *kind).count();
            (n > 0).then(|| format!("{kind}: {n}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
