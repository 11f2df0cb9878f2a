//! Info command

use anyhow::Result;
use conduit_core::Config;
use conduit_core::channel::resolve_channels;
use crossterm::style::Stylize;

/// Print the effective configuration.
pub fn info(config: &Config) -> Result<()> {
    if config.json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let lw = 24;
    let show = |key: &str, value: &str| println!("  {}{value}", format!("{key:<lw$}").dark_grey());
    let list = |key: &str, values: &[String]| {
        let mut first = true;
        for value in values {
            let label = if first { key } else { "" };
            println!("  {}{value}", format!("{label:<lw$}").dark_grey());
            first = false;
        }
        if values.is_empty() {
            println!("  {}(none)", format!("{key:<lw$}").dark_grey());
        }
    };

    println!();
    println!("  {} {}", "conduit".white().bold(), env!("CARGO_PKG_VERSION").dark_grey());
    println!();

    show("root prefix", &config.root_prefix.display().to_string());
    show(
        "target prefix",
        &config
            .target_prefix
            .as_ref()
            .map_or_else(|| "(none)".to_string(), |p| p.display().to_string()),
    );
    show("platform", config.platform.as_str());
    show("user agent", conduit_core::USER_AGENT);

    let channel_urls = match resolve_channels(&config.channels, config) {
        Ok(resolved) => resolved.repo_urls().into_iter().map(|u| u.subdir_url).collect(),
        Err(e) => vec![format!("(error: {e})")],
    };
    list("channel URLs", &channel_urls);

    let paths = |dirs: Vec<std::path::PathBuf>| -> Vec<String> {
        dirs.iter().map(|d| d.display().to_string()).collect()
    };
    list("package cache", &paths(config.pkgs_dirs()));
    list("envs directories", &paths(config.envs_dirs()));
    show(
        "repodata cache",
        &config.metadata_cache_dir().display().to_string(),
    );
    show("repodata ttl", &config.local_repodata_ttl.to_string());
    show("parallel downloads", &config.max_parallel_downloads.to_string());
    show("ssl verify", &config.ssl_verify.to_string());
    show(
        "ca bundle",
        &config
            .ca_bundle()
            .map_or_else(|| "(none)".to_string(), |p| p.display().to_string()),
    );
    show("offline", &config.offline.to_string());
    println!();
    Ok(())
}
