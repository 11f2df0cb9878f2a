//! Install and create commands

use std::sync::Arc;

use anyhow::Result;
use conduit_core::{
    AlwaysConfirm, Config, Confirm, HttpTransport, MultiPackageCache, NullReporter, Outcome,
    Pipeline, PubGrubSolver, Reporter,
};
use tokio_util::sync::CancellationToken;

use crate::ui::{ConsoleReporter, PromptConfirm};

/// Solve `specs` for the configured prefix and apply the result.
///
/// With `create` the prefix is created if missing.
pub async fn install(
    config: &Config,
    specs: &[String],
    create: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let transport = HttpTransport::new(config)?;
    let cache = MultiPackageCache::new(
        config.pkgs_dirs(),
        Arc::new(transport.clone()),
        config.read_timeout(),
    );
    let reporter: Box<dyn Reporter> = if config.json || config.quiet {
        Box::new(NullReporter)
    } else {
        Box::new(ConsoleReporter::new(config.channel_alias.clone()))
    };

    let confirm: Box<dyn Confirm> = confirm_for(config);

    let pipeline = Pipeline::new(
        config,
        &transport,
        &PubGrubSolver,
        &cache,
        confirm.as_ref(),
        reporter.as_ref(),
        cancel,
    );
    let outcome = pipeline.install(specs, create).await?;

    if config.json {
        let value = match outcome.report() {
            Some(report) => serde_json::to_value(report)?,
            None => serde_json::json!({
                "success": true,
                "message": "All requested packages already installed",
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome {
        Outcome::DryRun(_) => reporter.info("Dry run, no changes made"),
        Outcome::Declined(_) => reporter.warning("Aborted, no changes made"),
        Outcome::NothingToDo | Outcome::Committed(_) => {}
    }
    Ok(())
}

/// JSON mode never prompts; quiet mode has no reporter to show the plan, so
/// the prompt prints it.
fn confirm_for(config: &Config) -> Box<dyn Confirm> {
    if config.json {
        Box::new(AlwaysConfirm)
    } else if config.quiet {
        Box::new(PromptConfirm::with_plan(config.channel_alias.clone()))
    } else {
        Box::new(PromptConfirm::new())
    }
}
