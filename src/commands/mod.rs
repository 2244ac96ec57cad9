//! Subcommand drivers

pub mod plan;
pub mod upgrade;

use crate::analyze::{analyze, fetch_topology, CloudSnapshot};
use crate::catalog::ReleaseCatalog;
use crate::config::UpgradeContext;
use crate::error::CouError;
use crate::juju::JujuClient;
use crate::steps::Step;
use crate::ui;

/// Shared front half of both subcommands: fetch, analyze, check, build.
pub(crate) async fn analyze_and_plan(
    client: &dyn JujuClient,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
    quiet: bool,
) -> Result<(CloudSnapshot, Step), CouError> {
    let spinner = (!quiet).then(|| ui::spinner("Connecting to the model..."));
    let topology = fetch_topology(client).await?;
    if let Some(spinner) = &spinner {
        spinner.set_message("Analyzing cloud...");
    }
    let snapshot = analyze(&topology, catalog, &ctx.skip_apps)?;
    if let Some(spinner) = &spinner {
        spinner.set_message("Generating upgrade plan...");
    }
    crate::plan::preflight(&snapshot, catalog, ctx)?;
    let plan = crate::plan::build_plan(&snapshot, catalog, ctx)?;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    if !quiet {
        for warning in &snapshot.warnings {
            ui::print_warning(warning);
        }
    }
    Ok((snapshot, plan))
}
