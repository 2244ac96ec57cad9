//! `cou plan`: print the upgrade plan without executing anything.

use tracing::info;

use crate::catalog::ReleaseCatalog;
use crate::commands::analyze_and_plan;
use crate::config::UpgradeContext;
use crate::error::CouError;
use crate::juju::JujuCliClient;

pub async fn execute(ctx: &UpgradeContext, quiet: bool) -> Result<(), CouError> {
    let catalog = ReleaseCatalog::load()?;
    let client = JujuCliClient::new(
        ctx.model_name.clone(),
        ctx.settings.juju_data.clone(),
        ctx.settings.call_timeout,
    );

    let (snapshot, plan) = analyze_and_plan(&client, &catalog, ctx, quiet).await?;
    info!(
        "planned upgrade of '{}' from '{}' to '{}'",
        snapshot.model_name, snapshot.current, snapshot.target
    );

    // the plan prints even in quiet mode; it is the command's output
    print!("{}", plan.render());
    Ok(())
}
