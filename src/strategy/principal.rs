//! Canonical principal strategy
//!
//! The all-at-once sequence for principal applications, OpenStack and
//! auxiliary alike: make sure the channel refresh drives the upgrade, bring
//! packages current, refresh the charm, switch the channel, move the
//! package origin, then verify the workload actually moved. Auxiliary
//! charms differ only in where their target channel comes from (the track
//! mapping) and in the long idle timeout for the slow settlers.

use tracing::info;

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::ReleaseCatalog;
use crate::config::UpgradeContext;
use crate::error::PlanError;
use crate::steps::{Action, Step};
use crate::strategy::{new_origin, package_upgrade_steps, wait_app_idle, wait_model_idle};

pub fn plan(
    app: &AnalyzedApp,
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Option<Step>, PlanError> {
    let target = snapshot.target;
    let name = app.name();
    let target_channel = catalog.target_channel(app.charm(), snapshot.series, target)?;

    let origin = app.app.origin_release();
    if app.release >= target && origin.is_none_or(|release| release >= target) {
        info!(
            "'{name}' is already configured for release equal or greater than {target}; ignoring"
        );
        return Ok(None);
    }

    let long = catalog.uses_long_idle(app.charm());
    let idle_timeout = ctx.idle_timeout(long);
    let mut group = Step::group(format!("Upgrade plan for '{name}' to '{target}'"))
        .prompted()
        .for_app(name);

    if app.app.action_managed_upgrade() {
        group.add(
            Step::leaf(
                format!("Change charm config of '{name}' 'action-managed-upgrade' to 'false'"),
                Action::SetConfig {
                    app: name.to_string(),
                    key: "action-managed-upgrade".to_string(),
                    value: "false".to_string(),
                },
            )
            .for_app(name),
        );
    }

    let units: Vec<String> = app.app.units.keys().cloned().collect();
    if let Some(packages) = package_upgrade_steps(&app.app, &units) {
        group.add(packages);
    }

    if app.app.can_upgrade {
        group.add(
            Step::leaf(
                format!(
                    "Refresh '{name}' to the latest revision of '{}'",
                    app.app.channel
                ),
                Action::RefreshCharm {
                    app: name.to_string(),
                },
            )
            .for_app(name),
        );
        group.add(wait_app_idle(name, idle_timeout));
    }

    if app.app.channel != target_channel {
        group.add(
            Step::leaf(
                format!("Upgrade '{name}' to the new channel: '{target_channel}'"),
                Action::SwitchChannel {
                    app: name.to_string(),
                    channel: target_channel.clone(),
                },
            )
            .for_app(name),
        );
        group.add(wait_app_idle(name, idle_timeout));
    }

    if let Some(key) = app.app.origin_key() {
        let pocket = new_origin(snapshot.series, target);
        if app.app.origin_value() != Some(pocket.as_str()) {
            group.add(
                Step::leaf(
                    format!(
                        "Change charm config of '{name}' '{}' to '{pocket}'",
                        key.as_str()
                    ),
                    Action::SetConfig {
                        app: name.to_string(),
                        key: key.as_str().to_string(),
                        value: pocket,
                    },
                )
                .for_app(name),
            );
            group.add(wait_model_idle(ctx.idle_timeout(true)));
        }
    }

    group.add(
        Step::leaf(
            format!("Check if the workload of '{name}' has been upgraded"),
            Action::VerifyWorkload {
                app: name.to_string(),
                charm: app.charm().to_string(),
                units: None,
                target,
            },
        )
        .for_app(name),
    );

    Ok(Some(group))
}
