//! Hypervisor (paused-single-unit) strategy
//!
//! nova-compute units upgrade one at a time: take the unit out of the
//! scheduler, make sure it hosts nothing, pause it, run the
//! `openstack-upgrade` action, resume it and put it back. The plan builder
//! arranges these unit subtrees per machine under per-availability-zone
//! groups; this module supplies the app-scoped preparation and finish
//! steps and the per-unit subtree.

use std::collections::BTreeMap;

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::ReleaseCatalog;
use crate::config::UpgradeContext;
use crate::error::PlanError;
use crate::model::Unit;
use crate::steps::{Action, Step};
use crate::strategy::{new_origin, package_upgrade_steps, wait_app_idle, wait_model_idle};

/// App-level steps that must run before any unit of the zone is touched:
/// disable action-managed upgrades, bring packages current on the zone's
/// units, refresh the charm and switch the channel.
pub fn prepare_steps(
    app: &AnalyzedApp,
    units: &[&Unit],
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Vec<Step>, PlanError> {
    let name = app.name();
    let target_channel = catalog.target_channel(app.charm(), snapshot.series, snapshot.target)?;
    let idle_timeout = ctx.idle_timeout(catalog.uses_long_idle(app.charm()));
    let mut steps = Vec::new();

    if app.app.action_managed_upgrade() {
        steps.push(
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

    let unit_names: Vec<String> = units.iter().map(|u| u.name.clone()).collect();
    if let Some(packages) = package_upgrade_steps(&app.app, &unit_names) {
        steps.push(packages);
    }

    if app.app.can_upgrade {
        steps.push(
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
        steps.push(wait_app_idle(name, idle_timeout));
    }

    if app.app.channel != target_channel {
        steps.push(
            Step::leaf(
                format!("Upgrade '{name}' to the new channel: '{target_channel}'"),
                Action::SwitchChannel {
                    app: name.to_string(),
                    channel: target_channel,
                },
            )
            .for_app(name),
        );
        steps.push(wait_app_idle(name, idle_timeout));
    }

    Ok(steps)
}

/// The sequential subtree that moves one hypervisor unit to the target.
/// With `--force` the empty-hypervisor check is left out.
pub fn unit_subtree(unit: &Unit, force: bool) -> Step {
    let name = &unit.name;
    let mut group = Step::group(format!("Upgrade plan for unit '{name}'")).for_unit(name);

    group.add(run_action_step(
        format!("Disable nova-compute scheduler from unit '{name}'"),
        unit,
        "disable",
    ));
    if !force {
        group.add(
            Step::leaf(
                format!("Verify that unit '{name}' has no VMs running"),
                Action::CheckEmptyHypervisor { unit: name.clone() },
            )
            .for_app(&unit.application)
            .for_unit(name),
        );
    }
    group.add(run_action_step(
        format!("Pause the unit: '{name}'"),
        unit,
        "pause",
    ));
    group.add(run_action_step(
        format!("Upgrade the unit: '{name}'"),
        unit,
        "openstack-upgrade",
    ));
    group.add(run_action_step(
        format!("Resume the unit: '{name}'"),
        unit,
        "resume",
    ));
    group.add(run_action_step(
        format!("Enable nova-compute scheduler from unit '{name}'"),
        unit,
        "enable",
    ));
    group
}

/// App-level steps closing out a zone: move the origin, settle the model
/// and verify the zone's units actually upgraded.
pub fn finish_steps(
    app: &AnalyzedApp,
    units: &[&Unit],
    snapshot: &CloudSnapshot,
    ctx: &UpgradeContext,
) -> Vec<Step> {
    let name = app.name();
    let mut steps = Vec::new();

    if let Some(key) = app.app.origin_key() {
        let pocket = new_origin(snapshot.series, snapshot.target);
        if app.app.origin_release().is_none_or(|release| release < snapshot.target)
            && app.app.origin_value() != Some(pocket.as_str())
        {
            steps.push(
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
            steps.push(wait_model_idle(ctx.idle_timeout(true)));
        }
    }

    steps.push(
        Step::leaf(
            format!("Check if the workload of '{name}' has been upgraded"),
            Action::VerifyWorkload {
                app: name.to_string(),
                charm: app.charm().to_string(),
                units: Some(units.iter().map(|u| u.name.clone()).collect()),
                target: snapshot.target,
            },
        )
        .for_app(name),
    );
    steps
}

fn run_action_step(description: String, unit: &Unit, action: &str) -> Step {
    Step::leaf(
        description,
        Action::RunAction {
            unit: unit.name.clone(),
            action: action.to_string(),
            params: BTreeMap::new(),
        },
    )
    .for_app(&unit.application)
    .for_unit(&unit.name)
}
