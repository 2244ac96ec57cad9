//! ceph-osd strategy
//!
//! OSDs keep serving during package upgrades, so the whole application is
//! upgraded at once through the origin switch. The channel only moves when
//! the Ceph release itself moves between the two OpenStack releases; the
//! cluster-wide `require-osd-release` reconciliation runs as a cloud
//! post-upgrade step.

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::{CephRelease, ReleaseCatalog};
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
    let ceph_current = CephRelease::for_openstack(snapshot.current);
    let ceph_target = CephRelease::for_openstack(target);

    if app.app.origin_release().is_some_and(|release| release >= target) {
        return Ok(None);
    }

    let idle_timeout = ctx.idle_timeout(false);
    let mut group = Step::group(format!("Upgrade plan for '{name}' to '{target}'"))
        .prompted()
        .for_app(name);

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

    // the channel tracks the Ceph release, which often spans two
    // OpenStack releases
    if ceph_current != ceph_target {
        let channel = catalog.target_channel(app.charm(), snapshot.series, target)?;
        if app.app.channel != channel {
            group.add(
                Step::leaf(
                    format!("Upgrade '{name}' to the new channel: '{channel}'"),
                    Action::SwitchChannel {
                        app: name.to_string(),
                        channel,
                    },
                )
                .for_app(name),
            );
            group.add(wait_app_idle(name, idle_timeout));
        }
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
