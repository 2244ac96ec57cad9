//! Application upgrade strategies
//!
//! One strategy per charm family turns an analyzed application into the
//! ordered group of steps that moves it to the target release. Selection
//! is by upgrade-group classification plus charm-name overrides; hypervisor
//! principals are planned machine-by-machine by the plan builder instead.

pub mod ceph;
pub mod nova;
pub mod principal;
pub mod subordinate;

use std::time::Duration;

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::{Classification, OpenStackRelease, ReleaseCatalog, UbuntuSeries};
use crate::config::UpgradeContext;
use crate::error::PlanError;
use crate::juju::IdleScope;
use crate::model::Application;
use crate::steps::{Action, Step};

/// Build the upgrade subtree for one application, or `None` when nothing
/// needs doing (already upgraded, or planned elsewhere).
pub fn build_app_plan(
    app: &AnalyzedApp,
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Option<Step>, PlanError> {
    match app.classification {
        // machine-by-machine, under the availability-zone groups
        Classification::HypervisorPrincipal => Ok(None),
        Classification::ControlPlaneSubordinate | Classification::DataPlaneSubordinate => {
            subordinate::plan(app, snapshot, catalog, ctx)
        }
        Classification::DataPlanePrincipal if app.charm() == "ceph-osd" => {
            ceph::plan(app, snapshot, catalog, ctx)
        }
        Classification::ControlPlanePrincipal | Classification::DataPlanePrincipal => {
            principal::plan(app, snapshot, catalog, ctx)
        }
    }
}

pub(crate) fn wait_app_idle(app: &str, timeout: Duration) -> Step {
    Step::leaf(
        format!(
            "Wait for up to {}s for app '{}' to reach the idle state",
            timeout.as_secs(),
            app
        ),
        Action::WaitIdle {
            scope: IdleScope::Application(app.to_string()),
            timeout,
        },
    )
    .for_app(app)
}

pub(crate) fn wait_model_idle(timeout: Duration) -> Step {
    Step::leaf(
        format!(
            "Wait for up to {}s for the model to reach the idle state",
            timeout.as_secs()
        ),
        Action::WaitIdle {
            scope: IdleScope::Model,
            timeout,
        },
    )
}

/// `cloud:<series>-<release>` pocket for the target.
pub(crate) fn new_origin(series: UbuntuSeries, target: OpenStackRelease) -> String {
    format!("cloud:{series}-{target}")
}

/// Parallel per-unit package refresh, empty when the app has no units.
pub(crate) fn package_upgrade_steps(app: &Application, units: &[String]) -> Option<Step> {
    if units.is_empty() {
        return None;
    }
    let mut group = Step::parallel_group(format!(
        "Upgrade software packages of '{}' from the current APT repositories",
        app.name
    ))
    .for_app(&app.name);
    for unit in units {
        group.add(
            Step::leaf(
                format!("Upgrade software packages on unit '{unit}'"),
                Action::UpgradePackages { unit: unit.clone() },
            )
            .for_app(&app.name)
            .for_unit(unit),
        );
    }
    Some(group)
}
