//! Plan builder
//!
//! Assembles the application subtrees into the cloud-wide plan: cloud
//! pre-upgrade, control-plane principals and subordinates, per-zone
//! hypervisor groups, remaining data-plane principals and subordinates,
//! and the ceph post-upgrade reconciliation. Partial invocations prune the
//! tree to the chosen group plus its relevant hooks. Building a plan never
//! touches the controller.

use std::collections::BTreeMap;

use tracing::debug;

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::{CephRelease, CharmCategory, Classification, ReleaseCatalog};
use crate::config::{UpgradeContext, UpgradeGroup};
use crate::error::PlanError;
use crate::juju::IdleScope;
use crate::model::Unit;
use crate::steps::{Action, Step};
use crate::strategy::{self, nova};

/// Sanity checks that must pass before a plan is built.
pub fn preflight(
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<(), PlanError> {
    if matches!(
        ctx.group,
        UpgradeGroup::DataPlane | UpgradeGroup::Hypervisors
    ) {
        let data_min = snapshot
            .min_data_plane_release()
            .ok_or(PlanError::NoDataPlane)?;
        // auxiliary releases fall back to channel-track floors and would
        // understate progress; judge it by the OpenStack charms alone
        let control_min = snapshot
            .apps
            .iter()
            .filter(|app| {
                app.classification == Classification::ControlPlanePrincipal
                    && catalog.category(app.charm()) == Some(CharmCategory::OpenStackPrincipal)
            })
            .map(|app| app.release)
            .min();
        if control_min.is_none_or(|control| control <= data_min) {
            return Err(PlanError::ControlPlaneNotUpgraded);
        }
    }

    let hypervisor_machines: Vec<&str> = snapshot
        .apps_in(Classification::HypervisorPrincipal)
        .flat_map(|app| app.app.units.values())
        .map(|unit| unit.machine.as_str())
        .collect();

    if !ctx.machines.is_empty() {
        let unknown: Vec<&str> = ctx
            .machines
            .iter()
            .filter(|id| !hypervisor_machines.contains(&id.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(PlanError::UnknownMachines(unknown.join(", ")));
        }
    }
    if !ctx.azs.is_empty() {
        let known_azs: Vec<String> = hypervisor_machines
            .iter()
            .filter_map(|id| snapshot.machines.get(*id))
            .filter_map(|machine| machine.az.clone())
            .collect();
        let unknown: Vec<&str> = ctx
            .azs
            .iter()
            .filter(|az| !known_azs.contains(az))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(PlanError::UnknownAvailabilityZones(unknown.join(", ")));
        }
    }
    Ok(())
}

/// Build the root plan for one invocation.
pub fn build_plan(
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Step, PlanError> {
    let mut root = Step::group(format!(
        "Upgrade cloud from '{}' to '{}'",
        snapshot.current, snapshot.target
    ));

    for step in pre_upgrade_steps(snapshot, ctx) {
        root.add(step);
    }

    if ctx.group.includes_control_plane() {
        for app in snapshot.apps_in(Classification::ControlPlanePrincipal) {
            if let Some(plan) = strategy::build_app_plan(app, snapshot, catalog, ctx)? {
                root.add(plan);
            }
        }
        for name in &snapshot.skipped {
            debug!("'{name}' excluded from the plan on operator request");
            root.add(Step::group(format!(
                "Skipping application '{name}' on operator request"
            )));
        }
        for app in snapshot.apps_in(Classification::ControlPlaneSubordinate) {
            if let Some(plan) = strategy::build_app_plan(app, snapshot, catalog, ctx)? {
                root.add(plan);
            }
        }
    }

    if ctx.group.includes_hypervisors() {
        for group in hypervisor_groups(snapshot, catalog, ctx)? {
            root.add(group);
        }
    }

    if ctx.group.includes_data_plane() {
        let has_hypervisors = snapshot
            .apps_in(Classification::HypervisorPrincipal)
            .next()
            .is_some();
        for app in snapshot.apps_in(Classification::DataPlanePrincipal) {
            if let Some(mut plan) = strategy::build_app_plan(app, snapshot, catalog, ctx)? {
                if has_hypervisors {
                    plan.children.insert(
                        0,
                        Step::leaf(
                            format!(
                                "Verify that all 'nova-compute' units are upgraded to '{}'",
                                snapshot.target
                            ),
                            Action::VerifyNovaAtTarget {
                                target: snapshot.target,
                            },
                        ),
                    );
                }
                root.add(plan);
            }
        }
        for app in snapshot.apps_in(Classification::DataPlaneSubordinate) {
            if let Some(plan) = strategy::build_app_plan(app, snapshot, catalog, ctx)? {
                root.add(plan);
            }
        }
    }

    if ctx.group.includes_data_plane()
        && snapshot
            .apps
            .iter()
            .any(|app| catalog.is_ceph_family(app.charm()))
    {
        let ceph_target = CephRelease::for_openstack(snapshot.target);
        root.add(Step::leaf(
            format!("Ensure that the 'require-osd-release' option matches the '{ceph_target}' release"),
            Action::EnsureOsdRelease,
        ));
    }

    Ok(root)
}

fn pre_upgrade_steps(snapshot: &CloudSnapshot, ctx: &UpgradeContext) -> Vec<Step> {
    let mut steps = vec![Step::leaf(
        "Verify that all OpenStack applications are in idle state",
        Action::WaitIdle {
            scope: IdleScope::Model,
            timeout: ctx.settings.standard_idle_timeout,
        },
    )];

    if snapshot.has_charm("vault") {
        steps.push(Step::leaf(
            "Verify that vault is unsealed",
            Action::CheckVaultNotSealed,
        ));
    }

    if ctx.group.includes_control_plane() {
        if ctx.backup {
            steps.push(Step::leaf("Back up MySQL databases", Action::BackupDatabase));
        }
        if ctx.archive {
            steps.push(Step::leaf(
                "Archive old database data",
                Action::ArchiveData {
                    batch_size: ctx.archive_batch_size,
                },
            ));
        }
        if ctx.purge {
            let description = match &ctx.purge_before {
                Some(before) => {
                    format!("Purge data before {before} from the shadow tables")
                }
                None => "Purge all data from the shadow tables".to_string(),
            };
            steps.push(Step::leaf(
                description,
                Action::PurgeData {
                    before: ctx.purge_before.clone(),
                },
            ));
        }
    }
    steps
}

/// One parallel group per availability zone, machines inside it upgraded
/// concurrently and each machine's units strictly one at a time. Machines
/// hosting VMs are left out (with a note in the plan) unless forced.
fn hypervisor_groups(
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Vec<Step>, PlanError> {
    let nova_apps: Vec<&AnalyzedApp> = snapshot
        .apps_in(Classification::HypervisorPrincipal)
        .collect();
    if nova_apps.is_empty() {
        return Ok(Vec::new());
    }

    // az -> machine -> hypervisor units
    let mut zones: BTreeMap<String, BTreeMap<String, Vec<&Unit>>> = BTreeMap::new();
    for app in &nova_apps {
        for unit in app.app.units.values() {
            let az = snapshot
                .machines
                .get(&unit.machine)
                .and_then(|machine| machine.az.clone())
                .unwrap_or_default();
            zones
                .entry(az)
                .or_default()
                .entry(unit.machine.clone())
                .or_default()
                .push(unit);
        }
    }

    if !ctx.azs.is_empty() {
        zones.retain(|az, _| ctx.azs.contains(az));
    }
    if !ctx.machines.is_empty() {
        for machines in zones.values_mut() {
            machines.retain(|id, _| ctx.machines.contains(id));
        }
        zones.retain(|_, machines| !machines.is_empty());
    }

    let mut groups = Vec::new();
    for (az, machines) in zones {
        let description = if az.is_empty() {
            format!("Upgrade plan for hypervisors to '{}'", snapshot.target)
        } else {
            format!("Upgrade plan for '{az}' to '{}'", snapshot.target)
        };
        let mut az_group = Step::group(description).prompted();

        let mut included: BTreeMap<String, Vec<&Unit>> = BTreeMap::new();
        for (machine, units) in machines {
            let vms: u64 = units.iter().map(|u| u.instance_count.unwrap_or(0)).sum();
            if vms > 0 && !ctx.force {
                az_group.add(Step::group(format!(
                    "Machine '{machine}' left out: hosts {vms} running VM(s); use --force to include it"
                )));
            } else {
                included.insert(machine, units);
            }
        }
        if included.is_empty() {
            groups.push(az_group);
            continue;
        }

        let zone_units: Vec<&Unit> = included.values().flatten().copied().collect();
        for &app in &nova_apps {
            let app_units: Vec<&Unit> = zone_units
                .iter()
                .filter(|unit| unit.application == app.name())
                .copied()
                .collect();
            if app_units.is_empty() {
                continue;
            }
            for step in nova::prepare_steps(app, &app_units, snapshot, catalog, ctx)? {
                az_group.add(step);
            }
        }

        let mut machine_fanout =
            Step::parallel_group(format!("Upgrade {} machine(s) in parallel", included.len()));
        for (machine, units) in &included {
            let mut machine_group = Step::group(format!("Upgrade plan for machine '{machine}'"));
            for &unit in units {
                machine_group.add(nova::unit_subtree(unit, ctx.force));
            }
            machine_fanout.add(machine_group);
        }
        az_group.add(machine_fanout);

        for &app in &nova_apps {
            let app_units: Vec<&Unit> = zone_units
                .iter()
                .filter(|unit| unit.application == app.name())
                .copied()
                .collect();
            if app_units.is_empty() {
                continue;
            }
            for step in nova::finish_steps(app, &app_units, snapshot, ctx) {
                az_group.add(step);
            }
        }

        groups.push(az_group);
    }
    Ok(groups)
}
