//! End-to-end planning scenarios over a scripted controller.

mod common;

use common::{app, context, machine, minimal_cloud, mock_for, unit, MockJuju};

use cou::analyze::{analyze, fetch_topology};
use cou::catalog::ReleaseCatalog;
use cou::config::UpgradeGroup;
use cou::error::{AnalysisError, CouError};
use cou::plan::{build_plan, preflight};
use cou::steps::Step;

async fn plan_for(mock: &MockJuju, ctx: &cou::config::UpgradeContext) -> Step {
    let catalog = ReleaseCatalog::load().unwrap();
    let topology = fetch_topology(mock).await.unwrap();
    let snapshot = analyze(&topology, &catalog, &ctx.skip_apps).unwrap();
    preflight(&snapshot, &catalog, ctx).unwrap();
    build_plan(&snapshot, &catalog, ctx).unwrap()
}

/// Assert that `expected` appears as a subsequence of the root children.
fn assert_top_level_order(plan: &Step, expected: &[&str]) {
    let descriptions: Vec<&str> = plan
        .children
        .iter()
        .map(|step| step.description.as_str())
        .collect();
    let mut position = 0;
    for needle in expected {
        let found = descriptions[position..]
            .iter()
            .position(|d| d.contains(needle));
        match found {
            Some(offset) => position += offset + 1,
            None => panic!(
                "'{needle}' not found (in order) among top-level steps: {descriptions:#?}"
            ),
        }
    }
}

#[tokio::test]
async fn s1_minimal_ussuri_to_victoria_plan() {
    let mock = mock_for(minimal_cloud());
    let plan = plan_for(&mock, &context(UpgradeGroup::Whole)).await;

    assert_top_level_order(
        &plan,
        &[
            "Verify that all OpenStack applications are in idle state",
            "Back up MySQL databases",
            "Archive old database data",
            "Upgrade plan for 'keystone' to 'victoria'",
            "Upgrade plan for 'keystone-ldap' to 'victoria'",
            "Upgrade plan for 'az-0' to 'victoria'",
            "Upgrade plan for 'ceph-osd' to 'victoria'",
            "Ensure that the 'require-osd-release' option matches the 'octopus' release",
        ],
    );

    // the zone subtree pauses, upgrades and resumes the hypervisor unit
    let az = plan
        .children
        .iter()
        .find(|step| step.description.contains("az-0"))
        .unwrap();
    let unit_steps: Vec<&str> = az
        .walk()
        .iter()
        .filter(|step| step.description.contains("nova-compute/0"))
        .map(|step| step.description.as_str())
        .collect();
    assert!(unit_steps.iter().any(|d| d.contains("Pause the unit")));
    assert!(unit_steps.iter().any(|d| d.contains("Upgrade the unit")));
    assert!(unit_steps.iter().any(|d| d.contains("Resume the unit")));

    // ceph keeps octopus across ussuri -> victoria
    let ceph = plan
        .children
        .iter()
        .find(|step| step.description.contains("ceph-osd"))
        .unwrap();
    assert!(!ceph
        .walk()
        .iter()
        .any(|step| step.description.contains("new channel")));
}

#[tokio::test]
async fn control_plane_principals_precede_hypervisors_and_data_plane() {
    let mock = mock_for(minimal_cloud());
    let plan = plan_for(&mock, &context(UpgradeGroup::Whole)).await;

    let all: Vec<&str> = plan
        .walk()
        .iter()
        .map(|step| step.description.as_str())
        .collect();
    let keystone = all
        .iter()
        .position(|d| d.contains("Upgrade plan for 'keystone'"))
        .unwrap();
    let hypervisor = all
        .iter()
        .position(|d| d.contains("Upgrade plan for 'az-0'"))
        .unwrap();
    let ceph = all
        .iter()
        .position(|d| d.contains("Upgrade plan for 'ceph-osd'"))
        .unwrap();
    assert!(keystone < hypervisor);
    assert!(hypervisor < ceph);
}

#[tokio::test]
async fn app_subtrees_end_with_workload_verification() {
    let mock = mock_for(minimal_cloud());
    let plan = plan_for(&mock, &context(UpgradeGroup::Whole)).await;

    for name in ["keystone", "ceph-osd"] {
        let subtree = plan
            .children
            .iter()
            .find(|step| step.description.contains(&format!("'{name}'")))
            .unwrap();
        let last = subtree.children.last().unwrap();
        assert!(
            last.description.contains("has been upgraded"),
            "'{name}' subtree ends with '{}'",
            last.description
        );
    }

    // subordinates explicitly omit the verification
    let ldap = plan
        .children
        .iter()
        .find(|step| step.description.contains("keystone-ldap"))
        .unwrap();
    assert!(!ldap
        .walk()
        .iter()
        .any(|step| step.description.contains("has been upgraded")));
}

#[tokio::test]
async fn data_plane_principals_verify_nova_first() {
    let mock = mock_for(minimal_cloud());
    let plan = plan_for(&mock, &context(UpgradeGroup::Whole)).await;

    let ceph = plan
        .children
        .iter()
        .find(|step| step.description.contains("Upgrade plan for 'ceph-osd'"))
        .unwrap();
    assert!(ceph.children[0]
        .description
        .contains("Verify that all 'nova-compute' units are upgraded to 'victoria'"));
}

#[tokio::test]
async fn s2_skip_apps_excludes_vault() {
    let mut status = minimal_cloud();
    status.applications.insert(
        "vault".to_string(),
        app("vault", "1.7/stable", vec![("vault/0", unit("0", "1.7.9"))]),
    );
    let mock = mock_for(status);
    let mut ctx = context(UpgradeGroup::Whole);
    ctx.skip_apps = vec!["vault".to_string()];
    let plan = plan_for(&mock, &ctx).await;

    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("Upgrade plan for 'vault'")));
    assert!(plan
        .walk()
        .iter()
        .any(|step| step.description.contains("Skipping application 'vault'")));
}

#[tokio::test]
async fn s3_mixed_releases_fail_analysis() {
    let mut status = minimal_cloud();
    status.applications.insert(
        "nova-compute".to_string(),
        app(
            "nova-compute",
            "ussuri/stable",
            vec![
                ("nova-compute/0", unit("1", "21.0.0")),
                ("nova-compute/1", unit("2", "22.0.0")),
            ],
        ),
    );
    let mock = mock_for(status);
    let catalog = ReleaseCatalog::load().unwrap();
    let topology = fetch_topology(&mock).await.unwrap();

    let err = analyze(&topology, &catalog, &[]).unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::MixedReleases { ref application, .. } if application == "nova-compute"
    ));
    assert_eq!(CouError::from(err).exit_code(), 1);
}

#[tokio::test]
async fn s4_hypervisor_az_filter() {
    let mut status = minimal_cloud();
    // control plane already on victoria so the hypervisors group is allowed
    status.applications.insert(
        "keystone".to_string(),
        app(
            "keystone",
            "victoria/stable",
            vec![("keystone/0", unit("0", "18.0.0"))],
        ),
    );
    status
        .machines
        .insert("3".to_string(), machine("host-3", "az-1"));
    status.applications.insert(
        "nova-compute".to_string(),
        app(
            "nova-compute",
            "ussuri/stable",
            vec![
                ("nova-compute/0", unit("1", "21.0.0")),
                ("nova-compute/1", unit("3", "21.0.0")),
            ],
        ),
    );
    let mock = mock_for(status);
    let mut ctx = context(UpgradeGroup::Hypervisors);
    ctx.azs = vec!["az-1".to_string()];
    let plan = plan_for(&mock, &ctx).await;

    assert!(plan
        .walk()
        .iter()
        .any(|step| step.description.contains("'az-1'")));
    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("'az-0'")));
    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("nova-compute/0")));
}

#[tokio::test]
async fn s6_occupied_hypervisor_needs_force() {
    let mut status = minimal_cloud();
    status.applications.insert(
        "keystone".to_string(),
        app(
            "keystone",
            "victoria/stable",
            vec![("keystone/0", unit("0", "18.0.0"))],
        ),
    );
    let mock = mock_for(status).with_instance_count("nova-compute/0", 1);
    let ctx = context(UpgradeGroup::Hypervisors);
    let plan = plan_for(&mock, &ctx).await;

    assert!(plan
        .walk()
        .iter()
        .any(|step| step.description.contains("Machine '1' left out")));
    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("Pause the unit")));

    // forcing includes the machine and drops the VM check
    let mut status = minimal_cloud();
    status.applications.insert(
        "keystone".to_string(),
        app(
            "keystone",
            "victoria/stable",
            vec![("keystone/0", unit("0", "18.0.0"))],
        ),
    );
    let mock = mock_for(status).with_instance_count("nova-compute/0", 1);
    let mut ctx = context(UpgradeGroup::Hypervisors);
    ctx.force = true;
    let plan = plan_for(&mock, &ctx).await;

    assert!(plan
        .walk()
        .iter()
        .any(|step| step.description.contains("Pause the unit: 'nova-compute/0'")));
    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("no VMs running")));
}

#[tokio::test]
async fn analysis_is_idempotent_over_the_same_status() {
    let mock = mock_for(minimal_cloud());
    let catalog = ReleaseCatalog::load().unwrap();
    let topology = fetch_topology(&mock).await.unwrap();

    let first = analyze(&topology, &catalog, &[]).unwrap();
    let second = analyze(&topology, &catalog, &[]).unwrap();
    assert_eq!(first, second);

    let plan_a = build_plan(&first, &catalog, &context(UpgradeGroup::Whole)).unwrap();
    let plan_b = build_plan(&second, &catalog, &context(UpgradeGroup::Whole)).unwrap();
    assert_eq!(plan_a.render(), plan_b.render());
}

#[tokio::test]
async fn subordinate_inherits_data_plane_placement() {
    let mock = mock_for(minimal_cloud());
    let catalog = ReleaseCatalog::load().unwrap();
    let topology = fetch_topology(&mock).await.unwrap();
    let snapshot = analyze(&topology, &catalog, &[]).unwrap();

    let ovn = snapshot
        .apps
        .iter()
        .find(|app| app.name() == "ovn-chassis")
        .unwrap();
    assert_eq!(
        ovn.classification,
        cou::catalog::Classification::DataPlaneSubordinate
    );
    // it follows its principal's release
    assert_eq!(ovn.release, snapshot.current);
}

#[tokio::test]
async fn missing_subordinate_steps_are_pruned() {
    // ovn-chassis is already on the right track and cannot refresh, so it
    // contributes no subtree at all
    let mock = mock_for(minimal_cloud());
    let plan = plan_for(&mock, &context(UpgradeGroup::Whole)).await;
    assert!(!plan
        .walk()
        .iter()
        .any(|step| step.description.contains("ovn-chassis")));
}
