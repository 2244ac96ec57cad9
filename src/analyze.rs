//! Cloud analysis
//!
//! Combines the topology with the release catalog to produce an immutable
//! snapshot: every application's derived release, the cloud's current and
//! target releases, and the upgrade-group classification. Analysis is
//! deterministic and side-effect free; the only controller traffic happens
//! in [`fetch_topology`], before analysis starts.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::catalog::{CharmCategory, Classification, OpenStackRelease, ReleaseCatalog, UbuntuSeries};
use crate::error::{AnalysisError, CouError};
use crate::juju::JujuClient;
use crate::model::{Application, Machine, ModelStatus, Topology};

/// An application with its derived release and upgrade-group placement.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedApp {
    pub app: Application,
    pub release: OpenStackRelease,
    pub classification: Classification,
}

impl AnalyzedApp {
    pub fn name(&self) -> &str {
        &self.app.name
    }

    pub fn charm(&self) -> &str {
        &self.app.charm
    }
}

/// Immutable snapshot of the cloud, consumed once by the plan builder.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSnapshot {
    pub model_name: String,
    pub series: UbuntuSeries,
    pub current: OpenStackRelease,
    pub target: OpenStackRelease,
    /// Applications in deterministic planning order.
    pub apps: Vec<AnalyzedApp>,
    pub machines: BTreeMap<String, Machine>,
    /// Hints for the operator; never fatal.
    pub warnings: Vec<String>,
    /// Applications excluded via `--skip-apps`.
    pub skipped: Vec<String>,
}

impl CloudSnapshot {
    pub fn apps_in(&self, classification: Classification) -> impl Iterator<Item = &AnalyzedApp> {
        self.apps
            .iter()
            .filter(move |app| app.classification == classification)
    }

    pub fn has_charm(&self, charm: &str) -> bool {
        self.apps.iter().any(|app| app.charm() == charm)
    }

    pub fn find_by_charm(&self, charm: &str) -> Option<&AnalyzedApp> {
        self.apps.iter().find(|app| app.charm() == charm)
    }

    /// Minimum derived release across data-plane applications, if any.
    pub fn min_data_plane_release(&self) -> Option<OpenStackRelease> {
        self.apps
            .iter()
            .filter(|app| app.classification.is_data_plane())
            .map(|app| app.release)
            .min()
    }
}

/// Fetch everything analysis needs in one pass: status, per-application
/// config, and the running-VM count of every nova-compute unit. Keeping
/// the counts on the snapshot keeps planning pure.
pub async fn fetch_topology(client: &dyn JujuClient) -> Result<Topology, CouError> {
    let mut status: ModelStatus = client.status().await?;

    let names: Vec<String> = status.applications.keys().cloned().collect();
    let configs: Vec<_> = try_join_all(
        names
            .iter()
            .map(|name| async move { client.get_config(name).await }),
    )
    .await?;
    let configs: BTreeMap<_, _> = names.into_iter().zip(configs).collect();

    for (name, app) in &mut status.applications {
        if app.charm_name.as_deref() != Some("nova-compute") {
            continue;
        }
        let unit_names: Vec<String> = app.units.keys().cloned().collect();
        let counts = try_join_all(unit_names.iter().map(|unit| {
            let client = &client;
            async move {
                let result = client
                    .run_action(unit, "instance-count", &BTreeMap::new())
                    .await?;
                Ok::<u64, crate::error::JujuError>(parse_instance_count(&result.results))
            }
        }))
        .await?;
        for (unit, count) in unit_names.iter().zip(counts) {
            debug!("unit {unit} of {name} hosts {count} instance(s)");
            if let Some(unit_status) = app.units.get_mut(unit) {
                unit_status.instance_count = Some(count);
            }
        }
    }

    Ok(Topology::from_status(&status, configs)?)
}

fn parse_instance_count(results: &BTreeMap<String, serde_json::Value>) -> u64 {
    match results.get("instance-count") {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Analyze the topology into a cloud snapshot.
pub fn analyze(
    topology: &Topology,
    catalog: &ReleaseCatalog,
    skip_apps: &[String],
) -> Result<CloudSnapshot, AnalysisError> {
    let mut warnings = Vec::new();
    let mut skipped = Vec::new();
    let mut in_scope: Vec<&Application> = Vec::new();

    for app in topology.applications.values() {
        if skip_apps.contains(&app.name) {
            if !catalog.knows_charm(&app.charm) {
                warnings.push(format!(
                    "Application '{}' uses unknown charm '{}' and is skipped on request",
                    app.name, app.charm
                ));
            }
            skipped.push(app.name.clone());
            continue;
        }
        if !catalog.knows_charm(&app.charm) {
            return Err(AnalysisError::UnknownCharm {
                application: app.name.clone(),
                charm: app.charm.clone(),
            });
        }
        in_scope.push(app);
    }

    let series = single_series(&in_scope)?;

    // principal releases first; subordinates inherit afterwards
    let mut releases: BTreeMap<String, OpenStackRelease> = BTreeMap::new();
    for app in in_scope.iter().filter(|a| !a.is_subordinate()) {
        let release = derive_principal_release(app, catalog)?;
        releases.insert(app.name.clone(), release);
    }
    for app in in_scope.iter().filter(|a| a.is_subordinate()) {
        let release = app
            .subordinate_to
            .iter()
            .filter_map(|principal| releases.get(principal))
            .min()
            .copied()
            .ok_or_else(|| AnalysisError::NoOpenStackApplications)?;
        releases.insert(app.name.clone(), release);
    }

    // the cloud release is the minimum across control-plane principals;
    // the data plane follows the control plane
    let current = in_scope
        .iter()
        .filter(|app| {
            catalog.classify(&app.charm) == Some(Classification::ControlPlanePrincipal)
        })
        .filter_map(|app| releases.get(&app.name))
        .min()
        .copied()
        .ok_or(AnalysisError::NoOpenStackApplications)?;

    // no principal, whatever its plane, may sit more than one release
    // ahead of the cloud
    for app in &in_scope {
        if app.is_subordinate() {
            continue;
        }
        let release = releases[&app.name];
        if let Some(next) = current.next() {
            if release > next {
                return Err(AnalysisError::InconsistentCloud {
                    application: app.name.clone(),
                    release: release.to_string(),
                    current: current.to_string(),
                });
            }
        }
    }

    let target = current
        .next()
        .filter(|target| series.supports(*target))
        .ok_or_else(|| AnalysisError::AlreadyAtFinalRelease {
            release: current.to_string(),
            series: series.to_string(),
        })?;

    for app in &in_scope {
        if let Ok(expected) = catalog.target_channel(&app.charm, series, current) {
            if app.origin == "ch" && app.channel.track != expected.track {
                warnings.push(format!(
                    "Application '{}' tracks channel '{}' instead of the expected '{}'",
                    app.name, app.channel, expected
                ));
            }
        }
    }
    for warning in &warnings {
        warn!("{warning}");
    }

    let mut apps: Vec<AnalyzedApp> = in_scope
        .iter()
        .map(|app| AnalyzedApp {
            app: (*app).clone(),
            release: releases[&app.name],
            classification: catalog
                .classify(&app.charm)
                .expect("charm known at this point"),
        })
        .collect();
    apps.sort_by_key(|app| {
        let (position, charm) = catalog.upgrade_order_key(app.charm());
        (position, charm, app.name().to_string())
    });

    Ok(CloudSnapshot {
        model_name: topology.model_name.clone(),
        series,
        current,
        target,
        apps,
        machines: topology.machines.clone(),
        warnings,
        skipped,
    })
}

/// Derive a principal's release. OpenStack charms go through the
/// workload-version intervals. Ceph-family charms go through the Ceph
/// table, which only bounds the release from below (one Ceph release
/// serves two OpenStack releases), so the configured origin lifts the
/// result once it points past the floor. Auxiliary charms carry no
/// OpenStack-tracking workload at all; their origin decides, with the
/// channel track's earliest compatible release as the fallback.
fn derive_principal_release(
    app: &Application,
    catalog: &ReleaseCatalog,
) -> Result<OpenStackRelease, AnalysisError> {
    match catalog.category(&app.charm) {
        Some(CharmCategory::AuxiliaryPrincipal) => {
            if let Some(release) = app.origin_release() {
                return Ok(release);
            }
            let compatible =
                catalog.releases_for_track(&app.charm, app.series, &app.channel.track);
            Ok(compatible
                .into_iter()
                .min()
                .unwrap_or(OpenStackRelease::Ussuri))
        }
        Some(CharmCategory::Ceph) => {
            let floor = derive_from_workloads(app, catalog)?;
            Ok(app.origin_release().filter(|o| *o > floor).unwrap_or(floor))
        }
        _ => derive_from_workloads(app, catalog),
    }
}

/// Minimum release across the units' workload versions; units at
/// different releases are a fatal mismatch.
fn derive_from_workloads(
    app: &Application,
    catalog: &ReleaseCatalog,
) -> Result<OpenStackRelease, AnalysisError> {
    let mut by_release: BTreeMap<OpenStackRelease, Vec<&str>> = BTreeMap::new();
    for unit in app.units.values() {
        let release = catalog
            .release_of(&app.charm, &unit.workload_version)
            .ok_or_else(|| AnalysisError::UnknownWorkloadVersion {
                application: app.name.clone(),
                unit: unit.name.clone(),
                version: unit.workload_version.clone(),
            })?;
        by_release.entry(release).or_default().push(&unit.name);
    }
    match by_release.len() {
        0 => Err(AnalysisError::NoOpenStackApplications),
        1 => Ok(*by_release.keys().next().expect("one entry")),
        _ => {
            let detail = by_release
                .iter()
                .map(|(release, units)| format!("'{release}': {units:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            Err(AnalysisError::MixedReleases {
                application: app.name.clone(),
                detail,
            })
        }
    }
}

fn single_series(apps: &[&Application]) -> Result<UbuntuSeries, AnalysisError> {
    let mut series: Vec<UbuntuSeries> = apps.iter().map(|app| app.series).collect();
    series.sort();
    series.dedup();
    match series.as_slice() {
        [] => Err(AnalysisError::NoOpenStackApplications),
        [one] => Ok(*one),
        many => Err(AnalysisError::MixedSeries(
            many.iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}
