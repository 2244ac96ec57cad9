//! Topology model
//!
//! Typed, in-memory snapshot of one full status fetch: machines,
//! applications, units and subordinate relations. Built from the raw
//! controller status plus per-application config; building rejects a
//! status that is missing the fields the analyzer depends on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::catalog::{OpenStackRelease, UbuntuSeries};
use crate::error::ModelError;

/// A charm channel: `(track, risk)`, rendered as `track/risk`.
///
/// The upgrader switches tracks but never risks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub track: String,
    pub risk: String,
}

impl Channel {
    pub fn stable(track: impl Into<String>) -> Channel {
        Channel {
            track: track.into(),
            risk: "stable".to_string(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.risk)
    }
}

impl FromStr for Channel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (track, risk) = match s.split_once('/') {
            Some((track, risk)) => (track, risk),
            None => (s, "stable"),
        };
        if track.is_empty() {
            return Err(ModelError::InvalidChannel(s.to_string()));
        }
        Ok(Channel {
            track: track.to_string(),
            risk: risk.to_string(),
        })
    }
}

/// Which configuration key an application exposes for its package origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKey {
    OpenstackOrigin,
    Source,
}

impl OriginKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKey::OpenstackOrigin => "openstack-origin",
            OriginKey::Source => "source",
        }
    }
}

/// One machine of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub id: String,
    pub az: Option<String>,
    pub hosted_apps: BTreeSet<String>,
}

/// One unit of a principal application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub application: String,
    pub machine: String,
    pub workload_version: String,
    /// Running VM count, collected for nova-compute units during the
    /// topology fetch so that planning stays pure over the snapshot.
    pub instance_count: Option<u64>,
}

/// One application of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub name: String,
    pub charm: String,
    pub channel: Channel,
    pub series: UbuntuSeries,
    /// `ch` for charmhub, `cs` for the legacy store.
    pub origin: String,
    pub subordinate_to: Vec<String>,
    pub units: BTreeMap<String, Unit>,
    pub machines: BTreeSet<String>,
    pub config: BTreeMap<String, serde_json::Value>,
    pub can_upgrade: bool,
}

impl Application {
    pub fn is_subordinate(&self) -> bool {
        !self.subordinate_to.is_empty()
    }

    /// Which of `openstack-origin` / `source` this application's config
    /// exposes, if either.
    pub fn origin_key(&self) -> Option<OriginKey> {
        if self.config.contains_key("openstack-origin") {
            Some(OriginKey::OpenstackOrigin)
        } else if self.config.contains_key("source") {
            Some(OriginKey::Source)
        } else {
            None
        }
    }

    /// Current value of the origin config, e.g. `cloud:focal-victoria`.
    pub fn origin_value(&self) -> Option<&str> {
        let key = self.origin_key()?;
        self.config.get(key.as_str()).and_then(|v| v.as_str())
    }

    /// The release configured through the origin option, when it is a
    /// `cloud:<series>-<release>` pocket or `distro`.
    pub fn origin_release(&self) -> Option<OpenStackRelease> {
        let value = self.origin_value()?;
        if value == "distro" {
            return self.series.supported_releases().first().copied();
        }
        let (_, release) = value.strip_prefix("cloud:")?.rsplit_once('-')?;
        release.parse().ok()
    }

    /// True when `action-managed-upgrade` exists and is enabled.
    pub fn action_managed_upgrade(&self) -> bool {
        self.config
            .get("action-managed-upgrade")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// The whole model: one status fetch, typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub model_name: String,
    pub machines: BTreeMap<String, Machine>,
    pub applications: BTreeMap<String, Application>,
}

impl Topology {
    /// Build the typed topology from a raw status and the per-application
    /// config maps. Missing charm name, channel or series, or a unit with
    /// an empty workload version, fail with an error naming the culprit.
    pub fn from_status(
        status: &ModelStatus,
        configs: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    ) -> Result<Topology, ModelError> {
        let mut machines: BTreeMap<String, Machine> = status
            .machines
            .iter()
            .map(|(id, machine)| {
                (
                    id.clone(),
                    Machine {
                        id: id.clone(),
                        az: machine.availability_zone.clone(),
                        hosted_apps: BTreeSet::new(),
                    },
                )
            })
            .collect();

        let mut applications = BTreeMap::new();
        for (name, app) in &status.applications {
            let charm = required(&app.charm_name, name, "charm")?;
            let channel: Channel = required(&app.channel, name, "channel")?.parse()?;
            let series_raw = required(&app.series, name, "series")?;
            let series: UbuntuSeries =
                series_raw
                    .parse()
                    .map_err(|_| ModelError::UnsupportedSeries {
                        application: name.clone(),
                        series: series_raw.to_string(),
                    })?;

            let mut units = BTreeMap::new();
            let mut app_machines = BTreeSet::new();
            for (unit_name, unit) in &app.units {
                if unit.workload_version.trim().is_empty() {
                    return Err(ModelError::EmptyWorkloadVersion {
                        application: name.clone(),
                        unit: unit_name.clone(),
                    });
                }
                app_machines.insert(unit.machine.clone());
                if let Some(machine) = machines.get_mut(&unit.machine) {
                    machine.hosted_apps.insert(name.clone());
                }
                units.insert(
                    unit_name.clone(),
                    Unit {
                        name: unit_name.clone(),
                        application: name.clone(),
                        machine: unit.machine.clone(),
                        workload_version: unit.workload_version.clone(),
                        instance_count: unit.instance_count,
                    },
                );
            }

            applications.insert(
                name.clone(),
                Application {
                    name: name.clone(),
                    charm: charm.to_string(),
                    channel,
                    series,
                    origin: app.origin.clone().unwrap_or_else(|| "ch".to_string()),
                    subordinate_to: app.subordinate_to.clone(),
                    units,
                    machines: app_machines,
                    config: configs.get(name).cloned().unwrap_or_default(),
                    can_upgrade: app.can_upgrade_to.as_deref().is_some_and(|s| !s.is_empty()),
                },
            );
        }

        // subordinates run on the machines of every principal they attach to
        let subordinate_machines: Vec<(String, BTreeSet<String>)> = applications
            .values()
            .filter(|app| app.is_subordinate())
            .map(|app| {
                let inherited = app
                    .subordinate_to
                    .iter()
                    .filter_map(|principal| applications.get(principal))
                    .flat_map(|principal| principal.machines.iter().cloned())
                    .collect();
                (app.name.clone(), inherited)
            })
            .collect();
        for (name, inherited) in subordinate_machines {
            for machine_id in &inherited {
                if let Some(machine) = machines.get_mut(machine_id) {
                    machine.hosted_apps.insert(name.clone());
                }
            }
            if let Some(app) = applications.get_mut(&name) {
                app.machines = inherited;
            }
        }

        Ok(Topology {
            model_name: status.model.name.clone(),
            machines,
            applications,
        })
    }
}

fn required<'a>(
    value: &'a Option<String>,
    application: &str,
    field: &str,
) -> Result<&'a str, ModelError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ModelError::MissingField {
            application: application.to_string(),
            field: field.to_string(),
        })
}

/// Raw status as returned by the controller façade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelStatus {
    pub model: ModelInfo,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineStatus>,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachineStatus {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default, rename = "availability-zone")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default, rename = "charm-name")]
    pub charm_name: Option<String>,
    #[serde(default, rename = "charm-channel")]
    pub channel: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    /// Store prefix of the charm URL: `ch` or `cs`.
    #[serde(default, rename = "charm-origin")]
    pub origin: Option<String>,
    #[serde(default, rename = "can-upgrade-to")]
    pub can_upgrade_to: Option<String>,
    #[serde(default, rename = "subordinate-to")]
    pub subordinate_to: Vec<String>,
    #[serde(default)]
    pub units: BTreeMap<String, UnitStatus>,
    /// Workload status summary, used by preflight checks (vault sealed).
    #[serde(default, rename = "application-status")]
    pub app_status: StatusInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitStatus {
    #[serde(default, rename = "workload-version")]
    pub workload_version: String,
    #[serde(default)]
    pub machine: String,
    /// Filled in by the topology fetch for nova-compute units.
    #[serde(default, skip_deserializing)]
    pub instance_count: Option<u64>,
}
