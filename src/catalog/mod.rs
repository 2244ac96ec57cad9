//! Release catalog
//!
//! Static knowledge about the charm ecosystem: the ordered release
//! sequence, which charms belong to which upgrade group, workload-version
//! and channel-track lookup tables, and the canonical control-plane
//! upgrade order. Frozen at construction; every lookup is pure.

pub mod lookup;
pub mod release;

pub use lookup::{normalize_version, TrackLookup, VersionRange, WorkloadLookup};
pub use release::{CephRelease, OpenStackRelease, UbuntuSeries};

use crate::error::CatalogError;
use crate::model::Channel;

const OPENSTACK_LOOKUP_CSV: &str = include_str!("../../data/openstack_lookup.csv");
const TRACK_MAPPING_CSV: &str = include_str!("../../data/openstack_to_track_mapping.csv");

/// Canonical control-plane upgrade order. Charms not listed here are
/// appended lexicographically by the planner.
pub const UPGRADE_ORDER: &[&str] = &[
    "rabbitmq-server",
    "ceph-mon",
    "keystone",
    "aodh",
    "barbican",
    "ceilometer",
    "ceph-fs",
    "ceph-radosgw",
    "cinder",
    "designate",
    "designate-bind",
    "glance",
    "gnocchi",
    "heat",
    "manila",
    "manila-ganesha",
    "neutron-api",
    "neutron-gateway",
    "ovn-dedicated-chassis",
    "ovn-central",
    "placement",
    "nova-cloud-controller",
    "openstack-dashboard",
    "octavia",
    "mysql-innodb-cluster",
    "vault",
];

/// Charms that need the long idle timeout after charm or workload changes.
pub const LONG_IDLE_CHARMS: &[&str] = &[
    "keystone",
    "octavia",
    "mysql-innodb-cluster",
    "rabbitmq-server",
];

/// Applications the operator may exclude with `--skip-apps`.
pub const SKIP_ALLOW_LIST: &[&str] = &["vault"];

const OPENSTACK_PRINCIPALS: &[&str] = &[
    "aodh",
    "barbican",
    "ceilometer",
    "cinder",
    "designate",
    "designate-bind",
    "glance",
    "gnocchi",
    "heat",
    "keystone",
    "manila",
    "manila-ganesha",
    "neutron-api",
    "neutron-gateway",
    "nova-cloud-controller",
    "octavia",
    "openstack-dashboard",
    "placement",
    "swift-proxy",
];

const OPENSTACK_SUBORDINATES: &[&str] = &[
    "barbican-vault",
    "cinder-backup",
    "cinder-ceph",
    "keystone-ldap",
    "keystone-saml-mellon",
    "neutron-openvswitch",
];

const AUXILIARY_PRINCIPALS: &[&str] = &[
    "ceph-fs",
    "ceph-mon",
    "ceph-radosgw",
    "mysql-innodb-cluster",
    "ovn-central",
    "ovn-dedicated-chassis",
    "rabbitmq-server",
    "vault",
];

const AUXILIARY_SUBORDINATES: &[&str] = &["hacluster", "mysql-router", "ovn-chassis"];

/// Charms that run on machines carrying user workloads.
const DATA_PLANE_PRINCIPALS: &[&str] = &["nova-compute", "ceph-osd", "swift-storage"];

/// Machines hosting these charms are hypervisors and upgrade unit by unit.
const HYPERVISOR_CHARMS: &[&str] = &["nova-compute"];

const DATA_PLANE_SUBORDINATES: &[&str] = &["ovn-chassis", "ceilometer-agent"];

const CEPH_FAMILY: &[&str] = &["ceph-mon", "ceph-osd", "ceph-fs", "ceph-radosgw"];

/// What a charm is, as shipped knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharmCategory {
    OpenStackPrincipal,
    OpenStackSubordinate,
    AuxiliaryPrincipal,
    AuxiliarySubordinate,
    Ceph,
}

/// Where a charm sits in the upgrade sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    ControlPlanePrincipal,
    ControlPlaneSubordinate,
    /// Hypervisor-hosting data-plane principal (paused-single-unit upgrade).
    HypervisorPrincipal,
    DataPlanePrincipal,
    DataPlaneSubordinate,
}

impl Classification {
    pub fn is_subordinate(&self) -> bool {
        matches!(
            self,
            Classification::ControlPlaneSubordinate | Classification::DataPlaneSubordinate
        )
    }

    pub fn is_data_plane(&self) -> bool {
        matches!(
            self,
            Classification::HypervisorPrincipal
                | Classification::DataPlanePrincipal
                | Classification::DataPlaneSubordinate
        )
    }
}

/// The frozen catalog: lookup tables plus charm classification.
#[derive(Debug, Clone)]
pub struct ReleaseCatalog {
    workload: WorkloadLookup,
    tracks: TrackLookup,
}

impl ReleaseCatalog {
    /// Load the tables shipped with the binary.
    pub fn load() -> Result<ReleaseCatalog, CatalogError> {
        Ok(ReleaseCatalog {
            workload: WorkloadLookup::parse(OPENSTACK_LOOKUP_CSV)?,
            tracks: TrackLookup::parse(TRACK_MAPPING_CSV)?,
        })
    }

    /// Build a catalog from caller-provided tables.
    pub fn from_tables(workload: WorkloadLookup, tracks: TrackLookup) -> ReleaseCatalog {
        ReleaseCatalog { workload, tracks }
    }

    pub fn workload(&self) -> &WorkloadLookup {
        &self.workload
    }

    pub fn tracks(&self) -> &TrackLookup {
        &self.tracks
    }

    /// The OpenStack release a charm's workload version belongs to, or
    /// `None` when the version matches no shipped interval.
    pub fn release_of(&self, charm: &str, workload_version: &str) -> Option<OpenStackRelease> {
        if self.is_ceph_family(charm) {
            let version = normalize_version(workload_version)?;
            return CephRelease::from_version_major(version.major)
                .map(|ceph| ceph.openstack_floor());
        }
        self.workload.release_of(charm, workload_version)
    }

    /// The Ceph release a ceph-family charm's workload version belongs to.
    pub fn ceph_release_of(&self, workload_version: &str) -> Option<CephRelease> {
        let version = normalize_version(workload_version)?;
        CephRelease::from_version_major(version.major)
    }

    /// The channel an application should track for `release`. OpenStack
    /// charms track the release codename; auxiliary and ceph charms go
    /// through the shipped track mapping. Risk is always `stable`.
    pub fn target_channel(
        &self,
        charm: &str,
        series: UbuntuSeries,
        release: OpenStackRelease,
    ) -> Result<Channel, CatalogError> {
        match self.category(charm) {
            Some(CharmCategory::OpenStackPrincipal) | Some(CharmCategory::OpenStackSubordinate) => {
                Ok(Channel::stable(release.as_str()))
            }
            Some(_) => self
                .tracks
                .track_for(charm, series, release)
                .map(Channel::stable)
                .ok_or_else(|| CatalogError::NoTrack {
                    charm: charm.to_string(),
                    series: series.to_string(),
                    release: release.to_string(),
                }),
            None => Err(CatalogError::UnknownCharm(charm.to_string())),
        }
    }

    /// Releases an auxiliary charm can serve on a given channel track.
    pub fn releases_for_track(
        &self,
        charm: &str,
        series: UbuntuSeries,
        track: &str,
    ) -> Vec<OpenStackRelease> {
        self.tracks.releases_for_track(charm, series, track)
    }

    pub fn category(&self, charm: &str) -> Option<CharmCategory> {
        // auxiliary membership wins: ovn-chassis is a data-plane
        // subordinate whose channel still follows the track mapping
        if CEPH_FAMILY.contains(&charm) {
            Some(CharmCategory::Ceph)
        } else if AUXILIARY_PRINCIPALS.contains(&charm) {
            Some(CharmCategory::AuxiliaryPrincipal)
        } else if AUXILIARY_SUBORDINATES.contains(&charm) {
            Some(CharmCategory::AuxiliarySubordinate)
        } else if OPENSTACK_PRINCIPALS.contains(&charm) || DATA_PLANE_PRINCIPALS.contains(&charm) {
            Some(CharmCategory::OpenStackPrincipal)
        } else if OPENSTACK_SUBORDINATES.contains(&charm)
            || DATA_PLANE_SUBORDINATES.contains(&charm)
        {
            Some(CharmCategory::OpenStackSubordinate)
        } else {
            None
        }
    }

    /// Which upgrade group a charm belongs to. Unknown charms return `None`
    /// and must be skipped explicitly or fail analysis.
    pub fn classify(&self, charm: &str) -> Option<Classification> {
        if HYPERVISOR_CHARMS.contains(&charm) {
            return Some(Classification::HypervisorPrincipal);
        }
        if DATA_PLANE_PRINCIPALS.contains(&charm) {
            return Some(Classification::DataPlanePrincipal);
        }
        if DATA_PLANE_SUBORDINATES.contains(&charm) {
            return Some(Classification::DataPlaneSubordinate);
        }
        match self.category(charm)? {
            CharmCategory::OpenStackSubordinate | CharmCategory::AuxiliarySubordinate => {
                Some(Classification::ControlPlaneSubordinate)
            }
            _ => Some(Classification::ControlPlanePrincipal),
        }
    }

    pub fn is_ceph_family(&self, charm: &str) -> bool {
        CEPH_FAMILY.contains(&charm)
    }

    pub fn is_auxiliary(&self, charm: &str) -> bool {
        matches!(
            self.category(charm),
            Some(CharmCategory::AuxiliaryPrincipal)
                | Some(CharmCategory::AuxiliarySubordinate)
                | Some(CharmCategory::Ceph)
        )
    }

    pub fn knows_charm(&self, charm: &str) -> bool {
        self.category(charm).is_some()
    }

    pub fn uses_long_idle(&self, charm: &str) -> bool {
        LONG_IDLE_CHARMS.contains(&charm)
    }

    /// True iff `current` and `target` are adjacent releases sharing at
    /// least one supported series.
    pub fn supported_upgrade(&self, current: OpenStackRelease, target: OpenStackRelease) -> bool {
        current.next() == Some(target)
            && [UbuntuSeries::Focal, UbuntuSeries::Jammy]
                .iter()
                .any(|series| series.supports(current) && series.supports(target))
    }

    /// Position of a charm in the canonical control-plane order; unknown
    /// charms sort after all listed ones, lexicographically.
    pub fn upgrade_order_key(&self, charm: &str) -> (usize, String) {
        let position = UPGRADE_ORDER
            .iter()
            .position(|c| *c == charm)
            .unwrap_or(UPGRADE_ORDER.len());
        (position, charm.to_string())
    }
}
