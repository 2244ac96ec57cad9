//! Release identifiers
//!
//! OpenStack releases, Ubuntu series and Ceph releases with the orderings
//! and cross-mappings the analyzer and planner depend on.

use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;

/// OpenStack release codenames, ordered from oldest to newest.
///
/// The derived `Ord` follows declaration order, which is how upgrade
/// adjacency is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpenStackRelease {
    Ussuri,
    Victoria,
    Wallaby,
    Xena,
    Yoga,
    Zed,
    Antelope,
    Bobcat,
    Caracal,
}

impl OpenStackRelease {
    pub const ALL: [OpenStackRelease; 9] = [
        OpenStackRelease::Ussuri,
        OpenStackRelease::Victoria,
        OpenStackRelease::Wallaby,
        OpenStackRelease::Xena,
        OpenStackRelease::Yoga,
        OpenStackRelease::Zed,
        OpenStackRelease::Antelope,
        OpenStackRelease::Bobcat,
        OpenStackRelease::Caracal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpenStackRelease::Ussuri => "ussuri",
            OpenStackRelease::Victoria => "victoria",
            OpenStackRelease::Wallaby => "wallaby",
            OpenStackRelease::Xena => "xena",
            OpenStackRelease::Yoga => "yoga",
            OpenStackRelease::Zed => "zed",
            OpenStackRelease::Antelope => "antelope",
            OpenStackRelease::Bobcat => "bobcat",
            OpenStackRelease::Caracal => "caracal",
        }
    }

    /// The release immediately after this one, if any.
    pub fn next(&self) -> Option<OpenStackRelease> {
        let idx = Self::ALL.iter().position(|r| r == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// The release immediately before this one, if any.
    pub fn previous(&self) -> Option<OpenStackRelease> {
        let idx = Self::ALL.iter().position(|r| r == self)?;
        idx.checked_sub(1).and_then(|i| Self::ALL.get(i)).copied()
    }
}

impl fmt::Display for OpenStackRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenStackRelease {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| CatalogError::UnknownRelease(s.to_string()))
    }
}

/// Ubuntu LTS series supported as cloud bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UbuntuSeries {
    Focal,
    Jammy,
}

impl UbuntuSeries {
    pub fn as_str(&self) -> &'static str {
        match self {
            UbuntuSeries::Focal => "focal",
            UbuntuSeries::Jammy => "jammy",
        }
    }

    /// OpenStack releases installable on this series. Yoga is the overlap
    /// point between focal and jammy.
    pub fn supported_releases(&self) -> &'static [OpenStackRelease] {
        match self {
            UbuntuSeries::Focal => &[
                OpenStackRelease::Ussuri,
                OpenStackRelease::Victoria,
                OpenStackRelease::Wallaby,
                OpenStackRelease::Xena,
                OpenStackRelease::Yoga,
            ],
            UbuntuSeries::Jammy => &[
                OpenStackRelease::Yoga,
                OpenStackRelease::Zed,
                OpenStackRelease::Antelope,
                OpenStackRelease::Bobcat,
                OpenStackRelease::Caracal,
            ],
        }
    }

    pub fn supports(&self, release: OpenStackRelease) -> bool {
        self.supported_releases().contains(&release)
    }

    /// Last release available on this series.
    pub fn final_release(&self) -> OpenStackRelease {
        *self
            .supported_releases()
            .last()
            .expect("series always supports at least one release")
    }
}

impl fmt::Display for UbuntuSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UbuntuSeries {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focal" => Ok(UbuntuSeries::Focal),
            "jammy" => Ok(UbuntuSeries::Jammy),
            other => Err(CatalogError::UnsupportedSeries(other.to_string())),
        }
    }
}

/// Ceph release codenames relevant to the supported OpenStack range.
///
/// Ceph-family charms report Ceph workload versions, so their release is
/// derived through this table rather than the OpenStack lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CephRelease {
    Octopus,
    Pacific,
    Quincy,
    Reef,
}

impl CephRelease {
    pub fn as_str(&self) -> &'static str {
        match self {
            CephRelease::Octopus => "octopus",
            CephRelease::Pacific => "pacific",
            CephRelease::Quincy => "quincy",
            CephRelease::Reef => "reef",
        }
    }

    /// Map a Ceph workload major version to its release.
    pub fn from_version_major(major: u64) -> Option<CephRelease> {
        match major {
            15 => Some(CephRelease::Octopus),
            16 => Some(CephRelease::Pacific),
            17 => Some(CephRelease::Quincy),
            18 => Some(CephRelease::Reef),
            _ => None,
        }
    }

    /// The Ceph release shipped alongside an OpenStack release.
    pub fn for_openstack(release: OpenStackRelease) -> CephRelease {
        match release {
            OpenStackRelease::Ussuri | OpenStackRelease::Victoria => CephRelease::Octopus,
            OpenStackRelease::Wallaby | OpenStackRelease::Xena => CephRelease::Pacific,
            OpenStackRelease::Yoga | OpenStackRelease::Zed | OpenStackRelease::Antelope => {
                CephRelease::Quincy
            }
            OpenStackRelease::Bobcat | OpenStackRelease::Caracal => CephRelease::Reef,
        }
    }

    /// Earliest OpenStack release this Ceph release ships with; used to
    /// derive an OpenStack-comparable release for ceph-family units.
    pub fn openstack_floor(&self) -> OpenStackRelease {
        match self {
            CephRelease::Octopus => OpenStackRelease::Ussuri,
            CephRelease::Pacific => OpenStackRelease::Wallaby,
            CephRelease::Quincy => OpenStackRelease::Yoga,
            CephRelease::Reef => OpenStackRelease::Bobcat,
        }
    }
}

impl fmt::Display for CephRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
