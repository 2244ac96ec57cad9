//! Lookup tables shipped with the tool
//!
//! Two CSV tables are compiled in: `openstack_lookup.csv` maps a charm's
//! workload version interval to an OpenStack release, and
//! `openstack_to_track_mapping.csv` maps `(charm, series, release)` to the
//! channel track auxiliary charms must follow. The tables are parsed once
//! at startup and are immutable afterwards.

use std::collections::BTreeMap;

use semver::Version;

use crate::catalog::release::{OpenStackRelease, UbuntuSeries};
use crate::error::CatalogError;

/// A half-open workload version interval `[lower, upper)` compatible with
/// one OpenStack release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub lower: Version,
    pub upper: Version,
    pub release: OpenStackRelease,
}

impl VersionRange {
    pub fn contains(&self, version: &Version) -> bool {
        *version >= self.lower && *version < self.upper
    }
}

/// Workload-version intervals per charm, ordered by release.
#[derive(Debug, Default, Clone)]
pub struct WorkloadLookup {
    ranges: BTreeMap<String, Vec<VersionRange>>,
}

impl WorkloadLookup {
    /// Parse the `charm,lower_version,upper_version,release` table.
    pub fn parse(raw: &str) -> Result<WorkloadLookup, CatalogError> {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().unwrap_or_default().trim();
        if header != "charm,lower_version,upper_version,release" {
            return Err(CatalogError::MalformedTable {
                table: "openstack_lookup".into(),
                detail: format!("unexpected header: '{header}'"),
            });
        }

        let mut ranges: BTreeMap<String, Vec<VersionRange>> = BTreeMap::new();
        for (number, line) in lines.enumerate() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            let &[charm, lower, upper, release] = fields.as_slice() else {
                return Err(CatalogError::MalformedTable {
                    table: "openstack_lookup".into(),
                    detail: format!("row {} has {} fields, expected 4", number + 2, fields.len()),
                });
            };
            let range = VersionRange {
                lower: normalize_version(lower).ok_or_else(|| CatalogError::MalformedTable {
                    table: "openstack_lookup".into(),
                    detail: format!("invalid lower version '{lower}' for charm '{charm}'"),
                })?,
                upper: normalize_version(upper).ok_or_else(|| CatalogError::MalformedTable {
                    table: "openstack_lookup".into(),
                    detail: format!("invalid upper version '{upper}' for charm '{charm}'"),
                })?,
                release: release.parse()?,
            };
            ranges.entry(charm.to_string()).or_default().push(range);
        }

        for charm_ranges in ranges.values_mut() {
            charm_ranges.sort_by(|a, b| a.release.cmp(&b.release));
        }
        Ok(WorkloadLookup { ranges })
    }

    /// Locate the release whose interval contains `workload_version`.
    /// An unmatched version is unknown, not an error.
    pub fn release_of(&self, charm: &str, workload_version: &str) -> Option<OpenStackRelease> {
        let version = normalize_version(workload_version)?;
        self.ranges
            .get(charm)?
            .iter()
            .find(|range| range.contains(&version))
            .map(|range| range.release)
    }

    pub fn knows_charm(&self, charm: &str) -> bool {
        self.ranges.contains_key(charm)
    }

    /// Re-serialize in canonical form: header plus rows sorted by charm and
    /// release, versions rendered as parsed.
    pub fn to_canonical_csv(&self) -> String {
        let mut out = String::from("charm,lower_version,upper_version,release\n");
        for (charm, ranges) in &self.ranges {
            for range in ranges {
                out.push_str(&format!(
                    "{},{},{},{}\n",
                    charm,
                    render_version(&range.lower),
                    render_version(&range.upper),
                    range.release
                ));
            }
        }
        out
    }
}

/// Channel tracks for auxiliary charms, keyed by `(charm, series, release)`.
#[derive(Debug, Default, Clone)]
pub struct TrackLookup {
    tracks: BTreeMap<(String, UbuntuSeries, OpenStackRelease), String>,
}

impl TrackLookup {
    /// Parse the `charm,series,release,track` table.
    pub fn parse(raw: &str) -> Result<TrackLookup, CatalogError> {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().unwrap_or_default().trim();
        if header != "charm,series,release,track" {
            return Err(CatalogError::MalformedTable {
                table: "openstack_to_track_mapping".into(),
                detail: format!("unexpected header: '{header}'"),
            });
        }

        let mut tracks = BTreeMap::new();
        for (number, line) in lines.enumerate() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            let &[charm, series, release, track] = fields.as_slice() else {
                return Err(CatalogError::MalformedTable {
                    table: "openstack_to_track_mapping".into(),
                    detail: format!("row {} has {} fields, expected 4", number + 2, fields.len()),
                });
            };
            tracks.insert(
                (charm.to_string(), series.parse()?, release.parse()?),
                track.to_string(),
            );
        }
        Ok(TrackLookup { tracks })
    }

    pub fn track_for(
        &self,
        charm: &str,
        series: UbuntuSeries,
        release: OpenStackRelease,
    ) -> Option<&str> {
        self.tracks
            .get(&(charm.to_string(), series, release))
            .map(String::as_str)
    }

    /// Releases a `(charm, series, track)` combination can serve. Used to
    /// derive an auxiliary application's release from its channel.
    pub fn releases_for_track(
        &self,
        charm: &str,
        series: UbuntuSeries,
        track: &str,
    ) -> Vec<OpenStackRelease> {
        self.tracks
            .iter()
            .filter(|((c, s, _), t)| c == charm && *s == series && t.as_str() == track)
            .map(|((_, _, release), _)| *release)
            .collect()
    }

    pub fn knows_charm(&self, charm: &str) -> bool {
        self.tracks.keys().any(|(c, _, _)| c == charm)
    }

    pub fn to_canonical_csv(&self) -> String {
        let mut out = String::from("charm,series,release,track\n");
        for ((charm, series, release), track) in &self.tracks {
            out.push_str(&format!("{charm},{series},{release},{track}\n"));
        }
        out
    }
}

/// Parse a workload version leniently: take the leading dotted numeric
/// component, pad to `MAJOR.MINOR.PATCH`, drop distro suffixes such as
/// `-0ubuntu1` or `+git...`.
pub fn normalize_version(raw: &str) -> Option<Version> {
    let numeric: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if numeric.is_empty() {
        return None;
    }

    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some(Version::new(major, minor, patch))
}

fn render_version(version: &Version) -> String {
    format!("{}.{}.{}", version.major, version.minor, version.patch)
}
